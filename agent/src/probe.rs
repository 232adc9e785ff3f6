use async_trait::async_trait;
use girder_operator::startup_monitor::HealthProbe;
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::TcpStream;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Considers the control plane healthy once `threshold` consecutive TCP
/// connects succeed. A single failure resets the streak.
pub struct TcpProbe {
    endpoint: String,
    threshold: u32,
    streak: Mutex<u32>,
}

impl TcpProbe {
    pub fn new(endpoint: String, threshold: u32) -> Self {
        TcpProbe {
            endpoint,
            threshold: threshold.max(1),
            streak: Mutex::new(0),
        }
    }
}

#[async_trait]
impl HealthProbe for TcpProbe {
    async fn check(&self) -> Result<(), String> {
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.endpoint)).await {
            Ok(Ok(_stream)) => {
                let mut streak = self.streak.lock().expect("probe lock");
                *streak += 1;
                if *streak >= self.threshold {
                    Ok(())
                } else {
                    Err(format!(
                        "{}/{} consecutive probes of {} passed",
                        streak, self.threshold, self.endpoint
                    ))
                }
            }
            Ok(Err(e)) => {
                *self.streak.lock().expect("probe lock") = 0;
                Err(format!("connect {}: {}", self.endpoint, e))
            }
            Err(_) => {
                *self.streak.lock().expect("probe lock") = 0;
                Err(format!("connect {}: timed out", self.endpoint))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn verdict_requires_consecutive_successes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let probe = TcpProbe::new(addr.to_string(), 2);
        assert!(probe.check().await.is_err());
        assert!(probe.check().await.is_ok());
    }

    #[tokio::test]
    async fn refused_connection_resets_the_streak() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = TcpProbe::new(addr.to_string(), 1);
        assert!(probe.check().await.is_err());
    }
}
