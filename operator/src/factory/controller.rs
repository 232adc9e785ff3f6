use super::{EventHandler, EventRecorder, EventSource, QueueKey, Registration, WorkQueue};
use crate::status::StatusClient;
use crate::util::{self, Error};
use async_trait::async_trait;
use girder_types::{ConditionStatus, OperatorCondition, reasons, set_condition};
use owo_colors::OwoColorize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

/// Everything a sync sees from the harness. The context is rebuilt per
/// dequeue; holding state across reconciles is the API server's job.
pub struct SyncContext {
    pub key: QueueKey,
    pub recorder: Arc<dyn EventRecorder>,
    pub shutdown: CancellationToken,
}

#[async_trait]
pub trait ReconcileSync: Send + Sync + 'static {
    async fn sync(&self, ctx: &SyncContext) -> Result<(), Error>;
}

/// Builder for a controller run loop. The defaults match the common case:
/// one worker, ten-minute resync, no degraded wiring.
pub struct ControllerBuilder {
    name: String,
    resync_every: Duration,
    workers: usize,
    sources: Vec<Arc<dyn EventSource>>,
    degraded: Option<DegradedOnError>,
}

struct DegradedOnError {
    condition_type: String,
    instance: String,
    status: Arc<dyn StatusClient>,
}

impl ControllerBuilder {
    pub fn new(name: &str) -> Self {
        ControllerBuilder {
            name: name.to_string(),
            resync_every: util::DEFAULT_RESYNC_INTERVAL,
            workers: 1,
            sources: Vec::new(),
            degraded: None,
        }
    }

    /// Registers an event source whose notifications schedule reconciles.
    pub fn with_informer(mut self, source: Arc<dyn EventSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn resync_every(mut self, interval: Duration) -> Self {
        self.resync_every = interval;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Wires sync failures to a `<prefix>Degraded` condition on the given
    /// operator instance; the condition clears on the next successful sync.
    pub fn degraded_on_error(
        mut self,
        condition_prefix: &str,
        instance: &str,
        status: Arc<dyn StatusClient>,
    ) -> Self {
        self.degraded = Some(DegradedOnError {
            condition_type: format!("{condition_prefix}Degraded"),
            instance: instance.to_string(),
            status,
        });
        self
    }

    pub fn build(self, sync: Arc<dyn ReconcileSync>, recorder: Arc<dyn EventRecorder>) -> Controller {
        Controller {
            inner: Arc::new(Inner {
                name: self.name,
                degraded: self.degraded,
                sync,
                recorder,
                queue: WorkQueue::new(),
                #[cfg(feature = "metrics")]
                metrics: None,
            }),
            resync_every: self.resync_every,
            workers: self.workers,
            sources: self.sources,
        }
    }
}

pub struct Controller {
    inner: Arc<Inner>,
    resync_every: Duration,
    workers: usize,
    sources: Vec<Arc<dyn EventSource>>,
}

struct Inner {
    name: String,
    degraded: Option<DegradedOnError>,
    sync: Arc<dyn ReconcileSync>,
    recorder: Arc<dyn EventRecorder>,
    queue: Arc<WorkQueue>,
    #[cfg(feature = "metrics")]
    metrics: Option<ControllerMetrics>,
}

struct QueueingHandler {
    queue: Arc<WorkQueue>,
}

impl EventHandler for QueueingHandler {
    fn on_change(&self, key: QueueKey) {
        self.queue.add(key);
    }
}

impl Controller {
    /// Queue handle for manual scheduling, exposed to informer glue and tests.
    pub fn queue(&self) -> Arc<WorkQueue> {
        self.inner.queue.clone()
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self) -> Self {
        let name = self.inner.name.clone();
        let inner = Arc::get_mut(&mut self.inner).expect("with_metrics before run");
        inner.metrics = Some(ControllerMetrics::new(&name));
        self
    }

    /// Runs event registration, the resync tick and the workers until the
    /// token is cancelled. Keys taken off the queue are reconciled
    /// sequentially per worker; failed keys requeue with jittered backoff.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Error> {
        println!(
            "⚙️ {}{}",
            "Starting controller ".green(),
            self.inner.name.green().dimmed()
        );

        let registrations: Vec<(Arc<dyn EventSource>, Registration)> = self
            .sources
            .iter()
            .map(|source| {
                let registration = source.add_event_handler(Arc::new(QueueingHandler {
                    queue: self.inner.queue.clone(),
                }));
                (source.clone(), registration)
            })
            .collect();

        let mut workers = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let inner = self.inner.clone();
            let token = shutdown.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(inner, token).await;
            }));
        }

        // Initial reconcile, then the periodic resync.
        self.inner.queue.add(QueueKey::Singleton);
        let mut tick = tokio::time::interval(self.resync_every);
        tick.tick().await; // the first tick fires immediately
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => self.inner.queue.add(QueueKey::Singleton),
            }
        }

        for worker in workers {
            worker.abort();
            worker.await.ok();
        }
        for (source, registration) in registrations {
            source.remove_event_handler(registration);
        }
        println!(
            "🛑 {}{}",
            "Stopped controller ".red(),
            self.inner.name.red().dimmed()
        );
        Ok(())
    }
}

async fn worker_loop(inner: Arc<Inner>, shutdown: CancellationToken) {
    loop {
        let key = tokio::select! {
            _ = shutdown.cancelled() => return,
            key = inner.queue.take() => key,
        };

        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let ctx = SyncContext {
            key: key.clone(),
            recorder: inner.recorder.clone(),
            shutdown: shutdown.clone(),
        };
        let result = inner.sync.sync(&ctx).await;

        #[cfg(feature = "metrics")]
        if let Some(metrics) = &inner.metrics {
            metrics.observe_sync(started.elapsed(), result.is_err());
        }

        match result {
            Ok(()) => {
                inner.queue.forget(&key);
                inner.set_degraded(None).await;
            }
            Err(error) => {
                eprintln!(
                    "{}",
                    format!("Reconciliation error in {} for {}: {}", inner.name, key, error).red()
                );
                inner.set_degraded(Some(error.to_string())).await;
                let delay = inner.queue.note_failure(&key);
                inner.queue.requeue_after(key, delay);
            }
        }
    }
}

impl Inner {
    async fn set_degraded(&self, message: Option<String>) {
        let Some(wiring) = &self.degraded else {
            return;
        };
        let condition = match &message {
            Some(message) => OperatorCondition::new(
                wiring.condition_type.clone(),
                ConditionStatus::True,
                reasons::SYNC_ERROR,
            )
            .with_message(message.clone()),
            None => OperatorCondition::new(
                wiring.condition_type.clone(),
                ConditionStatus::False,
                reasons::AS_EXPECTED,
            ),
        };
        let result = async {
            let mut status = wiring.status.get_status(&wiring.instance).await?;
            set_condition(&mut status.conditions, condition);
            wiring.status.apply_status(&wiring.instance, status).await
        }
        .await;
        if let Err(error) = result {
            eprintln!(
                "{}",
                format!(
                    "Failed to update {} for {}: {}",
                    wiring.condition_type, wiring.instance, error
                )
                .red()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::SharedEventSource;
    use crate::factory::fake::CapturingRecorder;
    use crate::status::fake::FakeStatusClient;
    use girder_types::{OperatorStatus, find_condition};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSync {
        calls: AtomicUsize,
        fail_first: AtomicUsize,
    }

    #[async_trait]
    impl ReconcileSync for CountingSync {
        async fn sync(&self, _ctx: &SyncContext) -> Result<(), Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::UserInput("transient".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn informer_notifications_drive_reconciles() {
        let sync = Arc::new(CountingSync {
            calls: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(0),
        });
        let source = SharedEventSource::new();
        let controller = ControllerBuilder::new("test")
            .with_informer(source.clone())
            .resync_every(Duration::from_secs(3600))
            .build(sync.clone(), CapturingRecorder::new());

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(controller.run(shutdown.clone()));

        // Initial singleton sync plus one notification.
        tokio::time::sleep(Duration::from_millis(50)).await;
        source.notify(QueueKey::named("ns", "obj"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(sync.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_sync_requeues_and_eventually_succeeds() {
        let sync = Arc::new(CountingSync {
            calls: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(1),
        });
        let controller = ControllerBuilder::new("retry")
            .resync_every(Duration::from_secs(3600))
            .build(sync.clone(), CapturingRecorder::new());

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(controller.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(200)).await;

        shutdown.cancel();
        handle.await.unwrap().unwrap();
        // One failure plus at least one retried success.
        assert!(sync.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn degraded_on_error_sets_and_clears_condition() {
        let sync = Arc::new(CountingSync {
            calls: AtomicUsize::new(0),
            fail_first: AtomicUsize::new(1),
        });
        let status = FakeStatusClient::new(OperatorStatus::default());
        let controller = ControllerBuilder::new("degraded")
            .resync_every(Duration::from_secs(3600))
            .degraded_on_error("Target", "instance", status.clone())
            .build(sync.clone(), CapturingRecorder::new());

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(controller.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        let final_status = status.current();
        let condition =
            find_condition(&final_status.conditions, "TargetDegraded").expect("condition set");
        // The retry succeeded, so the condition must have cleared again.
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason.as_deref(), Some(reasons::AS_EXPECTED));
    }
}
