use owo_colors::OwoColorize;

/// Resolves when the process receives SIGINT (Ctrl+C) or SIGTERM (kubelet).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv()  => eprintln!("{}", "🛑 Received SIGINT, shutting down".red()),
            _ = sigterm.recv() => eprintln!("{}", "🛑 Received SIGTERM, shutting down".red()),
        }
    }

    #[cfg(not(unix))]
    {
        // Only Ctrl+C is available off-Unix
        tokio::signal::ctrl_c()
            .await
            .expect("install Ctrl+C handler");
    }
}
