//! Graceful shutdown signal handling (SIGTERM, SIGINT).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub struct SignalHandler {
    pub shutdown: Arc<Notify>,
    pub shutdown_requested: Arc<AtomicBool>,
}

impl SignalHandler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(Notify::new()),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
pub fn start_signal_handler(handler: Arc<SignalHandler>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                crate::logger::log_error(&format!("failed to register SIGTERM handler: {e}"));
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                crate::logger::log_error(&format!("failed to register SIGINT handler: {e}"));
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => println!("[SIGNAL] SIGTERM received, shutting down"),
            _ = sigint.recv() => println!("[SIGNAL] SIGINT received, shutting down"),
        }

        handler.shutdown_requested.store(true, Ordering::SeqCst);
        handler.shutdown.notify_waiters();
    });
}

#[cfg(not(unix))]
pub fn start_signal_handler(handler: Arc<SignalHandler>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("[SIGNAL] Ctrl+C received, shutting down");
            handler.shutdown_requested.store(true, Ordering::SeqCst);
            handler.shutdown.notify_waiters();
        }
    });
}
