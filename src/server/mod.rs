//! Server module entry point: graceful-shutdown signal handling.

pub mod signal;

pub use signal::{start_signal_handler, SignalHandler};
