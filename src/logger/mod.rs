//! Logger module
//!
//! Provides logging utilities for the gateway: server lifecycle logging,
//! level-gated access logging (§5), and error/warning logging.

mod format;

pub use format::AccessLogEntry;

use crate::config::LogLevel;
use std::net::SocketAddr;

pub fn log_server_start(addr: &SocketAddr, strategy: crate::config::Strategy) {
    println!("======================================");
    println!("renderx gateway started successfully");
    println!("Listening on: http://{addr}");
    println!("Strategy: {strategy:?}");
    println!("======================================\n");
}

pub fn log_connection_error(err: &impl std::fmt::Debug) {
    eprintln!("[ERROR] Failed to serve connection: {err:?}");
}

pub fn log_error(message: &str) {
    eprintln!("[ERROR] {message}");
}

pub fn log_warning(message: &str) {
    eprintln!("[WARN] {message}");
}

/// Log an access entry tagged with its serving classification (`STATIC`,
/// `SSR-RENDER`, `SSR-CACHE`, `LOOPBACK`, ...), gated by the configured
/// log level (§5: `none` logs nothing, `ssr` logs only render-path
/// requests, `all` logs everything), in the configured access-log format
/// (§4.1: `combined`, `common`, `json`, or a custom pattern).
pub fn log_access_tagged(entry: &AccessLogEntry, tag: &str, request_id: &str, level: LogLevel, format: &str) {
    let is_ssr = matches!(tag, "SSR-RENDER" | "SSR-CACHE" | "LOOPBACK" | "AUX-RENDER");
    let should_log = match level {
        LogLevel::None => false,
        LogLevel::Ssr => is_ssr,
        LogLevel::All => true,
    };
    if !should_log {
        return;
    }
    println!("[{tag}] {} req_id={request_id}", entry.format(format));
}
