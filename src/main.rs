use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

mod cache;
mod classify;
mod config;
mod error;
mod handler;
mod http;
mod logger;
mod rate_limit;
mod render;
mod request_id;
mod routing;
mod server;

use config::{AppState, GlobalConfig};
use server::SignalHandler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = GlobalConfig::load()?;
    let addr = cfg.get_socket_addr()?;
    let strategy = cfg.strategy;
    let clear_on_startup = cfg.clear_cache_on_startup;
    let cleanup_interval = Duration::from_secs(cfg.cache_cleanup_interval_minutes * 60);

    let state = Arc::new(AppState::new(cfg));

    if clear_on_startup {
        if let Err(e) = state.cache.clear().await {
            logger::log_warning(&format!("failed to clear cache on startup: {e}"));
        }
    } else {
        let report = state.cache.cleanup().await;
        if report.removed > 0 || report.errors > 0 {
            println!(
                "[CACHE] startup sweep removed {} expired entries ({} errors)",
                report.removed, report.errors
            );
        }
    }

    let listener = TcpListener::bind(addr).await?;
    logger::log_server_start(&addr, strategy);

    let signal_handler = Arc::new(SignalHandler::new());
    server::start_signal_handler(Arc::clone(&signal_handler));

    spawn_cache_cleanup(Arc::clone(&state), cleanup_interval);
    spawn_rate_limit_pruning(Arc::clone(&state));

    serve(listener, state, signal_handler).await
}

async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    signal_handler: Arc<SignalHandler>,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer_addr)) => {
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let conn = http1::Builder::new()
                                .keep_alive(true)
                                .serve_connection(io, service_fn(move |req| {
                                    handler::handle_request(req, Arc::clone(&state), peer_addr)
                                }));
                            if let Err(err) = conn.await {
                                logger::log_connection_error(&err);
                            }
                        });
                    }
                    Err(e) => logger::log_error(&format!("failed to accept connection: {e}")),
                }
            }
            () = signal_handler.shutdown.notified() => {
                println!("[SHUTDOWN] Draining in-flight requests and exiting");
                return Ok(());
            }
        }
    }
}

fn spawn_cache_cleanup(state: Arc<AppState>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = state.cache.cleanup().await;
            if report.removed > 0 || report.errors > 0 {
                println!(
                    "[CACHE] cleanup removed {} expired entries ({} errors)",
                    report.removed, report.errors
                );
            }
        }
    });
}

fn spawn_rate_limit_pruning(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5 * 60));
        loop {
            ticker.tick().await;
            state.rate_limiter.prune();
        }
    });
}
