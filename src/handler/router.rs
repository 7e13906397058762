//! Main request dispatch: classification, static serving, cache lookup,
//! and render dispatch, composed per §4.2.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use tokio::time::timeout;

use crate::classify::{self, ServingDecision};
use crate::config::AppState;
use crate::error::{ClientError, GatewayError};
use crate::handler::endpoints;
use crate::handler::static_files;
use crate::http;
use crate::logger::{self, AccessLogEntry};
use crate::request_id;
use crate::routing;

/// §5: a request that has not produced a response by this point is
/// abandoned in favor of a 504, rather than holding the connection open.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    remote_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let started = Instant::now();
    let rid = request_id::generate();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let headers = req.headers().clone();
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let (response, tag) = match timeout(
        REQUEST_TIMEOUT,
        route(&state, &method, &path, query.as_deref(), &headers, &rid),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => {
            logger::log_warning(&format!("[{rid}] request timed out after {REQUEST_TIMEOUT:?}"));
            (http::build_error_response(&GatewayError::Timeout, &rid), "TIMEOUT")
        }
    };

    let body_bytes: usize = response
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let mut entry = AccessLogEntry::new(remote_addr.ip().to_string(), method, path);
    entry.query = query;
    entry.status = response.status().as_u16();
    entry.body_bytes = body_bytes;
    entry.user_agent = Some(user_agent);
    entry.request_time_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
    logger::log_access_tagged(&entry, tag, &rid, state.config.logs, &state.config.access_log_format);

    Ok(response)
}

async fn route(
    state: &Arc<AppState>,
    method: &str,
    path: &str,
    query: Option<&str>,
    headers: &hyper::HeaderMap,
    rid: &str,
) -> (Response<Full<Bytes>>, &'static str) {
    if path == "/health" {
        (endpoints::health(state, rid).await, "HEALTH")
    } else if path == "/render" {
        (endpoints::render_aux(state, headers, query, rid).await, "AUX-RENDER")
    } else if path == "/cache/invalidate" && method == "POST" {
        (
            endpoints::cache_invalidate(state, query, rid).await,
            "CACHE-INVALIDATE",
        )
    } else if path == "/cache/clear" && method == "POST" {
        (endpoints::cache_clear(state, rid).await, "CACHE-CLEAR")
    } else {
        dispatch(state, headers, path, query, rid).await
    }
}

async fn dispatch(
    state: &Arc<AppState>,
    headers: &hyper::HeaderMap,
    path: &str,
    query: Option<&str>,
    rid: &str,
) -> (Response<Full<Bytes>>, &'static str) {
    if classify::is_internal_render(headers) {
        return (serve_loopback(state, headers, path, rid).await, "LOOPBACK");
    }

    let Some(hostname) = classify::extract_hostname(headers) else {
        return (
            http::build_error_response(&GatewayError::Client(ClientError::UnknownHost), rid),
            "STATIC",
        );
    };

    let Some(host_cfg) = routing::resolve_host(&hostname, &state.config.hosts) else {
        return (
            http::build_error_response(&GatewayError::Client(ClientError::UnknownHost), rid),
            "STATIC",
        );
    };

    let effective = state.config.effective(Some(host_cfg));
    let renderx_ua = classify::is_renderx_request(headers);
    let is_file = classify::is_file_request(path);
    let bot = classify::is_bot(headers, &effective.bots);

    let decision = classify::decide(effective.strategy, renderx_ua || is_file, bot);

    match decision {
        ServingDecision::Static => {
            let source_dir = Path::new(&state.config.hosts_root).join(&host_cfg.source);
            (serve_static(&source_dir, path, rid).await, "STATIC")
        }
        ServingDecision::Render => {
            let origin = headers
                .get("origin")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let original_url = match query {
                Some(q) if !q.is_empty() => format!("{path}?{q}"),
                _ => path.to_string(),
            };
            let cache_key = origin
                .clone()
                .map(|o| format!("{o}{original_url}"))
                .unwrap_or_else(|| format!("http://{hostname}{original_url}"));

            if let Some(html) = state.cache.get(&cache_key, "desktop").await {
                return (http::build_html_response(html, true, rid), "SSR-CACHE");
            }

            let loopback_url = format!("http://localhost:{}{}", state.config.port, original_url);
            let render_req = crate::render::RenderRequest {
                url: loopback_url,
                user_agent: "RenderX/1.0".to_string(),
                origin,
                config: effective.clone(),
            };

            match state.engine.render(render_req).await {
                Ok(html) => {
                    let _ = state
                        .cache
                        .set(&cache_key, &html, "desktop", effective.cache_ttl_seconds)
                        .await;
                    (http::build_html_response(html, false, rid), "SSR-RENDER")
                }
                Err(e) => {
                    logger::log_warning(&format!("render failed, falling back to static: {e}"));
                    let source_dir = Path::new(&state.config.hosts_root).join(&host_cfg.source);
                    (serve_static(&source_dir, path, rid).await, "SSR-RENDER")
                }
            }
        }
    }
}

/// §4.2 loopback handling: try the forwarded host first, then every other
/// active host, then any host's `index.html`.
async fn serve_loopback(
    state: &Arc<AppState>,
    headers: &hyper::HeaderMap,
    path: &str,
    rid: &str,
) -> Response<Full<Bytes>> {
    if let Some(hostname) = classify::extract_hostname(headers) {
        if let Some(host_cfg) = routing::resolve_host(&hostname, &state.config.hosts) {
            let dir = Path::new(&state.config.hosts_root).join(&host_cfg.source);
            if let Some((content, content_type)) = static_files::load(&dir.to_string_lossy(), path).await {
                return http::build_static_response(Bytes::from(content), content_type, rid);
            }
        }
    }

    for host_cfg in state.config.hosts.iter().filter(|h| h.active) {
        let dir = Path::new(&state.config.hosts_root).join(&host_cfg.source);
        if let Some((content, content_type)) = static_files::load(&dir.to_string_lossy(), path).await {
            return http::build_static_response(Bytes::from(content), content_type, rid);
        }
    }

    for host_cfg in state.config.hosts.iter().filter(|h| h.active) {
        let dir = Path::new(&state.config.hosts_root).join(&host_cfg.source);
        if let Some(content) = static_files::load_index(&dir.to_string_lossy()).await {
            return http::build_static_response(
                Bytes::from(content),
                "text/html; charset=utf-8",
                rid,
            );
        }
    }

    http::build_error_response(&GatewayError::Client(ClientError::NotFound), rid)
}

async fn serve_static(source_dir: &Path, path: &str, rid: &str) -> Response<Full<Bytes>> {
    match static_files::load(&source_dir.to_string_lossy(), path).await {
        Some((content, content_type)) => {
            http::build_static_response(Bytes::from(content), content_type, rid)
        }
        None => http::build_error_response(&GatewayError::Client(ClientError::NotFound), rid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, CleanupReport};
    use crate::config::{GlobalConfig, HostConfig, Strategy};
    use crate::error::{CacheError, RenderError};
    use crate::rate_limit::RateLimiter;
    use crate::render::Renderer;
    use hyper::header::{HeaderName, HeaderValue};
    use hyper::HeaderMap;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeCache {
        entries: AsyncMutex<HashMap<String, String>>,
    }

    impl FakeCache {
        fn empty() -> Self {
            Self {
                entries: AsyncMutex::new(HashMap::new()),
            }
        }

        fn with_entry(url: &str, device_type: &str, html: &str) -> Self {
            let mut entries = HashMap::new();
            entries.insert(format!("{device_type}:{url}"), html.to_string());
            Self {
                entries: AsyncMutex::new(entries),
            }
        }
    }

    #[async_trait::async_trait]
    impl Cache for FakeCache {
        async fn get(&self, url: &str, device_type: &str) -> Option<String> {
            self.entries.lock().await.get(&format!("{device_type}:{url}")).cloned()
        }

        async fn set(&self, url: &str, html: &str, device_type: &str, _ttl_seconds: u64) -> Result<(), CacheError> {
            self.entries
                .lock()
                .await
                .insert(format!("{device_type}:{url}"), html.to_string());
            Ok(())
        }

        async fn invalidate(&self, url: &str, device_type: &str) {
            self.entries.lock().await.remove(&format!("{device_type}:{url}"));
        }

        async fn clear(&self) -> Result<(), CacheError> {
            self.entries.lock().await.clear();
            Ok(())
        }

        async fn cleanup(&self) -> CleanupReport {
            CleanupReport::default()
        }

        async fn writable(&self) -> bool {
            true
        }
    }

    /// A stub renderer that never touches a real browser: always returns
    /// the same canned result and counts how many times it was asked.
    struct StubRenderer {
        result: Result<String, ()>,
        calls: AtomicUsize,
    }

    impl StubRenderer {
        fn ok(html: &str) -> Self {
            Self {
                result: Ok(html.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                result: Err(()),
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Renderer for StubRenderer {
        async fn render(&self, _req: crate::render::RenderRequest) -> Result<String, RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone().map_err(|()| RenderError::AtCapacity)
        }

        fn is_available(&self) -> bool {
            true
        }

        fn active_requests(&self) -> usize {
            0
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    /// Lays out `<tmp>/site/index.html` with the given body and returns the
    /// tmp root to use as `hosts_root`.
    fn test_host_dir(name: &str, body: &str) -> std::path::PathBuf {
        let root = std::env::temp_dir().join(format!(
            "renderx-router-test-{name}-{:?}",
            std::thread::current().id()
        ));
        let site = root.join("site");
        std::fs::create_dir_all(&site).unwrap();
        std::fs::write(site.join("index.html"), body).unwrap();
        root
    }

    fn test_state(
        hosts_root: &std::path::Path,
        strategy: Strategy,
        cache: FakeCache,
        renderer: Arc<StubRenderer>,
    ) -> Arc<AppState> {
        let mut config = GlobalConfig {
            hosts_root: hosts_root.to_string_lossy().to_string(),
            strategy,
            ..GlobalConfig::default()
        };
        config.hosts = vec![HostConfig {
            source: "site".to_string(),
            host: "example.com".to_string(),
            active: true,
            timeout_ms: None,
            parallel_renders: None,
            bots: None,
            strategy: None,
            root_selector: None,
            optimizer_options: None,
        }];

        Arc::new(AppState {
            config,
            cache: Arc::new(cache),
            engine: renderer as Arc<dyn Renderer>,
            rate_limiter: RateLimiter::new(100, StdDuration::from_secs(900)),
        })
    }

    #[tokio::test]
    async fn cache_hit_serves_without_invoking_renderer() {
        let dir = test_host_dir("hit", "<html>static</html>");
        let renderer = Arc::new(StubRenderer::ok("<html>rendered</html>"));
        let state = test_state(
            &dir,
            Strategy::Ssr,
            FakeCache::with_entry("http://example.com/", "desktop", "<html>cached</html>"),
            Arc::clone(&renderer),
        );
        let h = headers(&[("host", "example.com")]);

        let (resp, tag) = dispatch(&state, &h, "/", None, "rid").await;

        assert_eq!(tag, "SSR-CACHE");
        assert_eq!(resp.status(), 200);
        assert_eq!(renderer.call_count(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn cache_miss_renders_and_populates_cache() {
        let dir = test_host_dir("miss", "<html>static</html>");
        let renderer = Arc::new(StubRenderer::ok("<html>rendered</html>"));
        let state = test_state(&dir, Strategy::Ssr, FakeCache::empty(), Arc::clone(&renderer));
        let h = headers(&[("host", "example.com")]);

        let (resp, tag) = dispatch(&state, &h, "/", None, "rid").await;

        assert_eq!(tag, "SSR-RENDER");
        assert_eq!(resp.status(), 200);
        assert_eq!(renderer.call_count(), 1);
        let cached = state.cache.get("http://example.com/", "desktop").await;
        assert_eq!(cached.as_deref(), Some("<html>rendered</html>"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn query_string_is_part_of_the_cache_key() {
        let dir = test_host_dir("query", "<html>static</html>");
        let renderer = Arc::new(StubRenderer::ok("<html>rendered</html>"));
        let state = test_state(&dir, Strategy::Ssr, FakeCache::empty(), Arc::clone(&renderer));
        let h = headers(&[("host", "example.com")]);

        dispatch(&state, &h, "/", Some("page=2"), "rid").await;

        assert!(state.cache.get("http://example.com/", "desktop").await.is_none());
        assert!(
            state
                .cache
                .get("http://example.com/?page=2", "desktop")
                .await
                .is_some()
        );
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn render_failure_falls_back_to_static() {
        let dir = test_host_dir("fail", "<html>static-fallback</html>");
        let renderer = Arc::new(StubRenderer::failing());
        let state = test_state(&dir, Strategy::Ssr, FakeCache::empty(), Arc::clone(&renderer));
        let h = headers(&[("host", "example.com")]);

        let (resp, tag) = dispatch(&state, &h, "/", None, "rid").await;

        assert_eq!(tag, "SSR-RENDER");
        assert_eq!(resp.status(), 200);
        assert_eq!(renderer.call_count(), 1);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn internal_render_header_serves_loopback_static() {
        let dir = test_host_dir("loopback", "<html>loopback</html>");
        let renderer = Arc::new(StubRenderer::ok("<html>rendered</html>"));
        let state = test_state(&dir, Strategy::Csr, FakeCache::empty(), Arc::clone(&renderer));
        let h = headers(&[("host", "example.com"), (classify::INTERNAL_HEADER, "true")]);

        let (resp, tag) = dispatch(&state, &h, "/", None, "rid").await;

        assert_eq!(tag, "LOOPBACK");
        assert_eq!(resp.status(), 200);
        assert_eq!(renderer.call_count(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn unknown_host_is_rejected() {
        let dir = test_host_dir("unknown", "<html>static</html>");
        let renderer = Arc::new(StubRenderer::ok("<html>rendered</html>"));
        let state = test_state(&dir, Strategy::Ssr, FakeCache::empty(), Arc::clone(&renderer));
        let h = headers(&[("host", "not-configured.example")]);

        let (resp, tag) = dispatch(&state, &h, "/", None, "rid").await;

        assert_eq!(tag, "STATIC");
        assert_eq!(resp.status(), 403);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
