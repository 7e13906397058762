//! Auxiliary HTTP endpoints: health, a directly-addressable render
//! endpoint guarded against SSRF, and cache management (§4.5).

use std::net::IpAddr;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{HeaderMap, Response};
use url::Url;

use crate::classify;
use crate::config::AppState;
use crate::error::{ClientError, GatewayError};
use crate::http;
use crate::render::RenderRequest;

pub async fn health(state: &Arc<AppState>, rid: &str) -> Response<Full<Bytes>> {
    let cache_writable = state.cache.writable().await;
    let browser_available = state.engine.is_available();

    let body = format!(
        r#"{{"status":"{}","activeRequests":{},"maxConcurrency":{},"hosts":{},"browser":{{"available":{}}},"cache":{{"writable":{}}}}}"#,
        if cache_writable { "ok" } else { "degraded" },
        state.engine.active_requests(),
        state.config.parallel_renders,
        state.config.hosts.len(),
        browser_available,
        cache_writable,
    );

    let status = if cache_writable { 200 } else { 503 };
    http::build_json_response(status, &body, rid)
}

/// Directly-addressable render endpoint, `GET /render?url=...`. Rejects
/// loopback/private targets to prevent the gateway from being used to
/// render arbitrary internal addresses (§4.5).
pub async fn render_aux(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    query: Option<&str>,
    rid: &str,
) -> Response<Full<Bytes>> {
    if !check_rate_limit(state, headers) {
        return http::build_error_response(&GatewayError::Client(ClientError::RateLimited), rid);
    }

    let Some(target) = query.and_then(|q| parse_query_param(q, "url")) else {
        return http::build_error_response(&GatewayError::Client(ClientError::MissingParam("url")), rid);
    };

    let Ok(parsed) = Url::parse(&target) else {
        return http::build_error_response(
            &GatewayError::Client(ClientError::UnsafeRenderTarget("not a valid absolute URL".to_string())),
            rid,
        );
    };

    if is_unsafe_render_target(&parsed) {
        return http::build_error_response(
            &GatewayError::Client(ClientError::UnsafeRenderTarget(target.clone())),
            rid,
        );
    }

    let effective = state.config.effective(None);
    if effective.bot_only() && !classify::is_bot(headers, &effective.bots) {
        return http::build_redirect_response(&target);
    }

    let device_type = query
        .and_then(|q| parse_query_param(q, "device"))
        .unwrap_or_else(|| "desktop".to_string());

    if let Some(html) = state.cache.get(&target, &device_type).await {
        return http::build_html_response(html, true, rid);
    }

    let render_req = RenderRequest {
        url: target.clone(),
        user_agent: "RenderX/1.0".to_string(),
        origin: None,
        config: effective.clone(),
    };

    match state.engine.render(render_req).await {
        Ok(html) => {
            let _ = state
                .cache
                .set(&target, &html, &device_type, effective.cache_ttl_seconds)
                .await;
            http::build_html_response(html, false, rid)
        }
        Err(e) => {
            crate::logger::log_warning(&format!("aux render failed: {e}"));
            http::build_error_response(&GatewayError::Render(e), rid)
        }
    }
}

pub async fn cache_invalidate(
    state: &Arc<AppState>,
    query: Option<&str>,
    rid: &str,
) -> Response<Full<Bytes>> {
    let Some(url) = query.and_then(|q| parse_query_param(q, "url")) else {
        return http::build_error_response(&GatewayError::Client(ClientError::MissingParam("url")), rid);
    };
    let device = query
        .and_then(|q| parse_query_param(q, "device"))
        .unwrap_or_else(|| "desktop".to_string());

    state.cache.invalidate(&url, &device).await;
    http::build_json_response(200, r#"{"success":true}"#, rid)
}

pub async fn cache_clear(state: &Arc<AppState>, rid: &str) -> Response<Full<Bytes>> {
    match state.cache.clear().await {
        Ok(()) => http::build_json_response(200, r#"{"success":true}"#, rid),
        Err(e) => {
            crate::logger::log_error(&format!("cache clear failed: {e}"));
            http::build_error_response(&GatewayError::Cache(e), rid)
        }
    }
}

/// Loopback and private-range targets are rejected; `localhost` itself is
/// allowed since the gateway's own loopback render requests use it.
fn is_unsafe_render_target(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return true;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return false;
    }
    match host.parse::<IpAddr>() {
        Ok(ip) => is_private_or_loopback(&ip),
        Err(_) => false,
    }
}

fn is_private_or_loopback(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

fn parse_query_param(query: &str, key: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

fn check_rate_limit(state: &Arc<AppState>, headers: &HeaderMap) -> bool {
    state.rate_limiter.check(extract_peer_ip(headers))
}

fn extract_peer_ip(headers: &HeaderMap) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .and_then(|v| v.parse().ok())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_loopback_and_private_targets() {
        assert!(is_unsafe_render_target(&Url::parse("http://127.0.0.1/x").unwrap()));
        assert!(is_unsafe_render_target(&Url::parse("http://0.0.0.0/x").unwrap()));
        assert!(is_unsafe_render_target(&Url::parse("http://192.168.1.5/x").unwrap()));
        assert!(is_unsafe_render_target(&Url::parse("http://[::1]/x").unwrap()));
    }

    #[test]
    fn allows_localhost_and_public_targets() {
        assert!(!is_unsafe_render_target(&Url::parse("http://localhost:3000/x").unwrap()));
        assert!(!is_unsafe_render_target(&Url::parse("https://example.com/x").unwrap()));
    }

    #[test]
    fn parses_named_query_param() {
        assert_eq!(
            parse_query_param("url=https%3A%2F%2Fexample.com&device=mobile", "url"),
            Some("https://example.com".to_string())
        );
        assert_eq!(parse_query_param("url=https://example.com", "device"), None);
    }
}
