//! HTTP response building module: builders for the status codes the error
//! taxonomy (§7) and the static/render paths (§4.2) actually produce.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::Response;

use crate::error::GatewayError;

/// Maps a `GatewayError` to its response through `status_code()`, so every
/// call site constructs a typed error instead of picking a builder by hand
/// (§7).
pub fn build_error_response(err: &GatewayError, request_id: &str) -> Response<Full<Bytes>> {
    match err.status_code() {
        400 => build_400_response(&err.to_string()),
        403 => build_403_response(),
        404 => build_404_response(),
        429 => build_429_response(),
        503 => build_503_response(),
        504 => build_504_response(),
        _ => {
            crate::logger::log_error(&format!("[{request_id}] {err}"));
            build_500_response()
        }
    }
}

pub fn build_404_response() -> Response<Full<Bytes>> {
    text_response(404, "404 Not Found")
}

pub fn build_403_response() -> Response<Full<Bytes>> {
    text_response(403, "403 Forbidden")
}

pub fn build_429_response() -> Response<Full<Bytes>> {
    text_response(429, "429 Too Many Requests")
}

pub fn build_503_response() -> Response<Full<Bytes>> {
    text_response(503, "503 Service Unavailable")
}

pub fn build_504_response() -> Response<Full<Bytes>> {
    text_response(504, "504 Gateway Timeout")
}

pub fn build_400_response(message: &str) -> Response<Full<Bytes>> {
    text_response(400, message)
}

pub fn build_500_response() -> Response<Full<Bytes>> {
    text_response(500, "500 Internal Server Error")
}

fn text_response(status: u16, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|e| {
            log_build_error(status, &e);
            Response::new(Full::new(Bytes::new()))
        })
}

pub fn build_redirect_response(target: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(302)
        .header("Location", target)
        .header("Content-Type", "text/plain")
        .body(Full::new(Bytes::from("Redirecting...")))
        .unwrap_or_else(|e| {
            log_build_error(302, &e);
            Response::new(Full::new(Bytes::from("Redirecting...")))
        })
}

/// Build generic HTML response, optionally tagged with a cache-hit marker
/// and request ID (§4.2/§1).
pub fn build_html_response(content: String, cache_hit: bool, request_id: &str) -> Response<Full<Bytes>> {
    let content_length = content.len();
    Response::builder()
        .status(200)
        .header("Content-Type", "text/html; charset=utf-8")
        .header("Content-Length", content_length)
        .header("X-Cache", if cache_hit { "HIT" } else { "MISS" })
        .header("X-Request-ID", request_id)
        .body(Full::new(Bytes::from(content)))
        .unwrap_or_else(|e| {
            log_build_error(200, &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Build a raw static-file response (no cache hit/miss semantics).
pub fn build_static_response(data: Bytes, content_type: &str, request_id: &str) -> Response<Full<Bytes>> {
    let content_length = data.len();
    Response::builder()
        .status(200)
        .header("Content-Type", content_type)
        .header("Content-Length", content_length)
        .header("X-Request-ID", request_id)
        .body(Full::new(data))
        .unwrap_or_else(|e| {
            log_build_error(200, &e);
            Response::new(Full::new(Bytes::new()))
        })
}

pub fn build_json_response(status: u16, body: &str, request_id: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("X-Request-ID", request_id)
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|e| {
            log_build_error(status, &e);
            Response::new(Full::new(Bytes::new()))
        })
}

fn log_build_error(status: u16, error: &hyper::http::Error) {
    crate::logger::log_error(&format!("Failed to build {status} response: {error}"));
}
