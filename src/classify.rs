//! Request classification: hostname extraction, bot/internal-render
//! detection, and the strategy × classification serving-decision matrix
//! (§4.2).

use hyper::HeaderMap;

use crate::config::Strategy;

pub const INTERNAL_HEADER: &str = "x-renderx-internal";
pub const RENDERX_USER_AGENT_MARKER: &str = "renderx";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServingDecision {
    Static,
    Render,
}

/// Extract the requesting hostname: `Origin` header (parsed as a URL) wins,
/// falling back to `Host` with the port stripped.
#[must_use]
pub fn extract_hostname(headers: &HeaderMap) -> Option<String> {
    if let Some(origin) = header_str(headers, "origin") {
        if let Ok(url) = url::Url::parse(origin) {
            if let Some(host) = url.host_str() {
                return Some(host.to_string());
            }
        }
        return None;
    }
    header_str(headers, "host").map(|h| h.split(':').next().unwrap_or(h).to_string())
}

#[must_use]
pub fn is_internal_render(headers: &HeaderMap) -> bool {
    header_str(headers, INTERNAL_HEADER)
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

#[must_use]
pub fn is_renderx_request(headers: &HeaderMap) -> bool {
    header_str(headers, "user-agent")
        .is_some_and(|ua| ua.to_ascii_lowercase().contains(RENDERX_USER_AGENT_MARKER))
}

#[must_use]
pub fn is_file_request(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .is_some_and(|segment| segment.rsplit_once('.').is_some_and(|(_, ext)| !ext.is_empty()))
}

#[must_use]
pub fn is_bot(headers: &HeaderMap, bots: &[String]) -> bool {
    let Some(ua) = header_str(headers, "user-agent") else {
        return false;
    };
    let ua_lower = ua.to_ascii_lowercase();
    bots.iter().any(|b| ua_lower.contains(&b.to_ascii_lowercase()))
}

/// §4.2 serving-decision table.
#[must_use]
pub fn decide(
    strategy: Strategy,
    is_internal_or_file_or_renderx: bool,
    bot: bool,
) -> ServingDecision {
    if is_internal_or_file_or_renderx {
        return ServingDecision::Static;
    }
    match strategy {
        Strategy::Csr => ServingDecision::Static,
        Strategy::Ssr => ServingDecision::Render,
        Strategy::SmartSsr => {
            if bot {
                ServingDecision::Render
            } else {
                ServingDecision::Static
            }
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::{HeaderName, HeaderValue};

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

    #[test]
    fn hostname_from_origin_preferred_over_host() {
        let h = headers(&[("origin", "https://app.example"), ("host", "other.example")]);
        assert_eq!(extract_hostname(&h).as_deref(), Some("app.example"));
    }

    #[test]
    fn hostname_falls_back_to_host_and_strips_port() {
        let h = headers(&[("host", "app.example:8080")]);
        assert_eq!(extract_hostname(&h).as_deref(), Some("app.example"));
    }

    #[test]
    fn renderx_user_agent_is_never_rendered() {
        let h = headers(&[("user-agent", "RenderX/1.0")]);
        assert!(is_renderx_request(&h));
    }

    #[test]
    fn internal_header_is_case_insensitive() {
        let h = headers(&[(INTERNAL_HEADER, "TRUE")]);
        assert!(is_internal_render(&h));
    }

    #[test]
    fn bot_matches_substring_case_insensitively() {
        let h = headers(&[("user-agent", "Mozilla/5.0 (compatible; Googlebot/2.1)")]);
        assert!(is_bot(&h, &["Googlebot".to_string()]));
    }

    #[test]
    fn decision_matrix_smart_ssr() {
        assert_eq!(decide(Strategy::SmartSsr, false, true), ServingDecision::Render);
        assert_eq!(decide(Strategy::SmartSsr, false, false), ServingDecision::Static);
        assert_eq!(decide(Strategy::SmartSsr, true, true), ServingDecision::Static);
    }

    #[test]
    fn decision_matrix_csr_always_static() {
        assert_eq!(decide(Strategy::Csr, false, true), ServingDecision::Static);
        assert_eq!(decide(Strategy::Csr, false, false), ServingDecision::Static);
    }

    #[test]
    fn decision_matrix_ssr_always_renders_unless_excluded() {
        assert_eq!(decide(Strategy::Ssr, false, false), ServingDecision::Render);
        assert_eq!(decide(Strategy::Ssr, true, false), ServingDecision::Static);
    }
}
