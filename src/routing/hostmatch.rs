//! Hostname to `HostConfig` resolution.
//!
//! Matching priority: exact match among active hosts wins; otherwise the
//! first active host whose glob pattern matches wins. `*` in a pattern
//! matches any run of characters; every other regex metacharacter is
//! escaped, and the compiled pattern is anchored.

use regex::Regex;

use crate::config::HostConfig;

/// Resolve the matching active host config for a hostname (port stripped).
#[must_use]
pub fn resolve_host<'a>(hostname: &str, hosts: &'a [HostConfig]) -> Option<&'a HostConfig> {
    let hostname = hostname.split(':').next().unwrap_or(hostname);

    hosts
        .iter()
        .find(|h| h.active && h.host == hostname)
        .or_else(|| {
            hosts
                .iter()
                .find(|h| h.active && glob_matches(&h.host, hostname))
        })
}

/// Whether a single glob pattern matches a hostname.
#[must_use]
pub fn glob_matches(pattern: &str, hostname: &str) -> bool {
    let hostname = hostname.split(':').next().unwrap_or(hostname);
    build_glob_regex(pattern).is_match(hostname)
}

fn build_glob_regex(pattern: &str) -> Regex {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    let body = escaped.join(".*");
    Regex::new(&format!("^{body}$")).unwrap_or_else(|_| Regex::new("^$").expect("empty regex is valid"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(source: &str, pattern: &str) -> HostConfig {
        HostConfig {
            source: source.to_string(),
            host: pattern.to_string(),
            active: true,
            timeout_ms: None,
            parallel_renders: None,
            bots: None,
            strategy: None,
            root_selector: None,
            optimizer_options: None,
        }
    }

    #[test]
    fn exact_match_wins_over_glob() {
        let hosts = vec![host("wild", "*.example.com"), host("exact", "app.example.com")];
        let resolved = resolve_host("app.example.com", &hosts).unwrap();
        assert_eq!(resolved.source, "exact");
    }

    #[test]
    fn glob_matches_subdomain() {
        let hosts = vec![host("wild", "*.example.com")];
        let resolved = resolve_host("api.example.com", &hosts).unwrap();
        assert_eq!(resolved.source, "wild");
    }

    #[test]
    fn glob_is_anchored() {
        assert!(!glob_matches("*.example.com", "evilexample.com.attacker.net"));
        assert!(glob_matches("*.example.com", "foo.example.com"));
    }

    #[test]
    fn inactive_host_never_matches() {
        let mut h = host("x", "app.example.com");
        h.active = false;
        assert!(resolve_host("app.example.com", &[h]).is_none());
    }

    #[test]
    fn no_match_returns_none() {
        let hosts = vec![host("exact", "app.example.com")];
        assert!(resolve_host("other.tld", &hosts).is_none());
    }
}
