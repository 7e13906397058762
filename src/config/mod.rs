//! Configuration module entry point.
//!
//! Loads the static JSON document, layers the recognized environment
//! variables on top, and composes per-request `EffectiveConfig` values.

mod state;
mod types;

pub use state::AppState;
pub use types::{EffectiveConfig, GlobalConfig, HostConfig, LogLevel, OptimizerOptions, Strategy};

use crate::error::ConfigError;

impl GlobalConfig {
    /// Load configuration from `./config.json` (if present), then apply the
    /// recognized environment variable overrides, then fill defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .set_default("port", default_port())?
            .set_default("parallel_renders", default_parallel_renders())?
            .set_default("cache_cleanup_interval_minutes", default_cleanup_interval())?
            .set_default("access_log_format", default_access_log_format())?
            .set_default("clear_cache_on_startup", true)?
            .set_default("root_selector", default_root_selector())?
            .set_default("hosts_root", default_hosts_root())?
            .set_default("cache_dir", default_cache_dir())?
            .set_default("timeout_ms", default_timeout_ms())?
            .build()?;

        let mut cfg: Self = settings.try_deserialize()?;
        if cfg.bots.is_empty() {
            cfg.bots = default_bots();
        }
        apply_env_overrides(&mut cfg)?;
        Ok(cfg)
    }

    /// Compose the effective, per-request configuration for a resolved
    /// host config (or `None` when no host matched and global defaults
    /// apply, e.g. the loopback fallback path).
    #[must_use]
    pub fn effective(&self, host: Option<&HostConfig>) -> EffectiveConfig {
        let timeout_ms = host.and_then(|h| h.timeout_ms).unwrap_or(self.timeout_ms);
        let parallel_renders = host
            .and_then(|h| h.parallel_renders)
            .unwrap_or(self.parallel_renders);
        let bots = host
            .and_then(|h| h.bots.clone())
            .unwrap_or_else(|| self.bots.clone());
        let strategy = host.and_then(|h| h.strategy).unwrap_or(self.strategy);
        let root_selector = host
            .and_then(|h| h.root_selector.clone())
            .unwrap_or_else(|| self.root_selector.clone());
        let optimizer_options = host
            .and_then(|h| h.optimizer_options.clone())
            .unwrap_or_else(|| self.optimizer_options.clone());
        let source = host.map_or_else(String::new, |h| h.source.clone());

        EffectiveConfig {
            source,
            timeout_ms,
            parallel_renders,
            bots,
            strategy,
            root_selector,
            optimizer_options,
            cache_ttl_seconds: self.cache_cleanup_interval_minutes * 60,
        }
    }
}

fn apply_env_overrides(cfg: &mut GlobalConfig) -> Result<(), ConfigError> {
    if let Ok(v) = std::env::var("PORT") {
        cfg.port = parse_env("PORT", &v)?;
    }
    if let Ok(v) = std::env::var("MAX_CONCURRENCY") {
        cfg.parallel_renders = parse_env("MAX_CONCURRENCY", &v)?;
    }
    if let Ok(v) = std::env::var("CACHE_CLEANUP_INTERVAL") {
        cfg.cache_cleanup_interval_minutes = parse_env("CACHE_CLEANUP_INTERVAL", &v)?;
    }
    if let Ok(v) = std::env::var("STRATEGY") {
        cfg.strategy = match v.as_str() {
            "csr" => Strategy::Csr,
            "ssr" => Strategy::Ssr,
            "smart-ssr" => Strategy::SmartSsr,
            other => {
                return Err(ConfigError::BadEnvOverride {
                    name: "STRATEGY",
                    reason: format!("unknown strategy {other:?}"),
                })
            }
        };
    }
    if let Ok(v) = std::env::var("LOGS") {
        cfg.logs = match v.as_str() {
            "none" => LogLevel::None,
            "ssr" => LogLevel::Ssr,
            "all" => LogLevel::All,
            other => {
                return Err(ConfigError::BadEnvOverride {
                    name: "LOGS",
                    reason: format!("unknown log level {other:?}"),
                })
            }
        };
    }
    if let Ok(v) = std::env::var("TIMEOUT_MS") {
        cfg.timeout_ms = parse_env("TIMEOUT_MS", &v)?;
    }
    if let Ok(v) = std::env::var("CACHE_DIR") {
        cfg.cache_dir = v;
    }
    if let Ok(v) = std::env::var("ACCESS_LOG_FORMAT") {
        cfg.access_log_format = v;
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::BadEnvOverride {
        name,
        reason: format!("{raw:?} is not valid"),
    })
}

fn default_port() -> u16 {
    3000
}
fn default_parallel_renders() -> usize {
    10
}
fn default_cleanup_interval() -> u64 {
    60
}
fn default_root_selector() -> String {
    "#root".to_string()
}
fn default_hosts_root() -> String {
    "./hosts".to_string()
}
fn default_cache_dir() -> String {
    "./.cache".to_string()
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_access_log_format() -> String {
    "combined".to_string()
}
fn default_bots() -> Vec<String> {
    types::default_bots()
}
