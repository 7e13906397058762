use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::error::ConfigError;

/// Serving strategy: when does a matching request get rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Csr,
    Ssr,
    SmartSsr,
}

impl Default for Strategy {
    fn default() -> Self {
        Self::SmartSsr
    }
}

/// `none` silences access logging entirely, `ssr` logs only render-path
/// requests, `all` logs every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None,
    Ssr,
    All,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Ssr
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OptimizerOptions {
    #[serde(default = "default_true")]
    pub remove_data_attributes: bool,
    #[serde(default = "default_true")]
    pub remove_aria_attributes: bool,
    #[serde(default = "default_true")]
    pub remove_style_attributes: bool,
    #[serde(default = "default_true")]
    pub remove_inline_styles: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            remove_data_attributes: true,
            remove_aria_attributes: true,
            remove_style_attributes: true,
            remove_inline_styles: true,
        }
    }
}

/// Per-SPA deployment. Every field but `source` and `host` is optional and,
/// when absent, falls back to the global default (§4.1).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    pub source: String,
    pub host: String,
    #[serde(default = "default_true")]
    pub active: bool,
    pub timeout_ms: Option<u64>,
    pub parallel_renders: Option<usize>,
    pub bots: Option<Vec<String>>,
    pub strategy: Option<Strategy>,
    pub root_selector: Option<String>,
    pub optimizer_options: Option<OptimizerOptions>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_parallel_renders")]
    pub parallel_renders: usize,
    #[serde(default = "default_bots")]
    pub bots: Vec<String>,
    #[serde(default = "default_cleanup_interval")]
    pub cache_cleanup_interval_minutes: u64,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
    #[serde(default)]
    pub logs: LogLevel,
    /// Access log format: `combined`, `common`, `json`, or a custom
    /// `$variable` pattern (`logger::format::AccessLogEntry::format`).
    #[serde(default = "default_access_log_format")]
    pub access_log_format: String,
    #[serde(default = "default_true")]
    pub clear_cache_on_startup: bool,
    #[serde(default = "default_root_selector")]
    pub root_selector: String,
    #[serde(default)]
    pub optimizer_options: OptimizerOptions,
    #[serde(default = "default_hosts_root")]
    pub hosts_root: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
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

/// The default bot allow-list (§6).
pub fn default_bots() -> Vec<String> {
    [
        "Googlebot",
        "bingbot",
        "Slurp",
        "DuckDuckBot",
        "Baiduspider",
        "YandexBot",
        "Applebot",
        "facebookexternalhit",
        "Twitterbot",
        "LinkedInBot",
        "Pinterestbot",
        "Slack",
        "WhatsApp",
        "TelegramBot",
        "vkShare",
        "GPTBot",
        "ChatGPT-User",
        "Google-Extended",
        "ClaudeBot",
        "Claude-Web",
        "GrokBot",
        "meta-externalagent",
        "meta-externalfetcher",
        "PerplexityBot",
        "Amazonbot",
        "CCBot",
        "ia_archiver",
        "YouBot",
        "Neevabot",
        "headlessbot",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            parallel_renders: default_parallel_renders(),
            bots: default_bots(),
            cache_cleanup_interval_minutes: default_cleanup_interval(),
            strategy: Strategy::default(),
            hosts: Vec::new(),
            logs: LogLevel::default(),
            access_log_format: default_access_log_format(),
            clear_cache_on_startup: true,
            root_selector: default_root_selector(),
            optimizer_options: OptimizerOptions::default(),
            hosts_root: default_hosts_root(),
            cache_dir: default_cache_dir(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl GlobalConfig {
    pub fn get_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("0.0.0.0:{}", self.port)
            .parse()
            .map_err(|_| ConfigError::InvalidAddr(format!("0.0.0.0:{}", self.port)))
    }
}

/// Fully resolved, per-request configuration: host override else global else
/// default, composed once per `effective(hostname)` call (§3/§4.1).
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub source: String,
    pub timeout_ms: u64,
    pub parallel_renders: usize,
    pub bots: Vec<String>,
    pub strategy: Strategy,
    pub root_selector: String,
    pub optimizer_options: OptimizerOptions,
    pub cache_ttl_seconds: u64,
}

impl EffectiveConfig {
    #[must_use]
    pub const fn bot_only(&self) -> bool {
        matches!(self.strategy, Strategy::SmartSsr | Strategy::Csr)
    }
}
