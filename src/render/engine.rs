//! Render engine: owns the single shared browser process, admits bounded
//! concurrent renders, and drives a per-request isolated browser context
//! through the readiness protocol (§4.4).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::{EffectiveConfig, Strategy};
use crate::error::RenderError;
use crate::logger;

use super::optimizer::optimize;
use super::readiness::{navigate, wait_for_readiness, ReadinessBudget};

const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RenderRequest {
    pub url: String,
    pub user_agent: String,
    pub origin: Option<String>,
    pub config: EffectiveConfig,
}

/// The rendering backend as seen by the router: lets tests substitute a
/// stub that never touches a real browser (§9).
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, req: RenderRequest) -> Result<String, RenderError>;
    fn is_available(&self) -> bool;
    fn active_requests(&self) -> usize;
}

/// Single shared browser process behind a lazy single-flight launch latch;
/// a disconnect (manifesting as a failure to open a new context/tab) clears
/// the latch so the next render re-launches rather than failing forever.
pub struct RenderEngine {
    browser: Mutex<Option<Browser>>,
    active: AtomicUsize,
}

impl RenderEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            browser: Mutex::new(None),
            active: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn active_requests(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.browser.try_lock().map(|g| g.is_some()).unwrap_or(false)
    }

    async fn browser(&self) -> Result<Browser, RenderError> {
        let mut guard = self.browser.lock().await;
        if let Some(browser) = guard.as_ref() {
            return Ok(browser.clone());
        }
        let browser = tokio::task::spawn_blocking(|| Browser::new(LaunchOptions::default()))
            .await
            .map_err(|e| RenderError::LaunchFailed(e.to_string()))?
            .map_err(|e| RenderError::LaunchFailed(e.to_string()))?;
        *guard = Some(browser.clone());
        Ok(browser)
    }

    /// Clears the launch latch so the next call to `browser()` re-launches
    /// a fresh Chrome process.
    async fn reset_browser(&self) {
        *self.browser.lock().await = None;
    }

    /// Admits, renders, and releases the admission slot exactly once
    /// regardless of outcome (§4.4). Fails fast rather than queuing when at
    /// capacity, admitting against the per-request effective ceiling so a
    /// host's `parallelRenders` override takes effect (§3).
    pub async fn render(&self, req: RenderRequest) -> Result<String, RenderError> {
        self.try_admit(req.config.parallel_renders)?;
        let result = self.render_admitted(req).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn try_admit(&self, limit: usize) -> Result<(), RenderError> {
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < limit).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| RenderError::AtCapacity)
    }

    async fn render_admitted(&self, req: RenderRequest) -> Result<String, RenderError> {
        let browser = self.browser().await?;
        let url = req.url.clone();
        let user_agent = req.user_agent.clone();
        let origin = req.origin.clone();
        let timeout_ms = req.config.timeout_ms;
        let root_selector = req.config.root_selector.clone();
        let strategy = req.config.strategy;
        let optimizer_options = req.config.optimizer_options.clone();

        let job = tokio::task::spawn_blocking(move || {
            let context = browser
                .new_context()
                .map_err(|e| RenderError::LaunchFailed(e.to_string()))?;
            let tab = context
                .new_tab()
                .map_err(|e| RenderError::LaunchFailed(e.to_string()))?;

            tab.set_user_agent(&user_agent, None, None)
                .map_err(|e| RenderError::LaunchFailed(e.to_string()))?;
            if let Some(origin) = &origin {
                let _ = tab.set_extra_http_headers(std::collections::HashMap::from([(
                    "Origin",
                    origin.as_str(),
                )]));
            }
            install_resource_filter(&tab);

            navigate(&tab, &url, timeout_ms)?;
            let budget = ReadinessBudget::start(timeout_ms);
            wait_for_readiness(&tab, &root_selector, &budget);

            let html = tab
                .get_content()
                .map_err(|e| RenderError::ExtractFailed(e.to_string()))?;

            Ok::<String, RenderError>(if strategy == Strategy::Ssr {
                html
            } else {
                optimize(&html, &optimizer_options)
            })
        });

        match timeout(Duration::from_millis(timeout_ms) + CLEANUP_TIMEOUT, job).await {
            Ok(Ok(Err(RenderError::LaunchFailed(msg)))) => {
                logger::log_warning("browser context/tab creation failed, resetting browser handle");
                self.reset_browser().await;
                Err(RenderError::LaunchFailed(msg))
            }
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(RenderError::ExtractFailed(e.to_string())),
            Err(_) => {
                logger::log_warning("render job exceeded overall timeout budget");
                Err(RenderError::NavigationFailed("timed out".to_string()))
            }
        }
    }
}

#[async_trait]
impl Renderer for RenderEngine {
    async fn render(&self, req: RenderRequest) -> Result<String, RenderError> {
        self.render(req).await
    }

    fn is_available(&self) -> bool {
        self.is_available()
    }

    fn active_requests(&self) -> usize {
        self.active_requests()
    }
}

/// Allows only document/script/xhr/fetch resources through; everything
/// else (images, fonts, stylesheets, media) is aborted. Permitted requests
/// are tagged with the loopback-recursion-prevention header.
fn install_resource_filter(tab: &headless_chrome::Tab) {
    use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
    use headless_chrome::protocol::cdp::Fetch::{ContinueRequest, FailRequest, HeaderEntry};
    use headless_chrome::protocol::cdp::Network::ResourceType;

    let _ = tab.enable_fetch(None, None);
    let _ = tab.intercept_request(std::sync::Arc::new(
        move |transport, session_id, event: RequestPausedEvent| {
            let allowed = matches!(
                event.params.resource_type,
                ResourceType::Document | ResourceType::Script | ResourceType::XHR | ResourceType::Fetch
            );
            if allowed {
                let mut headers: Vec<HeaderEntry> = event
                    .params
                    .request
                    .headers
                    .0
                    .iter()
                    .map(|(k, v)| HeaderEntry {
                        name: k.clone(),
                        value: v.to_string(),
                    })
                    .collect();
                headers.push(HeaderEntry {
                    name: "X-RenderX-Internal".to_string(),
                    value: "true".to_string(),
                });
                let _ = transport.call_method_on_target(
                    session_id,
                    ContinueRequest {
                        request_id: event.params.request_id,
                        headers: Some(headers),
                        ..Default::default()
                    },
                );
            } else {
                let _ = transport.call_method_on_target(
                    session_id,
                    FailRequest {
                        request_id: event.params.request_id,
                        error_reason: "BlockedByClient".to_string(),
                    },
                );
            }
        },
    ));
}
