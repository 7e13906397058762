//! Multi-stage readiness protocol (§4.4). Each step is given a remaining
//! budget `R = max(1000, timeout_ms - elapsed)`; only the initial
//! navigation's timeout is fatal, every later step degrades gracefully.

use std::time::{Duration, Instant};

use headless_chrome::Tab;

use crate::error::RenderError;

const FALLBACK_SELECTORS: &[&str] = &["#app", "[data-reactroot]", "body > *"];
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct ReadinessBudget {
    started: Instant,
    timeout_ms: u64,
}

impl ReadinessBudget {
    #[must_use]
    pub fn start(timeout_ms: u64) -> Self {
        Self {
            started: Instant::now(),
            timeout_ms,
        }
    }

    fn remaining_ms(&self) -> u64 {
        let elapsed = self.started.elapsed().as_millis() as u64;
        (self.timeout_ms.saturating_sub(elapsed)).max(1000)
    }
}

/// Drives steps 1-5 of the readiness protocol against an already-navigated
/// tab. Step 1 (navigation) is performed by the caller, since it needs the
/// target URL and headers; this function covers steps 2-5.
pub fn wait_for_readiness(tab: &Tab, root_selector: &str, budget: &ReadinessBudget) {
    wait_network_idle(tab, Duration::from_millis(budget.remaining_ms().min(15_000)));

    let root_wait = Duration::from_millis(budget.remaining_ms().max(15_000));
    let selectors: Vec<&str> = std::iter::once(root_selector)
        .chain(FALLBACK_SELECTORS.iter().copied())
        .collect();
    let matched = wait_for_hydration(tab, &selectors, root_wait);

    if !matched {
        poll_for_content(tab, root_selector, Duration::from_millis(budget.remaining_ms().max(10_000)));
    }

    wait_network_idle(tab, Duration::from_millis(budget.remaining_ms().min(10_000)));
}

/// `headless_chrome` has no native network-idle wait; approximate it by
/// polling `performance`'s in-flight resource count until it settles or the
/// budget runs out.
fn wait_network_idle(tab: &Tab, budget: Duration) {
    let deadline = Instant::now() + budget;
    let mut idle_polls = 0;
    while Instant::now() < deadline && idle_polls < 3 {
        let pending = tab
            .evaluate(
                "performance.getEntriesByType('resource').filter(r => !r.responseEnd).length",
                false,
            )
            .ok()
            .and_then(|v| v.value)
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        if pending == 0 {
            idle_polls += 1;
        } else {
            idle_polls = 0;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Step 3: wait for a candidate mount point to reach attached state — not
/// merely present in the pre-hydration markup, but carrying a non-empty
/// first child or text content. Polls each selector in priority order every
/// tick since `wait_for_element_with_custom_timeout` only checks presence.
fn wait_for_hydration(tab: &Tab, selectors: &[&str], budget: Duration) -> bool {
    let deadline = Instant::now() + budget;
    let script = format!(
        "(() => {{ const sels = {selectors:?}; for (const s of sels) {{ \
         const el = document.querySelector(s); \
         if (el && (el.children.length > 0 || el.textContent.trim().length > 0)) return true; \
         }} return false; }})()"
    );
    while Instant::now() < deadline {
        let hydrated = tab
            .evaluate(&script, false)
            .ok()
            .and_then(|v| v.value)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if hydrated {
            return true;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    false
}

fn poll_for_content(tab: &Tab, root_selector: &str, budget: Duration) {
    let deadline = Instant::now() + budget;
    while Instant::now() < deadline {
        let has_text = tab
            .evaluate(
                &format!(
                    "(() => {{ const el = document.querySelector({root_selector:?}); return el && el.textContent.trim().length > 0; }})()"
                ),
                false,
            )
            .ok()
            .and_then(|v| v.value)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if has_text {
            return;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Step 1: navigate and wait for `load`. Only caller of this step treats a
/// failure as fatal (§4.4).
pub fn navigate(tab: &Tab, url: &str, timeout_ms: u64) -> Result<(), RenderError> {
    tab.set_default_timeout(Duration::from_millis(timeout_ms));
    tab.navigate_to(url)
        .map_err(|e| RenderError::NavigationFailed(e.to_string()))?;
    tab.wait_until_navigated()
        .map_err(|e| RenderError::NavigationFailed(e.to_string()))?;
    Ok(())
}
