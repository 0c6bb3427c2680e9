use crate::browser::{BrowserError, PageDriver};
use crate::models::WindowMetrics;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Where scroll commands go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrollMode {
    /// A scrollable container, addressed by CSS selector.
    Element(String),
    /// The whole window.
    Window,
}

/// What one scroll step achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollOutcome {
    Advanced,
    /// Neither the scroll extent nor the offset moved.
    Unchanged,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ScrollSettings {
    /// Pixels per window step.
    pub increment: i64,
    /// Bounded wait for the container when the scroller is created.
    pub element_wait: Duration,
    /// Bounded wait when re-locating a stale container.
    pub relocate_wait: Duration,
}

impl Default for ScrollSettings {
    fn default() -> Self {
        Self {
            increment: 1000,
            element_wait: Duration::from_secs(10),
            relocate_wait: Duration::from_secs(5),
        }
    }
}

/// Issues scroll steps, degrading from element to window scrolling.
///
/// Once in window mode it stays there for the rest of the session.
#[derive(Debug)]
pub struct Scroller {
    mode: ScrollMode,
    settings: ScrollSettings,
    last_element_height: Option<u64>,
    last_window: Option<WindowMetrics>,
}

impl Scroller {
    pub fn window(settings: ScrollSettings) -> Self {
        Self {
            mode: ScrollMode::Window,
            settings,
            last_element_height: None,
            last_window: None,
        }
    }

    /// Target `selector`, or the window if it does not show up within the element wait.
    pub async fn for_element(page: &dyn PageDriver, selector: &str, settings: ScrollSettings) -> Self {
        let mut scroller = Self::window(settings);
        match page.locate(selector, scroller.settings.element_wait).await {
            Ok(()) => {
                info!("Found scrollable element '{}'", selector);
                scroller.mode = ScrollMode::Element(selector.to_string());
            }
            Err(e) => {
                warn!(
                    "Scrollable element '{}' not found ({}), falling back to window scrolling",
                    selector, e
                );
            }
        }
        scroller
    }

    #[cfg(test)]
    pub fn mode(&self) -> &ScrollMode {
        &self.mode
    }

    /// Perform one scroll step. Never fails; problems degrade the outcome.
    pub async fn advance(&mut self, page: &dyn PageDriver) -> ScrollOutcome {
        let selector = match &self.mode {
            ScrollMode::Element(selector) => selector.clone(),
            ScrollMode::Window => return self.window_step(page).await,
        };

        match page.scroll_located_to_end(&selector).await {
            Ok(height) => self.element_outcome(height),
            Err(BrowserError::StaleElement(detail)) => {
                warn!("Scrollable element went stale ({}), re-locating '{}'", detail, selector);
                if let Err(e) = page.locate(&selector, self.settings.relocate_wait).await {
                    error!("Could not re-locate '{}': {}", selector, e);
                    return self.fall_back_to_window(page).await;
                }
                match page.scroll_located_to_end(&selector).await {
                    Ok(height) => self.element_outcome(height),
                    Err(e) => {
                        error!("Re-located element '{}' still failed to scroll: {}", selector, e);
                        self.fall_back_to_window(page).await
                    }
                }
            }
            Err(e) => {
                error!("Error scrolling element '{}': {}", selector, e);
                self.fall_back_to_window(page).await
            }
        }
    }

    fn element_outcome(&mut self, height: u64) -> ScrollOutcome {
        let outcome = if self.last_element_height == Some(height) {
            ScrollOutcome::Unchanged
        } else {
            ScrollOutcome::Advanced
        };
        debug!("Element scrolled to height {} ({:?})", height, outcome);
        self.last_element_height = Some(height);
        outcome
    }

    async fn fall_back_to_window(&mut self, page: &dyn PageDriver) -> ScrollOutcome {
        warn!("Element scrolling failed, switching to window scrolling");
        self.mode = ScrollMode::Window;
        self.window_step(page).await
    }

    async fn window_step(&mut self, page: &dyn PageDriver) -> ScrollOutcome {
        let metrics = match page.scroll_window_by(self.settings.increment).await {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!("Scripted window scroll failed ({}), trying PageDown", e);
                match page.page_down().await {
                    Ok(metrics) => metrics,
                    Err(key_err) => {
                        error!("PageDown fallback failed: {}", key_err);
                        return ScrollOutcome::Failed;
                    }
                }
            }
        };

        let outcome = if self.last_window == Some(metrics) {
            ScrollOutcome::Unchanged
        } else {
            ScrollOutcome::Advanced
        };
        debug!(
            "Window at offset {} of {} ({:?})",
            metrics.offset, metrics.scroll_height, outcome
        );
        self.last_window = Some(metrics);
        outcome
    }
}
