//! Browser session used by the scraping jobs.
//!
//! Everything the jobs need from a page goes through [`PageDriver`], so the
//! pagination loop, the scroller and the carousel walker can run against a
//! scripted page in tests. [`ChromeSession`] implements it over the Chrome
//! DevTools Protocol with chromiumoxide.

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Element, Page};
use dashmap::DashMap;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::BrowserSettings;
use crate::models::{BrowserCookie, CommentNode, LinkCard, WindowMetrics};

/// How often bounded waits re-query the DOM.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Hides the most obvious automation markers before any page script runs.
const STEALTH_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined, configurable: true });
    window.chrome = window.chrome || { runtime: {} };
    Object.defineProperty(navigator, 'languages', { get: () => ['zh-CN', 'zh', 'en'], configurable: true });
"#;

/// Scrolls a located element to its full extent. Throws when the node has
/// been detached so the caller can tell a stale handle from a missing one.
const ELEMENT_SCROLL_FN: &str = r#"
    function() {
        if (!this.isConnected) { throw new Error('stale element'); }
        this.scrollTop = this.scrollHeight;
        return this.scrollHeight;
    }
"#;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),
    #[error("DevTools protocol error: {0}")]
    Cdp(#[from] CdpError),
    #[error("Element not found: {0}")]
    ElementNotFound(String),
    #[error("Element went stale: {0}")]
    StaleElement(String),
    #[error("Timed out after {waited:?} waiting for '{selector}'")]
    Timeout { selector: String, waited: Duration },
    #[error("Script returned unexpected data: {0}")]
    Script(String),
}

/// The page operations the scrapers rely on.
///
/// Selector-based on purpose: element handles never cross this boundary,
/// except for the one element a scroller has located.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;

    /// Wait until `selector` matches, polling up to `timeout`.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Like `wait_for`, but keeps a handle to the element for `scroll_located_to_end`.
    async fn locate(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Scroll the located element to its end, returning its new scroll height.
    async fn scroll_located_to_end(&self, selector: &str) -> Result<u64, BrowserError>;

    async fn scroll_window_by(&self, pixels: i64) -> Result<WindowMetrics, BrowserError>;

    /// Keyboard fallback for window scrolling.
    async fn page_down(&self) -> Result<WindowMetrics, BrowserError>;

    async fn scroll_into_view(&self, selector: &str) -> Result<(), BrowserError>;

    /// `attribute` of every element matching `selector` (resolved property when available).
    async fn attribute_values(
        &self,
        selector: &str,
        attribute: &str,
    ) -> Result<Vec<Option<String>>, BrowserError>;

    async fn link_cards(&self, selector: &str) -> Result<Vec<LinkCard>, BrowserError>;

    async fn comment_nodes(
        &self,
        item_selector: &str,
        content_selector: &str,
    ) -> Result<Vec<CommentNode>, BrowserError>;

    /// `class` attribute of the first match, `None` when nothing matches.
    async fn class_attribute(&self, selector: &str) -> Result<Option<String>, BrowserError>;

    /// Scripted click on the first match.
    async fn click(&self, selector: &str) -> Result<(), BrowserError>;

    /// Input-event click on the first match.
    async fn native_click(&self, selector: &str) -> Result<(), BrowserError>;

    /// Type `text` into the first match and press Enter.
    async fn submit_text(&self, selector: &str, text: &str) -> Result<(), BrowserError>;

    async fn cookies(&self) -> Result<Vec<BrowserCookie>, BrowserError>;

    async fn user_agent(&self) -> Result<String, BrowserError>;

    async fn current_url(&self) -> Result<Option<String>, BrowserError>;
}

/// Quote a value as a JavaScript string literal.
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

pub struct ChromeSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    located: DashMap<String, Arc<Element>>,
    remote: bool,
}

impl ChromeSession {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        r"C:\Program Files\Google\Chrome\Application\chrome.exe",
        r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    ];

    fn find_chrome(configured: Option<&PathBuf>) -> Result<PathBuf, BrowserError> {
        if let Some(path) = configured {
            return Ok(path.clone());
        }
        Self::CHROME_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
            .ok_or_else(|| {
                BrowserError::Launch(
                    "Chrome/Chromium not found; install it or pass --chrome-executable"
                        .to_string(),
                )
            })
    }

    /// Launch (or connect to) a browser and open the working page.
    pub async fn start(settings: &BrowserSettings) -> Result<Self, BrowserError> {
        let (browser, mut handler, remote) = match settings.remote_browser_url.as_deref() {
            Some(url) => {
                let ws_url = Self::resolve_ws_url(url).await?;
                info!("Connecting to remote browser at {}", ws_url);
                let (browser, handler) = Browser::connect(ws_url).await?;
                (browser, handler, true)
            }
            None => {
                let chrome = Self::find_chrome(settings.chrome_executable.as_ref())?;
                info!(
                    "Launching browser {} (headless={})",
                    chrome.display(),
                    settings.headless
                );

                let mut builder = BrowserConfig::builder().chrome_executable(chrome);
                if !settings.headless {
                    builder = builder.with_head();
                }
                if let Some(dir) = &settings.chrome_user_data_dir {
                    builder = builder
                        .user_data_dir(dir)
                        .arg(format!("--profile-directory={}", settings.chrome_profile));
                }
                builder = builder
                    .arg("--start-maximized")
                    .arg("--no-sandbox")
                    .arg("--disable-dev-shm-usage")
                    .arg("--disable-gpu")
                    .arg("--no-first-run")
                    .arg("--no-default-browser-check")
                    .arg("--disable-blink-features=AutomationControlled");

                let config = builder.build().map_err(BrowserError::Launch)?;
                let (browser, handler) = Browser::launch(config).await?;
                (browser, handler, false)
            }
        };

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler stopped: {}", e);
                    break;
                }
            }
        });

        let page = browser.new_page("about:blank").await?;
        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            STEALTH_SCRIPT.to_string(),
        ))
        .await?;

        info!("Browser session ready.");
        Ok(Self {
            browser,
            page,
            handler_task,
            located: DashMap::new(),
            remote,
        })
    }

    /// Accept either a ws:// debugger URL or an http(s) debugging endpoint.
    async fn resolve_ws_url(url: &str) -> Result<String, BrowserError> {
        if url.starts_with("ws://") || url.starts_with("wss://") {
            return Ok(url.to_string());
        }
        let version_url = format!("{}/json/version", url.trim_end_matches('/'));
        let info: serde_json::Value = reqwest::get(&version_url)
            .await
            .map_err(|e| BrowserError::Launch(format!("{}: {}", version_url, e)))?
            .json()
            .await
            .map_err(|e| BrowserError::Launch(format!("{}: {}", version_url, e)))?;
        info.get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                BrowserError::Launch(format!("no webSocketDebuggerUrl at {}", version_url))
            })
    }

    /// Close the page, and the browser too unless it was a remote one.
    pub async fn close(mut self) {
        self.located.clear();
        if self.remote {
            if let Err(e) = self.page.close().await {
                warn!("Error closing page: {}", e);
            }
        } else {
            if let Err(e) = self.browser.close().await {
                warn!("Error closing browser: {}", e);
            }
            let _ = self.browser.wait().await;
        }
        self.handler_task.abort();
        info!("Browser closed.");
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T, BrowserError> {
        let result = self.page.evaluate(script).await?;
        result
            .into_value::<T>()
            .map_err(|e| BrowserError::Script(e.to_string()))
    }

    async fn poll_element(&self, selector: &str, timeout: Duration) -> Result<Element, BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(element) = self.page.find_element(selector).await {
                return Ok(element);
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout {
                    selector: selector.to_string(),
                    waited: timeout,
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn window_metrics(&self) -> Result<WindowMetrics, BrowserError> {
        self.eval(
            "({ scroll_height: document.body.scrollHeight, offset: Math.round(window.pageYOffset) })"
                .to_string(),
        )
        .await
    }
}

#[async_trait]
impl PageDriver for ChromeSession {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        debug!("Navigating to {}", url);
        self.located.clear();
        self.page.goto(url).await?;
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        self.poll_element(selector, timeout).await.map(|_| ())
    }

    async fn locate(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        let element = self.poll_element(selector, timeout).await?;
        self.located.insert(selector.to_string(), Arc::new(element));
        Ok(())
    }

    async fn scroll_located_to_end(&self, selector: &str) -> Result<u64, BrowserError> {
        let element = self
            .located
            .get(selector)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BrowserError::ElementNotFound(selector.to_string()))?;

        let returns = match element.call_js_fn(ELEMENT_SCROLL_FN, false).await {
            Ok(returns) => returns,
            Err(e) => {
                self.located.remove(selector);
                return Err(BrowserError::StaleElement(format!("{}: {}", selector, e)));
            }
        };
        if returns.exception_details.is_some() {
            self.located.remove(selector);
            return Err(BrowserError::StaleElement(selector.to_string()));
        }
        returns
            .result
            .value
            .and_then(|v| v.as_f64())
            .map(|h| h.max(0.0) as u64)
            .ok_or_else(|| BrowserError::Script(format!("no scrollHeight for {}", selector)))
    }

    async fn scroll_window_by(&self, pixels: i64) -> Result<WindowMetrics, BrowserError> {
        self.eval(format!(
            "(() => {{ window.scrollBy(0, {}); return {{ scroll_height: document.body.scrollHeight, offset: Math.round(window.pageYOffset) }}; }})()",
            pixels
        ))
        .await
    }

    async fn page_down(&self) -> Result<WindowMetrics, BrowserError> {
        self.page.find_element("body").await?.press_key("PageDown").await?;
        self.window_metrics().await
    }

    async fn scroll_into_view(&self, selector: &str) -> Result<(), BrowserError> {
        let found: bool = self
            .eval(format!(
                "(() => {{ const el = document.querySelector({}); if (!el) return false; el.scrollIntoView({{block: 'center'}}); return true; }})()",
                js_string(selector)
            ))
            .await?;
        if found {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(selector.to_string()))
        }
    }

    async fn attribute_values(
        &self,
        selector: &str,
        attribute: &str,
    ) -> Result<Vec<Option<String>>, BrowserError> {
        self.eval(format!(
            "Array.from(document.querySelectorAll({sel})).map(el => {{ const v = el[{attr}]; return typeof v === 'string' ? v : el.getAttribute({attr}); }})",
            sel = js_string(selector),
            attr = js_string(attribute)
        ))
        .await
    }

    async fn link_cards(&self, selector: &str) -> Result<Vec<LinkCard>, BrowserError> {
        self.eval(format!(
            "Array.from(document.querySelectorAll({})).map(a => {{ const img = a.querySelector('img'); return {{ href: a.href || a.getAttribute('href'), image_src: img ? (img.src || img.getAttribute('src')) : null }}; }})",
            js_string(selector)
        ))
        .await
    }

    async fn comment_nodes(
        &self,
        item_selector: &str,
        content_selector: &str,
    ) -> Result<Vec<CommentNode>, BrowserError> {
        self.eval(format!(
            "Array.from(document.querySelectorAll({item})).map(el => {{ const c = el.querySelector({content}); return {{ id: el.id || null, text: c ? c.innerText : null }}; }})",
            item = js_string(item_selector),
            content = js_string(content_selector)
        ))
        .await
    }

    async fn class_attribute(&self, selector: &str) -> Result<Option<String>, BrowserError> {
        self.eval(format!(
            "(() => {{ const el = document.querySelector({}); return el ? (el.getAttribute('class') || '') : null; }})()",
            js_string(selector)
        ))
        .await
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let clicked: bool = self
            .eval(format!(
                "(() => {{ const el = document.querySelector({}); if (!el) return false; el.click(); return true; }})()",
                js_string(selector)
            ))
            .await?;
        if clicked {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(selector.to_string()))
        }
    }

    async fn native_click(&self, selector: &str) -> Result<(), BrowserError> {
        self.page.find_element(selector).await?.click().await?;
        Ok(())
    }

    async fn submit_text(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        // Clear whatever the page pre-filled before typing
        let _: bool = self
            .eval(format!(
                "(() => {{ const el = document.querySelector({}); if (!el) return false; el.value = ''; return true; }})()",
                js_string(selector)
            ))
            .await?;
        self.page
            .find_element(selector)
            .await?
            .click()
            .await?
            .type_str(text)
            .await?
            .press_key("Enter")
            .await?;
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>, BrowserError> {
        let cookies = self.page.get_cookies().await?;
        Ok(cookies
            .into_iter()
            .map(|c| BrowserCookie {
                name: c.name,
                value: c.value,
            })
            .collect())
    }

    async fn user_agent(&self) -> Result<String, BrowserError> {
        self.eval("navigator.userAgent".to_string()).await
    }

    async fn current_url(&self) -> Result<Option<String>, BrowserError> {
        Ok(self.page.url().await?)
    }
}
