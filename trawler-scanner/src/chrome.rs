//! Headless Chrome page driver.
//!
//! Elements are addressed through a `data-trawler-ref` attribute stamped at
//! query time, qualified by a per-document token so that handles from a
//! previous document never resolve against the next one. All CDP calls are
//! blocking and run on the blocking pool.

use crate::driver::{DriverError, DriverResult, ElementRef, PageDriver, WaitPolicy};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptionsBuilder, Tab, protocol::cdp::Page};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

pub const REF_ATTRIBUTE: &str = "data-trawler-ref";

const POLL_INTERVAL: Duration = Duration::from_millis(100);

const PRELUDE: &str = r#"
const __doc = () => (window.__trawlerDoc = window.__trawlerDoc || Math.random().toString(36).slice(2));
const __find = (handle) => {
  const i = handle.indexOf(':');
  if (i < 0 || handle.slice(0, i) !== window.__trawlerDoc) return null;
  return document.querySelector('[data-trawler-ref="' + handle.slice(i + 1) + '"]');
};
const __snap = (el) => {
  if (!el.hasAttribute('data-trawler-ref')) {
    window.__trawlerNextRef = (window.__trawlerNextRef || 0) + 1;
    el.setAttribute('data-trawler-ref', String(window.__trawlerNextRef));
  }
  const attributes = {};
  for (const a of el.attributes) {
    if (a.name !== 'data-trawler-ref') attributes[a.name] = a.value;
  }
  if (el.tagName === 'INPUT' || el.tagName === 'TEXTAREA') attributes.value = el.value;
  return {
    handle: __doc() + ':' + el.getAttribute('data-trawler-ref'),
    tag: el.tagName.toLowerCase(),
    attributes,
    text: el.innerText || el.textContent || '',
  };
};
"#;

const DOCUMENT_STATE_SCRIPT: &str =
    "JSON.stringify({url: location.href, doc: window.__trawlerDoc || '', ready: document.readyState})";

#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub headless: bool,
    pub width: u32,
    pub height: u32,
    pub navigation_timeout: Duration,
}

impl Default for ChromeOptions {
    fn default() -> Self {
        Self {
            headless: true,
            width: 1280,
            height: 800,
            navigation_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    handle: String,
    tag: String,
    attributes: BTreeMap<String, String>,
    text: String,
}

impl From<Snapshot> for ElementRef {
    fn from(s: Snapshot) -> Self {
        ElementRef {
            handle: s.handle,
            tag: s.tag,
            attributes: s.attributes,
            text: s.text,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DocumentState {
    url: String,
    doc: String,
    ready: String,
}

#[derive(Debug, Default, Clone)]
struct Settled {
    url: String,
    doc: String,
}

pub struct ChromeDriver {
    // Keeps the browser process alive for as long as the tab is in use.
    _browser: Browser,
    tab: Arc<Tab>,
    settled: Mutex<Settled>,
}

impl ChromeDriver {
    /// Launch Chrome and open a tab. Failure here is the one error that
    /// aborts a run.
    pub async fn launch(options: ChromeOptions) -> DriverResult<Self> {
        tokio::task::spawn_blocking(move || Self::launch_blocking(&options))
            .await
            .map_err(|e| DriverError::Launch(format!("launch task failed: {}", e)))?
    }

    fn launch_blocking(options: &ChromeOptions) -> DriverResult<Self> {
        info!("Launching Chrome (headless: {})", options.headless);

        let args: Vec<String> = vec![
            format!("--window-size={},{}", options.width, options.height),
            "--no-sandbox".to_string(),
            "--disable-setuid-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
        ];
        let os_args: Vec<&OsStr> = args.iter().map(OsStr::new).collect();

        let launch_options = LaunchOptionsBuilder::default()
            .headless(options.headless)
            .args(os_args)
            .idle_browser_timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| DriverError::Launch(format!("bad launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| DriverError::Launch(format!("failed to launch browser: {}", e)))?;
        let tab = browser
            .new_tab()
            .map_err(|e| DriverError::Launch(format!("failed to open tab: {}", e)))?;
        tab.set_default_timeout(options.navigation_timeout);

        info!("Chrome ready");
        Ok(Self {
            _browser: browser,
            tab,
            settled: Mutex::new(Settled::default()),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> DriverResult<T>
    where
        F: FnOnce(&Tab) -> DriverResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || f(&tab))
            .await
            .map_err(|e| DriverError::Interaction(format!("browser task failed: {}", e)))?
    }

    fn settle_on(&self, settled: Settled) {
        debug!("Settled on {}", settled.url);
        *self.settled.lock().unwrap_or_else(|p| p.into_inner()) = settled;
    }

    fn settled(&self) -> Settled {
        self.settled.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Stamp the document token and read back where the tab is.
    async fn mark_document(&self) -> DriverResult<Settled> {
        let value = self
            .blocking(|tab| {
                run_script(
                    tab,
                    &wrap("return JSON.stringify({url: location.href, doc: __doc()});"),
                )
            })
            .await?;
        let url = value["url"].as_str().unwrap_or_default().to_string();
        let doc = value["doc"].as_str().unwrap_or_default().to_string();
        Ok(Settled { url, doc })
    }

    fn split_handle(handle: &str) -> DriverResult<String> {
        handle
            .split_once(':')
            .map(|(_, reference)| reference.to_string())
            .filter(|reference| reference.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(|| DriverError::StaleElement(handle.to_string()))
    }

    /// Confirm `handle` still names an element of the current document and
    /// scroll it into view.
    async fn ensure_live(&self, handle: &str) -> DriverResult<String> {
        let reference = Self::split_handle(handle)?;
        let body = format!(
            "const el = __find({}); if (!el) return JSON.stringify({{stale: true}}); \
             el.scrollIntoView({{block: 'center'}}); return JSON.stringify({{value: true}});",
            json!(handle)
        );
        let owned = handle.to_string();
        self.blocking(move |tab| envelope(run_script(tab, &wrap(&body))?, &owned))
            .await?;
        Ok(reference)
    }
}

/// Wrap `body` in an IIFE with the helper prelude and error capture.
fn wrap(body: &str) -> String {
    format!(
        "(() => {{ {} try {{ {} }} catch (e) {{ return JSON.stringify({{error: String(e)}}); }} }})()",
        PRELUDE, body
    )
}

fn run_script(tab: &Tab, script: &str) -> DriverResult<Value> {
    let result = tab
        .evaluate(script, false)
        .map_err(|e| DriverError::Script(e.to_string()))?;
    match result.value {
        Some(Value::String(raw)) => {
            serde_json::from_str(&raw).map_err(|e| DriverError::Script(format!("bad reply: {}", e)))
        }
        other => Ok(other.unwrap_or(Value::Null)),
    }
}

/// Unpack the `{stale}` / `{error}` / payload reply shape used by every
/// wrapped script.
fn envelope(value: Value, handle: &str) -> DriverResult<Value> {
    if value["stale"].as_bool() == Some(true) {
        return Err(DriverError::StaleElement(handle.to_string()));
    }
    if let Some(error) = value["error"].as_str() {
        if error.contains("SyntaxError") || error.contains("not a valid selector") {
            return Err(DriverError::InvalidSelector(error.to_string()));
        }
        return Err(DriverError::Script(error.to_string()));
    }
    Ok(value)
}

fn parse_elements(value: Value) -> DriverResult<Vec<ElementRef>> {
    let snapshots: Vec<Snapshot> = serde_json::from_value(value["elements"].clone())
        .map_err(|e| DriverError::Script(format!("bad element list: {}", e)))?;
    Ok(snapshots.into_iter().map(ElementRef::from).collect())
}

#[async_trait]
impl PageDriver for ChromeDriver {
    async fn goto(&self, url: &str, _wait: WaitPolicy) -> DriverResult<()> {
        let target = url.to_string();
        self.blocking(move |tab| {
            tab.navigate_to(&target)
                .map_err(|e| DriverError::Navigation(format!("{}: {}", target, e)))?;
            tab.wait_until_navigated()
                .map_err(|e| DriverError::Navigation(format!("{}: {}", target, e)))?;
            Ok(())
        })
        .await?;
        let settled = self.mark_document().await?;
        self.settle_on(settled);
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        self.blocking(|tab| Ok(tab.get_url())).await
    }

    async fn query_all(
        &self,
        scope: Option<&ElementRef>,
        selector: &str,
    ) -> DriverResult<Vec<ElementRef>> {
        let scope_handle = scope.map(|s| s.handle.clone());
        let body = format!(
            "const h = {}; const scope = h === null ? document : __find(h); \
             if (!scope) return JSON.stringify({{stale: true}}); \
             return JSON.stringify({{elements: Array.from(scope.querySelectorAll({})).map(__snap)}});",
            json!(scope_handle),
            json!(selector)
        );
        let handle = scope_handle.unwrap_or_default();
        let value = self
            .blocking(move |tab| envelope(run_script(tab, &wrap(&body))?, &handle))
            .await?;
        parse_elements(value)
    }

    async fn closest(
        &self,
        element: &ElementRef,
        selector: &str,
    ) -> DriverResult<Option<ElementRef>> {
        let body = format!(
            "const el = __find({}); if (!el) return JSON.stringify({{stale: true}}); \
             const c = el.closest({}); return JSON.stringify({{element: c ? __snap(c) : null}});",
            json!(element.handle),
            json!(selector)
        );
        let handle = element.handle.clone();
        let value = self
            .blocking(move |tab| envelope(run_script(tab, &wrap(&body))?, &handle))
            .await?;
        match value["element"].clone() {
            Value::Null => Ok(None),
            found => serde_json::from_value::<Snapshot>(found)
                .map(|s| Some(s.into()))
                .map_err(|e| DriverError::Script(format!("bad element: {}", e))),
        }
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        self.blocking(|tab| {
            tab.capture_screenshot(Page::CaptureScreenshotFormatOption::Png, Some(100), None, true)
                .map_err(|e| DriverError::Screenshot(e.to_string()))
        })
        .await
    }

    async fn evaluate(&self, script: &str, target: Option<&ElementRef>) -> DriverResult<Value> {
        let handle = target.map(|t| t.handle.clone());
        let body = match &handle {
            Some(h) => format!(
                "const el = __find({}); if (!el) return JSON.stringify({{stale: true}}); \
                 const r = ({})(el); return JSON.stringify({{value: r === undefined ? null : r}});",
                json!(h),
                script
            ),
            None => format!(
                "const r = ({})(); return JSON.stringify({{value: r === undefined ? null : r}});",
                script
            ),
        };
        let handle = handle.unwrap_or_default();
        let value = self
            .blocking(move |tab| envelope(run_script(tab, &wrap(&body))?, &handle))
            .await?;
        Ok(value["value"].clone())
    }

    async fn click(&self, element: &ElementRef) -> DriverResult<()> {
        let reference = self.ensure_live(&element.handle).await?;
        self.blocking(move |tab| {
            let selector = format!("[{}=\"{}\"]", REF_ATTRIBUTE, reference);
            tab.find_element(&selector)
                .map_err(|e| DriverError::StaleElement(format!("{}: {}", selector, e)))?
                .click()
                .map_err(|e| DriverError::Interaction(format!("click failed: {}", e)))?;
            Ok(())
        })
        .await
    }

    async fn clear_and_type(&self, element: &ElementRef, text: &str) -> DriverResult<()> {
        let body = format!(
            "const el = __find({}); if (!el) return JSON.stringify({{stale: true}}); \
             el.focus(); el.value = ''; el.dispatchEvent(new Event('input', {{bubbles: true}})); \
             return JSON.stringify({{value: true}});",
            json!(element.handle)
        );
        let handle = element.handle.clone();
        let reference = Self::split_handle(&handle)?;
        let text = text.to_string();
        self.blocking(move |tab| {
            envelope(run_script(tab, &wrap(&body))?, &handle)?;
            let selector = format!("[{}=\"{}\"]", REF_ATTRIBUTE, reference);
            tab.find_element(&selector)
                .map_err(|e| DriverError::StaleElement(format!("{}: {}", selector, e)))?
                .type_into(&text)
                .map_err(|e| DriverError::Interaction(format!("typing failed: {}", e)))?;
            Ok(())
        })
        .await
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> DriverResult<bool> {
        let before = self.settled();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // State reads fail while a navigation is in flight; keep polling.
            let state = self
                .blocking(|tab| run_script(tab, DOCUMENT_STATE_SCRIPT))
                .await
                .ok()
                .and_then(|value| serde_json::from_value::<DocumentState>(value).ok());

            if let Some(state) = state
                && state.ready == "complete"
                && (state.url != before.url || state.doc != before.doc)
            {
                let settled = self.mark_document().await?;
                self.settle_on(settled);
                return Ok(true);
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
