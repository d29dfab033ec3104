//! Browser driver capability.
//!
//! The engine never talks to a browser directly. It asks a [`PageDriver`] to
//! navigate, query, type, click and capture, and treats every one of those
//! calls as fallible and potentially slow.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub const HIGHLIGHT_SCRIPT: &str = "(el) => { el.style.outline = '3px solid red'; }";
pub const CLEAR_HIGHLIGHT_SCRIPT: &str = "(el) => { el.style.outline = ''; }";
pub const SCROLL_TO_BOTTOM_SCRIPT: &str =
    "() => { window.scrollTo(0, document.body.scrollHeight); return document.body.scrollHeight; }";
pub const DOCUMENT_HEIGHT_SCRIPT: &str = "() => document.body.scrollHeight";

#[derive(Error, Debug, Clone)]
pub enum DriverError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("element is no longer attached: {0}")]
    StaleElement(String),

    #[error("invalid selector '{0}'")]
    InvalidSelector(String),

    #[error("interaction failed: {0}")]
    Interaction(String),

    #[error("screenshot failed: {0}")]
    Screenshot(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("operation not supported by this driver: {0}")]
    Unsupported(&'static str),
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// How long `goto` waits before handing the page back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Return as soon as the DOM is parsed.
    DomContentLoaded,
    /// Return after the load event.
    Load,
    /// Return once the network has been quiet for a moment.
    NetworkIdle,
}

/// Ephemeral reference to one DOM element.
///
/// The `handle` is only meaningful to the driver that issued it, and only
/// until the next navigation or click. Attribute values and text are
/// snapshots taken when the element was queried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef {
    pub handle: String,
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    pub text: String,
}

impl ElementRef {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id").filter(|id| !id.is_empty())
    }

    /// Visible text for labels, `<no-text>` when the element has none.
    pub fn display_text(&self) -> String {
        let text = self.text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            self.attr("value")
                .filter(|v| !v.trim().is_empty())
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|| "<no-text>".to_string())
        } else {
            text
        }
    }
}

#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Load `url` in the current page.
    async fn goto(&self, url: &str, wait: WaitPolicy) -> DriverResult<()>;

    /// URL of the document currently shown.
    async fn current_url(&self) -> DriverResult<String>;

    /// All elements matching `selector` in document order, searched inside
    /// `scope` when given and in the whole document otherwise.
    async fn query_all(
        &self,
        scope: Option<&ElementRef>,
        selector: &str,
    ) -> DriverResult<Vec<ElementRef>>;

    /// Nearest ancestor of `element` matching `selector`.
    async fn closest(&self, element: &ElementRef, selector: &str)
    -> DriverResult<Option<ElementRef>>;

    /// Full-page capture of the current document.
    async fn screenshot(&self) -> DriverResult<Vec<u8>>;

    /// Run a script, passing `target` as its single argument when present.
    async fn evaluate(&self, script: &str, target: Option<&ElementRef>) -> DriverResult<Value>;

    async fn click(&self, element: &ElementRef) -> DriverResult<()>;

    /// Replace whatever the field holds with `text`.
    async fn clear_and_type(&self, element: &ElementRef, text: &str) -> DriverResult<()>;

    /// Wait for a navigation triggered since the last click to finish.
    /// Resolves `false` when none completes within `timeout`.
    async fn wait_for_navigation(&self, timeout: Duration) -> DriverResult<bool>;

    async fn highlight(&self, element: &ElementRef) -> DriverResult<()> {
        self.evaluate(HIGHLIGHT_SCRIPT, Some(element)).await.map(|_| ())
    }

    async fn clear_highlight(&self, element: &ElementRef) -> DriverResult<()> {
        self.evaluate(CLEAR_HIGHLIGHT_SCRIPT, Some(element)).await.map(|_| ())
    }

    /// Current document height, without scrolling.
    async fn document_height(&self) -> DriverResult<u64> {
        let value = self.evaluate(DOCUMENT_HEIGHT_SCRIPT, None).await?;
        height_from(&value)
    }

    /// Scroll to the bottom and report the new document height.
    async fn scroll_to_bottom(&self) -> DriverResult<u64> {
        let value = self.evaluate(SCROLL_TO_BOTTOM_SCRIPT, None).await?;
        height_from(&value)
    }

    /// Release browser resources. Drivers without any keep the default.
    async fn close(&self) -> DriverResult<()> {
        Ok(())
    }
}

fn height_from(value: &Value) -> DriverResult<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().map(|h| h as u64))
        .ok_or_else(|| DriverError::Script(format!("unexpected scroll height {}", value)))
}
