//! Test doubles shared by the unit tests.

use crate::driver::{DriverResult, ElementRef, PageDriver, WaitPolicy};
use crate::oracle::{FieldDescriptor, MockValueOracle, OracleError};
use crate::static_driver::StaticDriver;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;

/// Delegates to a [`StaticDriver`] and logs every side-effecting call.
pub struct RecordingDriver {
    pub inner: StaticDriver,
    log: Mutex<Vec<String>>,
    /// Simulated document height and how much each scroll adds to it.
    scroll: Option<Mutex<(u64, u64)>>,
}

impl RecordingDriver {
    pub fn new(inner: StaticDriver) -> Self {
        Self {
            inner,
            log: Mutex::new(Vec::new()),
            scroll: None,
        }
    }

    /// Report a document `start` pixels tall that grows by `growth` on every
    /// scroll to the bottom.
    pub fn with_scroll(mut self, start: u64, growth: u64) -> Self {
        self.scroll = Some(Mutex::new((start, growth)));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn push(&self, call: impl Into<String>) {
        self.log.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl PageDriver for RecordingDriver {
    async fn goto(&self, url: &str, wait: WaitPolicy) -> DriverResult<()> {
        self.push(format!("goto {}", url));
        self.inner.goto(url, wait).await
    }

    async fn current_url(&self) -> DriverResult<String> {
        self.inner.current_url().await
    }

    async fn query_all(
        &self,
        scope: Option<&ElementRef>,
        selector: &str,
    ) -> DriverResult<Vec<ElementRef>> {
        self.inner.query_all(scope, selector).await
    }

    async fn closest(
        &self,
        element: &ElementRef,
        selector: &str,
    ) -> DriverResult<Option<ElementRef>> {
        self.inner.closest(element, selector).await
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        self.push("screenshot");
        self.inner.screenshot().await
    }

    async fn evaluate(&self, script: &str, target: Option<&ElementRef>) -> DriverResult<Value> {
        self.inner.evaluate(script, target).await
    }

    async fn click(&self, element: &ElementRef) -> DriverResult<()> {
        self.push("click");
        self.inner.click(element).await
    }

    async fn clear_and_type(&self, element: &ElementRef, text: &str) -> DriverResult<()> {
        self.push(format!("type {}", text));
        self.inner.clear_and_type(element, text).await
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> DriverResult<bool> {
        self.inner.wait_for_navigation(timeout).await
    }

    async fn highlight(&self, element: &ElementRef) -> DriverResult<()> {
        self.push("highlight");
        self.inner.highlight(element).await
    }

    async fn clear_highlight(&self, element: &ElementRef) -> DriverResult<()> {
        self.inner.clear_highlight(element).await
    }

    async fn document_height(&self) -> DriverResult<u64> {
        match &self.scroll {
            Some(scroll) => Ok(scroll.lock().unwrap().0),
            None => self.inner.document_height().await,
        }
    }

    async fn scroll_to_bottom(&self) -> DriverResult<u64> {
        let Some(scroll) = &self.scroll else {
            return self.inner.scroll_to_bottom().await;
        };
        self.push("scroll");
        let mut guard = scroll.lock().unwrap();
        let (height, growth) = &mut *guard;
        *height += *growth;
        Ok(*height)
    }
}

/// Never answers before the caller gives up.
pub struct HangingOracle;

#[async_trait]
impl MockValueOracle for HangingOracle {
    async fn generate(&self, _field: &FieldDescriptor) -> Result<String, OracleError> {
        tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        Ok("never".to_string())
    }
}

/// Answers with the field name, or `value` when it has none.
pub struct EchoOracle;

#[async_trait]
impl MockValueOracle for EchoOracle {
    async fn generate(&self, field: &FieldDescriptor) -> Result<String, OracleError> {
        if field.name.is_empty() {
            Ok("value".to_string())
        } else {
            Ok(format!("{}-value", field.name))
        }
    }
}
