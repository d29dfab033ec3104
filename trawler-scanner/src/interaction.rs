//! Timeouts, captures and the click race shared by the form loop and the
//! button sweep.

use crate::driver::{ElementRef, PageDriver};
use crate::error::{Result, ScanError};
use crate::oracle::{FieldDescriptor, MockValueOracle, fill_value};
use crate::recorder::{ActionKind, ActionRecord, ActionRecorder, RetractPolicy};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Inputs the engine types into. Hidden, checkable and button-like inputs
/// are left alone.
pub const FILLABLE_SELECTOR: &str = "input:not([type=hidden]):not([type=submit]):not([type=button]):not([type=reset]):not([type=image]):not([type=checkbox]):not([type=radio]):not([type=file]), textarea";

pub const BUTTON_SELECTOR: &str = "button, input[type=submit]";

#[derive(Debug, Clone)]
pub struct InteractionSettings {
    pub settle_delay: Duration,
    pub navigation_timeout: Duration,
    pub step_timeout: Duration,
    pub oracle_timeout: Duration,
    pub iteration_cap: usize,
    pub retract_policy: RetractPolicy,
}

impl Default for InteractionSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(1),
            navigation_timeout: Duration::from_secs(10),
            step_timeout: Duration::from_secs(30),
            oracle_timeout: Duration::from_secs(15),
            iteration_cap: 10,
            retract_policy: RetractPolicy::Keep,
        }
    }
}

/// Borrowed capabilities for one page visit.
pub struct Interaction<'a> {
    pub driver: &'a dyn PageDriver,
    pub oracle: &'a dyn MockValueOracle,
    pub recorder: &'a dyn ActionRecorder,
    pub settings: &'a InteractionSettings,
}

impl<'a> Interaction<'a> {
    /// Await a driver call under the step timeout.
    pub async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = crate::driver::DriverResult<T>>,
    {
        match tokio::time::timeout(self.settings.step_timeout, fut).await {
            Ok(result) => result.map_err(ScanError::from),
            Err(_) => Err(ScanError::Timeout(self.settings.step_timeout, what.to_string())),
        }
    }

    pub async fn settle(&self) {
        if !self.settings.settle_delay.is_zero() {
            tokio::time::sleep(self.settings.settle_delay).await;
        }
    }

    /// Screenshot the current page and append it under `label`. A failed
    /// capture is logged and yields `None`.
    pub async fn capture(&self, kind: ActionKind, label: String, page: &str) -> Option<usize> {
        match self.bounded("taking a screenshot", self.driver.screenshot()).await {
            Ok(bytes) => {
                let sequence = self
                    .recorder
                    .record(ActionRecord::new(kind, label.clone(), page, bytes));
                debug!("Recorded #{}: {}", sequence, label);
                Some(sequence)
            }
            Err(e) => {
                warn!("Screenshot for '{}' failed: {}", label, e);
                None
            }
        }
    }

    /// Fill every input with an oracle value. Returns how many fields were
    /// typed into; failures on single fields are logged and skipped.
    pub async fn fill_inputs(&self, inputs: &[ElementRef]) -> usize {
        let mut filled = 0;
        for input in inputs {
            let field = FieldDescriptor::from_element(input);
            let value = fill_value(self.oracle, &field, self.settings.oracle_timeout).await;
            match self
                .bounded("typing into a field", self.driver.clear_and_type(input, &value))
                .await
            {
                Ok(()) => {
                    debug!("Filled {} with '{}'", field.describe(), value);
                    filled += 1;
                }
                Err(e) => warn!("Could not fill {}: {}", field.describe(), e),
            }
        }
        filled
    }

    /// Click `button` while waiting for the navigation it may trigger. Both
    /// start together; the navigation wait is bounded by the navigation
    /// timeout so a button that only mutates the page never stalls the
    /// caller. Returns whether a navigation completed.
    pub async fn click_and_wait(&self, button: &ElementRef) -> Result<bool> {
        let nav_timeout = self.settings.navigation_timeout;
        let navigation = async {
            tokio::time::timeout(nav_timeout, self.driver.wait_for_navigation(nav_timeout))
                .await
                .unwrap_or(Ok(false))
        };
        let click = self.bounded("clicking", self.driver.click(button));

        let (navigated, clicked) = tokio::join!(navigation, click);
        clicked?;

        let navigated = navigated.unwrap_or_else(|e| {
            debug!("Navigation wait failed: {}", e);
            false
        });
        debug!("Click settled (navigated: {})", navigated);
        Ok(navigated)
    }

    /// Drop the highlight record of a click that failed, if the policy asks
    /// for it and that record is still the newest.
    pub fn retract_after_failed_click(&self, highlight_sequence: Option<usize>) {
        if self.settings.retract_policy != RetractPolicy::RetractOnFailedClick {
            return;
        }
        if let Some(sequence) = highlight_sequence
            && self.recorder.len() == sequence
            && let Some(removed) = self.recorder.retract_last()
        {
            debug!("Retracted '{}' after failed click", removed.label);
        }
    }

    pub async fn highlight(&self, element: &ElementRef) {
        if let Err(e) = self.bounded("highlighting", self.driver.highlight(element)).await {
            debug!("Highlight failed: {}", e);
        }
    }

    pub async fn clear_highlight(&self, element: &ElementRef) {
        if let Err(e) = self
            .bounded("clearing a highlight", self.driver.clear_highlight(element))
            .await
        {
            debug!("Clearing highlight failed: {}", e);
        }
    }
}
