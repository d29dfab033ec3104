//! Per-page form interaction loop.
//!
//! Each pass scans for the first form that has something to type into and
//! something to press, fills it, highlights and clicks its first button, and
//! captures the result. Element references never survive a click: every
//! pass starts with a fresh scan.

use crate::driver::ElementRef;
use crate::error::Result;
use crate::interaction::{BUTTON_SELECTOR, FILLABLE_SELECTOR, Interaction};
use crate::recorder::ActionKind;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// A form picked by SCAN together with its inputs and first button.
#[derive(Debug, Clone)]
pub struct FormTarget {
    pub form: ElementRef,
    pub inputs: Vec<ElementRef>,
    pub button: ElementRef,
    pub fingerprint: String,
}

#[derive(Debug)]
pub enum FormState {
    Scan,
    Fill(FormTarget),
    Highlight(FormTarget),
    Click {
        target: FormTarget,
        highlight_sequence: Option<usize>,
    },
    Settle {
        target: FormTarget,
        navigated: bool,
    },
    Done,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormLoopOutcome {
    /// Forms whose button was clicked successfully.
    pub forms_processed: usize,
    pub fields_filled: usize,
    pub failed_forms: usize,
    /// Forms picked by SCAN, successful or not.
    pub iterations: usize,
    pub cap_reached: bool,
}

/// Stable identity of a form on the page it was found on. Used to skip forms
/// that failed or came back unchanged after their own submission.
fn fingerprint(page_url: &str, form: &ElementRef, inputs: &[ElementRef]) -> String {
    let attr = |name: &str| form.attr(name).unwrap_or_default().to_string();
    let fields: Vec<String> = inputs
        .iter()
        .map(|i| {
            i.attr("name")
                .or_else(|| i.id())
                .unwrap_or(i.tag.as_str())
                .to_string()
        })
        .collect();
    format!(
        "{}|{}|{}|{}|{}|{}",
        page_url,
        attr("action"),
        attr("method").to_ascii_lowercase(),
        attr("id"),
        attr("name"),
        fields.join(",")
    )
}

pub struct FormLoop<'a, 'b> {
    interaction: &'b Interaction<'a>,
    page_label: String,
    page_url: String,
    skip: HashSet<String>,
    last_submitted: Option<String>,
    outcome: FormLoopOutcome,
}

impl<'a, 'b> FormLoop<'a, 'b> {
    /// `page_url` is the URL being visited; `page_label` its caption.
    pub fn new(interaction: &'b Interaction<'a>, page_url: &str, page_label: &str) -> Self {
        Self {
            interaction,
            page_label: page_label.to_string(),
            page_url: page_url.to_string(),
            skip: HashSet::new(),
            last_submitted: None,
            outcome: FormLoopOutcome::default(),
        }
    }

    /// Drive the state machine until SCAN comes up empty or the iteration
    /// cap is hit.
    pub async fn run(mut self) -> FormLoopOutcome {
        let mut state = FormState::Scan;
        loop {
            state = match state {
                FormState::Scan => self.scan().await,
                FormState::Fill(target) => self.fill(target).await,
                FormState::Highlight(target) => self.highlight(target).await,
                FormState::Click {
                    target,
                    highlight_sequence,
                } => self.click(target, highlight_sequence).await,
                FormState::Settle { target, navigated } => self.settle(target, navigated).await,
                FormState::Done => break,
            };
        }
        debug!(
            "Form loop on {} done: {} processed, {} failed",
            self.page_url, self.outcome.forms_processed, self.outcome.failed_forms
        );
        self.outcome
    }

    async fn scan(&mut self) -> FormState {
        if self.outcome.iterations >= self.interaction.settings.iteration_cap {
            warn!(
                "Iteration cap of {} reached on {}",
                self.interaction.settings.iteration_cap, self.page_url
            );
            self.outcome.cap_reached = true;
            return FormState::Done;
        }

        match self.find_target().await {
            Ok(Some(target)) => {
                self.outcome.iterations += 1;
                debug!("Scan picked form {}", target.fingerprint);
                FormState::Fill(target)
            }
            Ok(None) => FormState::Done,
            Err(e) => {
                warn!("Form scan on {} failed: {}", self.page_url, e);
                FormState::Done
            }
        }
    }

    async fn find_target(&mut self) -> Result<Option<FormTarget>> {
        let it = self.interaction;
        let current_url = it
            .bounded("reading the current URL", it.driver.current_url())
            .await?;
        let forms = it
            .bounded("querying forms", it.driver.query_all(None, "form"))
            .await?;

        for form in forms {
            let inputs = it
                .bounded(
                    "querying form inputs",
                    it.driver.query_all(Some(&form), FILLABLE_SELECTOR),
                )
                .await?;
            if inputs.is_empty() {
                continue;
            }
            let buttons = it
                .bounded(
                    "querying form buttons",
                    it.driver.query_all(Some(&form), BUTTON_SELECTOR),
                )
                .await?;
            let Some(button) = buttons.into_iter().next() else {
                continue;
            };

            let fingerprint = fingerprint(&current_url, &form, &inputs);
            if self.last_submitted.as_deref() == Some(fingerprint.as_str()) {
                warn!("Form reappeared unchanged after submission on {}", current_url);
                self.skip.insert(fingerprint.clone());
            }
            if self.skip.contains(&fingerprint) {
                continue;
            }

            return Ok(Some(FormTarget {
                form,
                inputs,
                button,
                fingerprint,
            }));
        }
        Ok(None)
    }

    async fn fill(&mut self, target: FormTarget) -> FormState {
        let filled = self.interaction.fill_inputs(&target.inputs).await;
        self.outcome.fields_filled += filled;
        self.interaction
            .capture(
                ActionKind::Fill,
                format!("Filled inputs on {}", self.page_label),
                &self.page_url,
            )
            .await;
        FormState::Highlight(target)
    }

    async fn highlight(&mut self, target: FormTarget) -> FormState {
        self.interaction.highlight(&target.button).await;
        let highlight_sequence = self
            .interaction
            .capture(
                ActionKind::Highlight,
                format!("Highlight button on {}", self.page_label),
                &self.page_url,
            )
            .await;
        FormState::Click {
            target,
            highlight_sequence,
        }
    }

    async fn click(&mut self, target: FormTarget, highlight_sequence: Option<usize>) -> FormState {
        match self.interaction.click_and_wait(&target.button).await {
            Ok(navigated) => {
                self.outcome.forms_processed += 1;
                self.last_submitted = Some(target.fingerprint.clone());
                FormState::Settle { target, navigated }
            }
            Err(e) => {
                warn!(
                    "Click on '{}' at {} failed: {}",
                    target.button.display_text(),
                    self.page_url,
                    e
                );
                self.interaction.retract_after_failed_click(highlight_sequence);
                self.interaction.clear_highlight(&target.button).await;
                self.outcome.failed_forms += 1;
                self.skip.insert(target.fingerprint);
                FormState::Scan
            }
        }
    }

    async fn settle(&mut self, target: FormTarget, navigated: bool) -> FormState {
        self.interaction.settle().await;
        self.interaction
            .capture(
                ActionKind::Click,
                format!("After click on {}", self.page_label),
                &self.page_url,
            )
            .await;
        if !navigated {
            self.interaction.clear_highlight(&target.button).await;
        }
        info!(
            "Submitted form via '{}' on {}",
            target.button.display_text(),
            self.page_url
        );
        FormState::Scan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{PageDriver, WaitPolicy};
    use crate::interaction::InteractionSettings;
    use crate::recorder::{ActionRecorder, MemoryRecorder, RetractPolicy};
    use crate::static_driver::StaticDriver;
    use crate::testing::{EchoOracle, RecordingDriver};
    use std::collections::BTreeMap;
    use std::time::Duration;

    const PAGE: &str = "https://example.test/";

    fn settings() -> InteractionSettings {
        InteractionSettings {
            settle_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    async fn run_loop(
        driver: &RecordingDriver,
        recorder: &MemoryRecorder,
        settings: &InteractionSettings,
    ) -> FormLoopOutcome {
        driver.goto(PAGE, WaitPolicy::Load).await.unwrap();
        let interaction = Interaction {
            driver,
            oracle: &EchoOracle,
            recorder,
            settings,
        };
        FormLoop::new(&interaction, PAGE, "root").run().await
    }

    fn el(tag: &str, attrs: &[(&str, &str)]) -> ElementRef {
        ElementRef {
            handle: "h".to_string(),
            tag: tag.to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            text: String::new(),
        }
    }

    #[test]
    fn test_fingerprint_depends_on_page_and_fields() {
        let form = el("form", &[("action", "/login"), ("method", "POST")]);
        let inputs = vec![el("input", &[("name", "user")]), el("input", &[("id", "pw")])];

        let a = fingerprint("https://example.test/", &form, &inputs);
        assert_eq!(a, "https://example.test/|/login|post|||user,pw");
        assert_ne!(a, fingerprint("https://example.test/other", &form, &inputs));
        assert_ne!(a, fingerprint("https://example.test/", &form, &inputs[..1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_fields_typed_before_single_click() {
        let driver = RecordingDriver::new(StaticDriver::from_fixtures([
            (
                PAGE,
                r#"<form action="/done" method="post">
                       <input name="a"> <input name="b" type="hidden" value="x">
                       <input name="c" type="email"> <textarea name="d"></textarea>
                       <input type="submit" value="Go">
                   </form>"#,
            ),
            ("https://example.test/done", "<p>done</p>"),
        ]));
        let recorder = MemoryRecorder::new();

        let outcome = run_loop(&driver, &recorder, &settings()).await;

        assert_eq!(
            driver.calls(),
            vec![
                "goto https://example.test/",
                "type a-value",
                "type c-value",
                "type d-value",
                "screenshot",
                "highlight",
                "screenshot",
                "click",
                "screenshot",
            ]
        );
        assert_eq!(outcome.forms_processed, 1);
        assert_eq!(outcome.fields_filled, 3);
        assert!(!outcome.cap_reached);
        assert_eq!(
            recorder.labels(),
            vec!["Filled inputs on root", "Highlight button on root", "After click on root"]
        );
        assert_eq!(
            driver.inner.submissions()[0].fields,
            vec![
                ("a".to_string(), "a-value".to_string()),
                ("b".to_string(), "x".to_string()),
                ("c".to_string(), "c-value".to_string()),
                ("d".to_string(), "d-value".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_form_posting_to_its_own_page_is_not_resubmitted() {
        let driver = RecordingDriver::new(StaticDriver::from_fixtures([(
            PAGE,
            r#"<form method="post"><input name="q"><button>Search</button></form>"#,
        )]));
        let recorder = MemoryRecorder::new();

        let outcome = run_loop(&driver, &recorder, &settings()).await;

        assert_eq!(outcome.forms_processed, 1);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(driver.inner.submissions().len(), 1);
        assert_eq!(recorder.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_iteration_cap_bounds_the_loop() {
        let driver = RecordingDriver::new(StaticDriver::from_fixtures([(
            PAGE,
            r#"<form method="post"><input name="a"><button>A</button></form>
               <form method="post"><input name="b"><button>B</button></form>
               <form method="post"><input name="c"><button>C</button></form>"#,
        )]));
        let recorder = MemoryRecorder::new();
        let settings = InteractionSettings {
            iteration_cap: 2,
            ..settings()
        };

        let outcome = run_loop(&driver, &recorder, &settings).await;

        assert!(outcome.cap_reached);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.forms_processed, 2);
        let submitted: Vec<String> = driver
            .inner
            .submissions()
            .into_iter()
            .map(|s| s.fields[0].0.clone())
            .collect();
        assert_eq!(submitted, vec!["a", "b"]);
    }

    const BROKEN_FORM: &str =
        r#"<form action="http://[::1" method="post"><input name="a"><button>Go</button></form>"#;

    #[tokio::test(start_paused = true)]
    async fn test_failed_click_keeps_highlight_record_by_default() {
        let driver = RecordingDriver::new(StaticDriver::from_fixtures([(PAGE, BROKEN_FORM)]));
        let recorder = MemoryRecorder::new();

        let outcome = run_loop(&driver, &recorder, &settings()).await;

        assert_eq!(outcome.failed_forms, 1);
        assert_eq!(outcome.forms_processed, 0);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(
            recorder.labels(),
            vec!["Filled inputs on root", "Highlight button on root"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_click_retracts_highlight_record_when_asked() {
        let driver = RecordingDriver::new(StaticDriver::from_fixtures([(PAGE, BROKEN_FORM)]));
        let recorder = MemoryRecorder::new();
        let settings = InteractionSettings {
            retract_policy: RetractPolicy::RetractOnFailedClick,
            ..settings()
        };

        let outcome = run_loop(&driver, &recorder, &settings).await;

        assert_eq!(outcome.failed_forms, 1);
        assert_eq!(recorder.labels(), vec!["Filled inputs on root"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forms_without_inputs_or_buttons_are_ignored() {
        let driver = RecordingDriver::new(StaticDriver::from_fixtures([(
            PAGE,
            r#"<form><button>Only a button</button></form>
               <form><input name="orphan"></form>
               <form><input type="hidden" name="t"><input type="submit"></form>"#,
        )]));
        let recorder = MemoryRecorder::new();

        let outcome = run_loop(&driver, &recorder, &settings()).await;

        assert_eq!(outcome, FormLoopOutcome::default());
        assert!(recorder.is_empty());
    }
}
