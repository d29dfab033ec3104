//! Ordered log of labelled screenshots.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Fill,
    Highlight,
    Click,
    NoForms,
    ButtonClick,
    Scroll,
    LinkHighlight,
    Navigate,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Fill => "fill",
            ActionKind::Highlight => "highlight",
            ActionKind::Click => "click",
            ActionKind::NoForms => "no_forms",
            ActionKind::ButtonClick => "button_click",
            ActionKind::Scroll => "scroll",
            ActionKind::LinkHighlight => "link_highlight",
            ActionKind::Navigate => "navigate",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fill" => Ok(ActionKind::Fill),
            "highlight" => Ok(ActionKind::Highlight),
            "click" => Ok(ActionKind::Click),
            "no_forms" => Ok(ActionKind::NoForms),
            "button_click" => Ok(ActionKind::ButtonClick),
            "scroll" => Ok(ActionKind::Scroll),
            "link_highlight" => Ok(ActionKind::LinkHighlight),
            "navigate" => Ok(ActionKind::Navigate),
            other => Err(format!("Unknown action kind: {}", other)),
        }
    }
}

/// One side-effecting action and the capture taken right after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Position in the run, assigned by the recorder, starting at 1.
    pub sequence: usize,
    pub kind: ActionKind,
    pub label: String,
    pub page: String,
    #[serde(skip)]
    pub screenshot: Vec<u8>,
}

impl ActionRecord {
    pub fn new(
        kind: ActionKind,
        label: impl Into<String>,
        page: impl Into<String>,
        screenshot: Vec<u8>,
    ) -> Self {
        Self {
            sequence: 0,
            kind,
            label: label.into(),
            page: page.into(),
            screenshot,
        }
    }
}

/// What to do with the highlight record of a click that failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetractPolicy {
    /// Keep every record.
    #[default]
    Keep,
    /// Drop the record announcing a click that never happened.
    RetractOnFailedClick,
}

/// Append-only sink for [`ActionRecord`]s, in strict chronological order.
///
/// Implementations use interior mutability so the engine and the code that
/// reports on a run can share one recorder.
pub trait ActionRecorder: Send + Sync {
    /// Append `record`, overwriting its sequence number. Returns the assigned
    /// sequence.
    fn record(&self, record: ActionRecord) -> usize;

    /// Remove and return the newest record.
    fn retract_last(&self) -> Option<ActionRecord>;

    fn records(&self) -> Vec<ActionRecord>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct MemoryRecorder {
    records: Mutex<Vec<ActionRecord>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ActionRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn labels(&self) -> Vec<String> {
        self.lock().iter().map(|r| r.label.clone()).collect()
    }
}

impl ActionRecorder for MemoryRecorder {
    fn record(&self, mut record: ActionRecord) -> usize {
        let mut records = self.lock();
        record.sequence = records.len() + 1;
        let sequence = record.sequence;
        records.push(record);
        sequence
    }

    fn retract_last(&self) -> Option<ActionRecord> {
        self.lock().pop()
    }

    fn records(&self) -> Vec<ActionRecord> {
        self.lock().clone()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_follows_append_order() {
        let recorder = MemoryRecorder::new();
        let a = recorder.record(ActionRecord::new(ActionKind::Fill, "Filled inputs on root", "https://example.test/", vec![1]));
        let b = recorder.record(ActionRecord::new(ActionKind::Click, "After click on root", "https://example.test/", vec![2]));
        assert_eq!((a, b), (1, 2));
        assert_eq!(recorder.labels(), vec!["Filled inputs on root", "After click on root"]);
    }

    #[test]
    fn test_retract_reuses_sequence() {
        let recorder = MemoryRecorder::new();
        recorder.record(ActionRecord::new(ActionKind::Fill, "one", "p", vec![]));
        recorder.record(ActionRecord::new(ActionKind::Highlight, "two", "p", vec![]));
        let removed = recorder.retract_last().unwrap();
        assert_eq!(removed.label, "two");
        assert_eq!(recorder.len(), 1);

        let next = recorder.record(ActionRecord::new(ActionKind::Click, "three", "p", vec![]));
        assert_eq!(next, 2);
    }

    #[test]
    fn test_action_kind_round_trips_through_str() {
        for kind in [
            ActionKind::Fill,
            ActionKind::NoForms,
            ActionKind::ButtonClick,
            ActionKind::Scroll,
            ActionKind::LinkHighlight,
            ActionKind::Navigate,
        ] {
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), kind);
        }
        assert!("explode".parse::<ActionKind>().is_err());
    }
}
