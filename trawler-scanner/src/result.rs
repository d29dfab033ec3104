use crate::normalize::NormalizedUrl;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    FrontierExhausted,
    BudgetReached,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::FrontierExhausted => write!(f, "frontier exhausted"),
            Termination::BudgetReached => write!(f, "page budget reached"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageVisit {
    pub url: NormalizedUrl,
    /// Where the browser ended up after interaction, if it could tell.
    pub landed_url: Option<String>,
    pub forms_processed: usize,
    pub buttons_clicked: usize,
    pub fields_filled: usize,
    pub links_found: Vec<NormalizedUrl>,
    pub links_enqueued: usize,
    pub screenshots: usize,
    pub duration: Duration,
    pub error: Option<String>,
}

impl PageVisit {
    pub fn new(url: NormalizedUrl) -> Self {
        Self {
            url,
            landed_url: None,
            forms_processed: 0,
            buttons_clicked: 0,
            fields_filled: 0,
            links_found: Vec::new(),
            links_enqueued: 0,
            screenshots: 0,
            duration: Duration::from_secs(0),
            error: None,
        }
    }

    pub fn with_error(url: NormalizedUrl, error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::new(url)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub seed: NormalizedUrl,
    pub pages: Vec<PageVisit>,
    pub global_links: Vec<NormalizedUrl>,
    /// URLs still queued when the run stopped.
    pub pending: Vec<NormalizedUrl>,
    pub screenshots: usize,
    pub termination: Termination,
}

impl CrawlSummary {
    pub fn pages_visited(&self) -> usize {
        self.pages.len()
    }

    pub fn forms_processed(&self) -> usize {
        self.pages.iter().map(|p| p.forms_processed).sum()
    }

    pub fn buttons_clicked(&self) -> usize {
        self.pages.iter().map(|p| p.buttons_clicked).sum()
    }

    pub fn failed_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.error.is_some()).count()
    }
}
