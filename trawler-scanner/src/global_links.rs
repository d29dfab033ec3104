//! Detection of site-wide navigation chrome.
//!
//! Links that show up on nearly every one of the first `K` pages are treated
//! as shared navigation (headers, footers, sidebars) and are never enqueued
//! again once the sampling window closes.

use crate::normalize::NormalizedUrl;
use std::collections::{HashMap, HashSet};
use tracing::info;

pub const DEFAULT_SAMPLE_PAGES: usize = 5;

#[derive(Debug)]
pub struct GlobalLinkDetector {
    sample_pages: usize,
    pages_observed: usize,
    frequencies: HashMap<NormalizedUrl, usize>,
    frozen: Option<HashSet<NormalizedUrl>>,
}

impl GlobalLinkDetector {
    pub fn new(sample_pages: usize) -> Self {
        Self {
            sample_pages: sample_pages.max(1),
            pages_observed: 0,
            frequencies: HashMap::new(),
            frozen: None,
        }
    }

    /// Feed the outbound links of one visited page. Duplicate links on the
    /// same page count once. Calls after the window closed are ignored.
    pub fn observe_page(&mut self, links: &[NormalizedUrl]) {
        if self.frozen.is_some() {
            return;
        }

        let unique: HashSet<&NormalizedUrl> = links.iter().collect();
        for link in unique {
            *self.frequencies.entry(link.clone()).or_insert(0) += 1;
        }
        self.pages_observed += 1;

        if self.pages_observed == self.sample_pages {
            self.freeze();
        }
    }

    fn freeze(&mut self) {
        let threshold = self.sample_pages.saturating_sub(1).max(1);
        let globals: HashSet<NormalizedUrl> = self
            .frequencies
            .drain()
            .filter(|(_, count)| *count >= threshold)
            .map(|(link, _)| link)
            .collect();
        info!(
            "Global link set frozen after {} pages: {} link(s)",
            self.pages_observed,
            globals.len()
        );
        self.frozen = Some(globals);
    }

    pub fn is_global(&self, url: &NormalizedUrl) -> bool {
        self.frozen.as_ref().is_some_and(|set| set.contains(url))
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    pub fn pages_observed(&self) -> usize {
        self.pages_observed
    }

    /// Frozen set, or an empty set while sampling is still in progress.
    pub fn global_links(&self) -> Vec<NormalizedUrl> {
        let mut links: Vec<NormalizedUrl> = self
            .frozen
            .as_ref()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        links.sort();
        links
    }

    /// How many sampled pages carried `url` so far. Zero after freezing.
    pub fn frequency(&self, url: &NormalizedUrl) -> usize {
        self.frequencies.get(url).copied().unwrap_or(0)
    }
}

impl Default for GlobalLinkDetector {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_PAGES)
    }
}
