//! Breadth-first work queue with at-most-once visiting.

use crate::global_links::GlobalLinkDetector;
use crate::normalize::{NormalizedUrl, normalize};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

#[derive(Debug, Default)]
pub struct Frontier {
    queue: VecDeque<NormalizedUrl>,
    queued: HashSet<NormalizedUrl>,
    visited: HashSet<NormalizedUrl>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize `raw` against itself and enqueue it unless already seen.
    /// Returns the normalized seed, or `None` if it does not parse.
    pub fn seed(&mut self, raw: &str) -> Option<NormalizedUrl> {
        let url = normalize(raw, raw)?;
        if !self.visited.contains(&url) && self.queued.insert(url.clone()) {
            self.queue.push_back(url.clone());
        }
        Some(url)
    }

    /// Dequeue the head and mark it visited in the same step, so nothing
    /// handed out here can ever be handed out again.
    pub fn next(&mut self) -> Option<NormalizedUrl> {
        let url = self.queue.pop_front()?;
        self.queued.remove(&url);
        self.visited.insert(url.clone());
        Some(url)
    }

    /// Append `url` to the tail unless it was visited, is already waiting,
    /// or has been classified as global navigation chrome.
    pub fn enqueue_if_new(&mut self, url: NormalizedUrl, globals: &GlobalLinkDetector) -> bool {
        if self.visited.contains(&url) || self.queued.contains(&url) {
            return false;
        }
        if globals.is_global(&url) {
            debug!("Skipping global link {}", url);
            return false;
        }
        self.queued.insert(url.clone());
        self.queue.push_back(url);
        true
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn is_visited(&self, url: &NormalizedUrl) -> bool {
        self.visited.contains(url)
    }

    pub fn pending_urls(&self) -> impl Iterator<Item = &NormalizedUrl> {
        self.queue.iter()
    }
}
