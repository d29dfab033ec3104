use crate::buttons::sweep_buttons;
use crate::driver::{DriverError, PageDriver, WaitPolicy};
use crate::error::{Result, ScanError};
use crate::forms::FormLoop;
use crate::frontier::Frontier;
use crate::global_links::{DEFAULT_SAMPLE_PAGES, GlobalLinkDetector};
use crate::interaction::{Interaction, InteractionSettings};
use crate::links::walk_links;
use crate::normalize::{NormalizedUrl, in_domain, normalize};
use crate::oracle::MockValueOracle;
use crate::recorder::{ActionKind, ActionRecorder, RetractPolicy};
use crate::result::{CrawlSummary, PageVisit, Termination};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use url::Url;

/// Called with the 1-based page number and URL before each visit.
pub type ProgressCallback = Arc<dyn Fn(usize, String) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InteractionMode {
    /// Run the form loop to a fixed point.
    #[default]
    Forms,
    /// Press every button once, pairing loose inputs heuristically.
    Buttons,
}

impl fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InteractionMode::Forms => write!(f, "forms"),
            InteractionMode::Buttons => write!(f, "buttons"),
        }
    }
}

impl FromStr for InteractionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "forms" | "form" => Ok(InteractionMode::Forms),
            "buttons" | "button" => Ok(InteractionMode::Buttons),
            _ => Err(format!("Unknown interaction mode: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub max_pages: usize,
    pub sample_pages: usize,
    pub mode: InteractionMode,
    pub max_scrolls: usize,
    /// Follow each in-domain link once from the page and come back, before
    /// the page is interacted with.
    pub walk_links: bool,
    pub wait_policy: WaitPolicy,
    pub interaction: InteractionSettings,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_pages: 20,
            sample_pages: DEFAULT_SAMPLE_PAGES,
            mode: InteractionMode::Forms,
            max_scrolls: 0,
            walk_links: false,
            wait_policy: WaitPolicy::NetworkIdle,
            interaction: InteractionSettings::default(),
        }
    }
}

pub struct Crawler {
    driver: Arc<dyn PageDriver>,
    oracle: Arc<dyn MockValueOracle>,
    recorder: Arc<dyn ActionRecorder>,
    config: CrawlerConfig,
    progress_callback: Option<ProgressCallback>,
}

impl Crawler {
    pub fn new(
        driver: Arc<dyn PageDriver>,
        oracle: Arc<dyn MockValueOracle>,
        recorder: Arc<dyn ActionRecorder>,
    ) -> Self {
        Self {
            driver,
            oracle,
            recorder,
            config: CrawlerConfig::default(),
            progress_callback: None,
        }
    }

    pub fn with_config(mut self, config: CrawlerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.config.max_pages = max_pages;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.config.interaction.settle_delay = delay;
        self
    }

    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.config.interaction.navigation_timeout = timeout;
        self
    }

    pub fn with_mode(mut self, mode: InteractionMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn with_max_scrolls(mut self, max_scrolls: usize) -> Self {
        self.config.max_scrolls = max_scrolls;
        self
    }

    pub fn with_link_walk(mut self, walk_links: bool) -> Self {
        self.config.walk_links = walk_links;
        self
    }

    pub fn with_retract_policy(mut self, policy: RetractPolicy) -> Self {
        self.config.interaction.retract_policy = policy;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Breadth-first traversal from `seed` until the frontier drains or the
    /// page budget is spent. Only a browser that cannot be driven at all
    /// aborts the run; every page-level failure is recorded on its visit.
    pub async fn crawl(&self, seed: &str) -> Result<CrawlSummary> {
        info!(
            "Starting crawl of {} (budget {}, mode {})",
            seed, self.config.max_pages, self.config.mode
        );

        let home = Url::parse(seed).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", seed, e)))?;
        if !matches!(home.scheme(), "http" | "https") {
            return Err(ScanError::InvalidUrl(format!("{}: not an http(s) URL", seed)));
        }

        let mut frontier = Frontier::new();
        let seed_url = frontier
            .seed(seed)
            .ok_or_else(|| ScanError::InvalidUrl(seed.to_string()))?;
        let mut globals = GlobalLinkDetector::new(self.config.sample_pages);
        let mut pages: Vec<PageVisit> = Vec::new();

        let termination = loop {
            if frontier.is_empty() {
                break Termination::FrontierExhausted;
            }
            if pages.len() >= self.config.max_pages {
                break Termination::BudgetReached;
            }
            let Some(url) = frontier.next() else {
                break Termination::FrontierExhausted;
            };
            if !in_domain(url.as_str(), &home) {
                debug!("Skipping out-of-domain {}", url);
                continue;
            }

            info!("[{}/{}] Visiting: {}", pages.len() + 1, self.config.max_pages, url);
            if let Some(ref callback) = self.progress_callback {
                callback(pages.len() + 1, url.to_string());
            }

            let started = Instant::now();
            let before = self.recorder.len();
            let mut visit = match self.visit_page(&url, &home).await {
                Ok(visit) => visit,
                Err(e) if e.is_fatal() => {
                    error!("Aborting crawl: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Page {} failed: {}", url, e);
                    PageVisit::with_error(url.clone(), e.to_string())
                }
            };
            visit.duration = started.elapsed();
            visit.screenshots = self.recorder.len().saturating_sub(before);

            if visit.error.is_none() {
                globals.observe_page(&visit.links_found);
            }
            visit.links_enqueued = visit
                .links_found
                .iter()
                .filter(|link| frontier.enqueue_if_new((*link).clone(), &globals))
                .count();
            debug!(
                "{}: {} link(s) found, {} enqueued",
                url,
                visit.links_found.len(),
                visit.links_enqueued
            );
            pages.push(visit);
        };

        info!(
            "Crawl complete ({}). Visited {} pages, {} screenshots",
            termination,
            pages.len(),
            self.recorder.len()
        );

        Ok(CrawlSummary {
            seed: seed_url,
            pages,
            global_links: globals.global_links(),
            pending: frontier.pending_urls().cloned().collect(),
            screenshots: self.recorder.len(),
            termination,
        })
    }

    fn interaction(&self) -> Interaction<'_> {
        Interaction {
            driver: self.driver.as_ref(),
            oracle: self.oracle.as_ref(),
            recorder: self.recorder.as_ref(),
            settings: &self.config.interaction,
        }
    }

    async fn load(&self, url: &NormalizedUrl) -> Result<()> {
        let timeout = self.config.interaction.navigation_timeout;
        match tokio::time::timeout(timeout, self.driver.goto(url.as_str(), self.config.wait_policy)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(DriverError::Launch(reason))) => Err(ScanError::Launch(reason)),
            Ok(Err(e)) => Err(ScanError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(ScanError::Timeout(timeout, format!("loading {}", url))),
        }
    }

    async fn visit_page(&self, url: &NormalizedUrl, home: &Url) -> Result<PageVisit> {
        let interaction = self.interaction();
        let label = url.page_label();
        let mut visit = PageVisit::new(url.clone());

        self.load(url).await?;
        interaction.settle().await;

        if self.config.max_scrolls > 0 {
            self.scroll_pass(&interaction, url).await;
        }

        if self.config.walk_links {
            let landed = interaction
                .bounded("reading the current URL", self.driver.current_url())
                .await?;
            let links = self.extract_links(&interaction, &landed, home).await?;
            let outcome = walk_links(&interaction, url.as_str(), &links).await;
            debug!(
                "{}: followed {} link(s), {} failed",
                url, outcome.links_followed, outcome.failed_links
            );
        }

        match self.config.mode {
            InteractionMode::Forms => {
                let outcome = FormLoop::new(&interaction, url.as_str(), &label).run().await;
                visit.forms_processed = outcome.forms_processed;
                visit.fields_filled = outcome.fields_filled;
                interaction
                    .capture(ActionKind::NoForms, format!("No forms on {}", label), url.as_str())
                    .await;
            }
            InteractionMode::Buttons => {
                let outcome = sweep_buttons(&interaction, url.as_str(), &label).await;
                visit.buttons_clicked = outcome.buttons_clicked;
                visit.fields_filled = outcome.fields_filled;
                self.load(url).await?;
            }
        }

        let landed = interaction
            .bounded("reading the current URL", self.driver.current_url())
            .await?;
        visit.links_found = self.extract_links(&interaction, &landed, home).await?;
        visit.landed_url = Some(landed);
        Ok(visit)
    }

    /// In-domain outbound links of the current document, normalized against
    /// the URL the browser actually shows, deduplicated in document order.
    async fn extract_links(
        &self,
        interaction: &Interaction<'_>,
        landed: &str,
        home: &Url,
    ) -> Result<Vec<NormalizedUrl>> {
        let anchors = interaction
            .bounded("extracting links", self.driver.query_all(None, "a[href]"))
            .await?;

        let mut seen = HashSet::new();
        let links = anchors
            .iter()
            .filter_map(|a| a.attr("href"))
            .filter_map(|href| normalize(href, landed))
            .filter(|link| link.as_str().starts_with("http://") || link.as_str().starts_with("https://"))
            .filter(|link| in_domain(link.as_str(), home))
            .filter(|link| seen.insert(link.clone()))
            .collect();
        Ok(links)
    }

    /// Scroll to the bottom until the page stops growing, capturing each
    /// step. Drivers without scripting skip the pass.
    async fn scroll_pass(&self, interaction: &Interaction<'_>, url: &NormalizedUrl) {
        let Some(mut last_height) = self
            .scroll_step(interaction, url, self.driver.document_height())
            .await
        else {
            return;
        };

        for step in 1..=self.config.max_scrolls {
            let Some(height) = self
                .scroll_step(interaction, url, self.driver.scroll_to_bottom())
                .await
            else {
                return;
            };
            interaction.settle().await;
            interaction
                .capture(
                    ActionKind::Scroll,
                    format!("Scrolled '{}' step {}", url, step),
                    url.as_str(),
                )
                .await;
            debug!("Scroll {}: {} -> {}", step, last_height, height);

            if height == last_height {
                debug!("Page height settled at {} after {} scroll(s)", height, step);
                return;
            }
            last_height = height;
        }
    }

    async fn scroll_step<F>(&self, interaction: &Interaction<'_>, url: &NormalizedUrl, fut: F) -> Option<u64>
    where
        F: std::future::Future<Output = crate::driver::DriverResult<u64>>,
    {
        match interaction.bounded("scrolling", fut).await {
            Ok(height) => Some(height),
            Err(ScanError::Driver(DriverError::Unsupported(what))) => {
                debug!("Skipping scroll pass: {} unsupported", what);
                None
            }
            Err(e) => {
                warn!("Scroll on {} failed: {}", url, e);
                None
            }
        }
    }
}
