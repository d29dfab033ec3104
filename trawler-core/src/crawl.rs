use crate::data::{Database, SqliteRecorder};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use trawler_scanner::recorder::{ActionRecord, ActionRecorder, MemoryRecorder, RetractPolicy};
use trawler_scanner::result::CrawlSummary;
use trawler_scanner::{
    ChromeDriver, ChromeOptions, Crawler, CrawlerConfig, HeuristicOracle, MockValueOracle,
    OpenAiOracle, PageDriver, StaticDriver,
};
use url::Url;

/// Which browser backend drives the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// reqwest + scraper, no JavaScript.
    Static,
    /// headless_chrome.
    Chrome { headless: bool },
}

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// Options for configuring a crawl operation
pub struct CrawlOptions {
    pub url: String,
    pub config: CrawlerConfig,
    pub driver: DriverKind,
    /// LLM-backed values when set, heuristic values otherwise.
    pub openai: Option<OpenAiSettings>,
    /// Persist the session, its pages and its actions here.
    pub database: Option<PathBuf>,
    pub show_progress_bars: bool,
}

/// Everything a finished run hands back to the caller.
pub struct CrawlOutcome {
    pub summary: CrawlSummary,
    pub records: Vec<ActionRecord>,
    pub session_id: Option<String>,
}

/// Callback for reporting crawl progress
pub type CrawlProgressCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Extract the path component from a URL
pub fn extract_url_path(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| {
            let path = u.path().to_string();
            if path.is_empty() || path == "/" {
                "/".to_string()
            } else {
                path
            }
        })
        .unwrap_or_else(|| url.to_string())
}

async fn build_driver(kind: DriverKind, config: &CrawlerConfig) -> Result<Arc<dyn PageDriver>, String> {
    let timeout = config.interaction.navigation_timeout;
    match kind {
        DriverKind::Static => StaticDriver::new(timeout)
            .map(|d| Arc::new(d) as Arc<dyn PageDriver>)
            .map_err(|e| e.to_string()),
        DriverKind::Chrome { headless } => ChromeDriver::launch(ChromeOptions {
            headless,
            navigation_timeout: timeout,
            ..Default::default()
        })
        .await
        .map(|d| Arc::new(d) as Arc<dyn PageDriver>)
        .map_err(|e| e.to_string()),
    }
}

fn build_oracle(settings: Option<&OpenAiSettings>) -> Result<Arc<dyn MockValueOracle>, String> {
    let Some(settings) = settings else {
        info!("No API key configured, using heuristic field values");
        return Ok(Arc::new(HeuristicOracle::new()));
    };

    let mut oracle = OpenAiOracle::new(settings.api_key.clone()).map_err(|e| e.to_string())?;
    if let Some(ref model) = settings.model {
        oracle = oracle.with_model(model.clone());
    }
    if let Some(ref base_url) = settings.base_url {
        oracle = oracle.with_base_url(base_url.clone());
    }
    info!("Using OpenAI model {} for field values", oracle.model());
    Ok(Arc::new(oracle))
}

fn describe_config(options: &CrawlOptions) -> String {
    let config = &options.config;
    serde_json::json!({
        "max_pages": config.max_pages,
        "sample_pages": config.sample_pages,
        "mode": config.mode.to_string(),
        "max_scrolls": config.max_scrolls,
        "walk_links": config.walk_links,
        "settle_delay_ms": config.interaction.settle_delay.as_millis() as u64,
        "navigation_timeout_ms": config.interaction.navigation_timeout.as_millis() as u64,
        "iteration_cap": config.interaction.iteration_cap,
        "retract_failed_clicks": config.interaction.retract_policy == RetractPolicy::RetractOnFailedClick,
        "driver": match options.driver {
            DriverKind::Static => "static",
            DriverKind::Chrome { .. } => "chrome",
        },
        "oracle": if options.openai.is_some() { "openai" } else { "heuristic" },
    })
    .to_string()
}

/// Execute a crawl with the given options
/// Returns the run summary together with the recorded actions
pub async fn execute_crawl(
    options: CrawlOptions,
    progress_callback: Option<CrawlProgressCallback>,
) -> Result<CrawlOutcome, String> {
    let oracle = build_oracle(options.openai.as_ref())?;

    // A failed launch is recorded against the session
    let (recorder, session): (Arc<dyn ActionRecorder>, Option<(Arc<Mutex<Database>>, String)>) =
        match options.database {
            Some(ref path) => {
                let db = Database::new(path)
                    .map_err(|e| format!("Failed to open database {}: {}", path.display(), e))?;
                let session_id = db
                    .create_session(
                        &options.url,
                        &options.config.mode.to_string(),
                        Some(&describe_config(&options)),
                    )
                    .map_err(|e| format!("Failed to create session: {}", e))?;
                info!("Created crawl session {}", session_id);
                let db = Arc::new(Mutex::new(db));
                let recorder = SqliteRecorder::new(db.clone(), session_id.clone());
                (Arc::new(recorder) as Arc<dyn ActionRecorder>, Some((db, session_id)))
            }
            None => (Arc::new(MemoryRecorder::new()) as Arc<dyn ActionRecorder>, None),
        };

    let fail = |message: String| -> String {
        if let Some((ref db, ref session_id)) = session {
            let db = db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Err(e) = db.fail_session(session_id, &message) {
                warn!("Could not mark session {} failed: {}", session_id, e);
            }
        }
        message
    };

    let driver = build_driver(options.driver, &options.config)
        .await
        .map_err(|e| fail(format!("Failed to start browser: {}", e)))?;

    // Set up single progress bar for overall crawl progress (only if enabled)
    let progress_bar = if options.show_progress_bars {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message("Starting crawl...");
        pb.enable_steady_tick(Duration::from_millis(120));
        Some(pb)
    } else {
        None
    };

    let max_pages = options.config.max_pages;
    let pb_clone = progress_bar.clone();
    let external = progress_callback.clone();
    let internal_progress_callback: trawler_scanner::ProgressCallback =
        Arc::new(move |page: usize, url: String| {
            let message = format!("[{}/{}] {}", page, max_pages, url);
            if let Some(ref pb) = pb_clone {
                pb.set_message(message.clone());
            }
            if let Some(ref callback) = external {
                callback(message);
            }
        });

    let crawler = Crawler::new(driver.clone(), oracle, recorder.clone())
        .with_config(options.config.clone())
        .with_progress_callback(internal_progress_callback);

    let result = crawler.crawl(&options.url).await;

    if let Err(e) = driver.close().await {
        warn!("Closing the browser failed: {}", e);
    }

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            if let Some(ref pb) = progress_bar {
                pb.abandon_with_message(format!("Crawl failed: {}", e));
            }
            return Err(fail(format!("Crawl of {} failed: {}", options.url, e)));
        }
    };

    if let Some(ref pb) = progress_bar {
        pb.finish_with_message(format!(
            "Crawl complete! {} pages, {} screenshots",
            summary.pages_visited(),
            summary.screenshots
        ));
    }

    let session_id = match session {
        Some((db, session_id)) => {
            let mut db = db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            db.complete_session(&session_id, &summary)
                .map_err(|e| format!("Failed to store session {}: {}", session_id, e))?;
            Some(session_id)
        }
        None => None,
    };

    Ok(CrawlOutcome {
        records: recorder.records(),
        summary,
        session_id,
    })
}

/// Generate a crawl report from a run summary
pub fn generate_crawl_report(summary: &CrawlSummary) -> String {
    let mut report = String::new();
    report.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");
    report.push_str("# Summary:\n");
    report.push_str(&format!("  Seed: {}\n", summary.seed));
    report.push_str(&format!("  Pages visited: {}\n", summary.pages_visited()));
    report.push_str(&format!("  Forms processed: {}\n", summary.forms_processed()));
    report.push_str(&format!("  Buttons clicked: {}\n", summary.buttons_clicked()));
    report.push_str(&format!("  Screenshots recorded: {}\n", summary.screenshots));
    if summary.failed_pages() > 0 {
        report.push_str(&format!("  Failed pages: {}\n", summary.failed_pages()));
    }
    report.push_str(&format!("  Stopped: {}\n", summary.termination));
    if !summary.pending.is_empty() {
        report.push_str(&format!("  Left in queue: {}\n", summary.pending.len()));
    }

    report.push_str("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");

    report.push_str("## Pages\n");
    for (idx, page) in summary.pages.iter().enumerate() {
        let path = extract_url_path(page.url.as_str());
        let status = match page.error {
            Some(_) => "\x1b[31mERR\x1b[0m", // Red
            None if page.forms_processed + page.buttons_clicked > 0 => "\x1b[32mACT\x1b[0m", // Green
            None => "\x1b[36m OK\x1b[0m", // Cyan
        };

        let mut line = format!(
            "  {:>3} {} {} ({} forms, {} buttons, {} links)",
            idx + 1,
            status,
            path,
            page.forms_processed,
            page.buttons_clicked,
            page.links_found.len()
        );

        if let Some(ref landed) = page.landed_url
            && extract_url_path(landed) != path
        {
            line.push_str(&format!(" \x1b[90m-> {}\x1b[0m", extract_url_path(landed)));
        }
        if let Some(ref error) = page.error {
            line.push_str(&format!("\n        \x1b[90m{}\x1b[0m", error));
        }

        report.push_str(&line);
        report.push('\n');
    }

    if !summary.global_links.is_empty() {
        report.push_str("\n## Global links (not followed after sampling)\n");
        for link in &summary.global_links {
            report.push_str(&format!("  {}\n", extract_url_path(link.as_str())));
        }
    }
    report.push('\n');

    report
}
