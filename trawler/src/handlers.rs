use crate::commands::DEFAULT_CONFIG_DIR;
use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use colored::Colorize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use trawler_core::data::{Database, SessionStatus};
use trawler_core::report::{ReportFormat, save_report, session_document};
use trawler_scanner::{CrawlerConfig, InteractionMode, RetractPolicy};
use url::Url;

pub const DATABASE_FILE: &str = "trawler.db";

// Re-export crawl types and functions from trawler-core
pub use trawler_core::crawl::{
    CrawlOptions, CrawlOutcome, CrawlProgressCallback, DriverKind, OpenAiSettings, execute_crawl,
    extract_url_path, generate_crawl_report,
};

/// Parse a single line as a URL, trying to add http:// if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    // Try to parse as-is
    if let Ok(url) = Url::parse(line)
        && url.has_host()
    {
        return Some(line.to_string());
    }

    // Try adding http://
    let with_scheme = format!("http://{}", line);
    if Url::parse(&with_scheme).is_ok_and(|u| u.has_host()) {
        return Some(with_scheme);
    }

    None
}

/// clap value parser for the seed: http(s) only, scheme optional.
pub fn parse_seed_url(raw: &str) -> std::result::Result<Url, String> {
    let line = parse_url_line(raw.trim()).ok_or_else(|| format!("'{}' is not a valid URL", raw))?;
    let url = Url::parse(&line).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("unsupported scheme '{}': use http or https", other)),
    }
}

/// A path ending in `.db` names the database itself; anything else is a
/// configuration directory holding `trawler.db`. `~` is expanded.
pub fn resolve_db_path(raw: &str) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = Path::new(expanded.as_ref());
    if path.extension().is_some_and(|ext| ext == "db") {
        path.to_path_buf()
    } else {
        path.join(DATABASE_FILE)
    }
}

/// The `--db` argument, or the database `trawler init` created if it exists.
fn database_for(args: &ArgMatches) -> Option<PathBuf> {
    match args.get_one::<PathBuf>("db") {
        Some(path) => Some(resolve_db_path(&path.to_string_lossy())),
        None => Some(resolve_db_path(DEFAULT_CONFIG_DIR)).filter(|p| Database::exists(p)),
    }
}

pub fn report_format(args: &ArgMatches) -> Result<ReportFormat> {
    let raw = args
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("html");
    ReportFormat::from_str(raw).ok_or_else(|| anyhow!("Unknown report format: {}", raw))
}

pub fn default_output_path(format: ReportFormat, session_id: Option<&str>) -> PathBuf {
    let stem = match session_id {
        Some(id) => format!("trawler-{}", id),
        None => "trawler-report".to_string(),
    };
    PathBuf::from(format!("{}.{}", stem, format.extension()))
}

/// Engine configuration from `crawl` arguments.
pub fn crawler_config_from_args(args: &ArgMatches) -> Result<CrawlerConfig> {
    let mut config = CrawlerConfig::default();

    if let Some(max_pages) = args.get_one::<usize>("max-pages") {
        if *max_pages == 0 {
            bail!("--max-pages must be at least 1");
        }
        config.max_pages = *max_pages;
    }
    if let Some(delay) = args.get_one::<f64>("delay") {
        config.interaction.settle_delay = Duration::try_from_secs_f64(*delay)
            .map_err(|_| anyhow!("--delay must be a non-negative number of seconds"))?;
    }
    if let Some(timeout) = args.get_one::<u64>("nav-timeout") {
        config.interaction.navigation_timeout = Duration::from_secs(*timeout);
    }
    if let Some(mode) = args.get_one::<String>("mode") {
        config.mode = mode.parse::<InteractionMode>().map_err(|e| anyhow!(e))?;
    }
    if let Some(max_scrolls) = args.get_one::<usize>("max-scrolls") {
        config.max_scrolls = *max_scrolls;
    }
    config.walk_links = args.get_flag("walk-links");
    if args.get_flag("retract-failed-clicks") {
        config.interaction.retract_policy = RetractPolicy::RetractOnFailedClick;
    }

    Ok(config)
}

fn driver_from_args(args: &ArgMatches) -> DriverKind {
    match args.get_one::<String>("driver").map(String::as_str) {
        Some("static") => DriverKind::Static,
        _ => DriverKind::Chrome {
            headless: !args.get_flag("headed"),
        },
    }
}

fn openai_from_args(args: &ArgMatches) -> Option<OpenAiSettings> {
    let api_key = args
        .get_one::<String>("openai-api-key")
        .filter(|key| !key.trim().is_empty())?;
    Some(OpenAiSettings {
        api_key: api_key.clone(),
        model: args.get_one::<String>("openai-model").cloned(),
        base_url: args.get_one::<String>("openai-base-url").cloned(),
    })
}

pub fn print_banner() {
    println!(
        "{} {}",
        "trawler".bright_cyan().bold(),
        env!("CARGO_PKG_VERSION").bright_black()
    );
    println!("{}", "exploratory form-filling crawler".bright_black());
    println!();
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> Result<String> {
    print!("{} ", msg.bright_cyan().bold());
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase())
}

pub fn handle_init(args: &ArgMatches) -> Result<()> {
    print_divider();
    println!("{}", "  TRAWLER INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let config_dir = args
        .get_one::<String>("PATH")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_DIR);
    let force = args.get_flag("force");
    let expanded_config_dir = shellexpand::tilde(config_dir);
    let trawler_config_dir = Path::new(expanded_config_dir.as_ref());
    let db_loc = trawler_config_dir.join(DATABASE_FILE);
    let db_path = db_loc.as_path();

    println!(
        "{} Target: {}",
        "→".blue(),
        trawler_config_dir.display().to_string().bright_white()
    );
    println!();

    // Check for existing installation
    if Database::exists(db_path) && !force {
        println!("{}", "⚠ WARNING".yellow().bold());
        println!("Database already exists at:");
        println!(
            "  {} {}",
            "•".yellow(),
            db_path.display().to_string().bright_white()
        );
        println!();
        println!(
            "{}",
            "Overwriting it deletes every stored session.".yellow()
        );

        let response = print_prompt("Would you like to overwrite it? [y/N]:")?;
        println!();

        if response != "y" && response != "yes" {
            println!("{} Keeping existing database", "→".blue());
            return Ok(());
        }
    }

    println!("{} Creating directory structure...", "→".blue());
    fs::create_dir_all(trawler_config_dir).with_context(|| {
        format!(
            "Failed to create config directory {}",
            trawler_config_dir.display()
        )
    })?;

    if Database::exists(db_path) {
        Database::drop(db_path)
            .with_context(|| format!("Failed to remove {}", db_path.display()))?;
        println!("{} Existing database removed", "✓".green().bold());
    }

    println!("{} Creating database...", "→".blue());
    Database::new(db_path)
        .with_context(|| format!("Failed to create database {}", db_path.display()))?;

    println!();
    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    println!();
    println!(
        "{} Config directory: {}",
        "✓".green().bold(),
        trawler_config_dir.display().to_string().bright_white()
    );
    println!(
        "{} Database: {}",
        "✓".green().bold(),
        db_path.display().to_string().bright_white()
    );
    println!();
    Ok(())
}

pub async fn handle_crawl(sub_matches: &ArgMatches) -> Result<()> {
    let url = sub_matches
        .get_one::<Url>("url")
        .ok_or_else(|| anyhow!("--url is required"))?;
    let config = crawler_config_from_args(sub_matches)?;
    let format = report_format(sub_matches)?;
    let driver = driver_from_args(sub_matches);
    let openai = openai_from_args(sub_matches);
    let database = database_for(sub_matches);

    // Print crawl configuration
    println!("\n{} Crawling {}", "→".blue().bold(), url.as_str().bright_white());
    println!("Page budget: {}", config.max_pages);
    println!("Mode: {}", config.mode);
    println!(
        "Driver: {}",
        match driver {
            DriverKind::Static => "static (no JavaScript)",
            DriverKind::Chrome { headless: true } => "chrome (headless)",
            DriverKind::Chrome { headless: false } => "chrome (headed)",
        }
    );
    println!(
        "Field values: {}",
        if openai.is_some() { "OpenAI" } else { "heuristic" }
    );
    match database {
        Some(ref path) => println!("Database: {}\n", path.display()),
        None => println!("Database: none (run `trawler init` to keep sessions)\n"),
    }

    let options = CrawlOptions {
        url: url.as_str().to_string(),
        config,
        driver,
        openai,
        database,
        show_progress_bars: true,
    };

    let progress_callback: CrawlProgressCallback = Arc::new(|msg: String| {
        tracing::debug!("{}", msg);
    });

    let outcome = execute_crawl(options, Some(progress_callback))
        .await
        .map_err(|e| anyhow!(e))?;

    println!("\n{} Crawl complete!\n", "✓".green().bold());
    print!("{}", generate_crawl_report(&outcome.summary));

    let output = sub_matches
        .get_one::<PathBuf>("output")
        .cloned()
        .unwrap_or_else(|| default_output_path(format, None));
    let title = format!("Trawler crawl of {}", outcome.summary.seed);
    let document = format.compiler(title).compile(&outcome.records);
    save_report(&document, &output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "{} {} action(s) written to {}",
        "✓".green().bold(),
        outcome.records.len(),
        output.display().to_string().bright_white()
    );
    if let Some(ref session_id) = outcome.session_id {
        println!("{} Session: {}", "ℹ".blue(), session_id.bright_white());
    }
    Ok(())
}

pub fn handle_report(sub_matches: &ArgMatches) -> Result<()> {
    let session_id = sub_matches
        .get_one::<String>("session")
        .ok_or_else(|| anyhow!("--session is required"))?;
    let format = report_format(sub_matches)?;
    let db_path = database_for(sub_matches)
        .ok_or_else(|| anyhow!("No database found; pass --db or run `trawler init`"))?;
    if !Database::exists(&db_path) {
        bail!("Database {} does not exist", db_path.display());
    }

    let db = Database::new(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    let document = session_document(&db, session_id, format)
        .with_context(|| format!("Failed to read session {}", session_id))?
        .ok_or_else(|| anyhow!("No session {} in {}", session_id, db_path.display()))?;

    let output = sub_matches
        .get_one::<PathBuf>("output")
        .cloned()
        .unwrap_or_else(|| default_output_path(format, Some(session_id)));
    save_report(&document, &output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "{} Report written to {}",
        "✓".green().bold(),
        output.display().to_string().bright_white()
    );
    Ok(())
}

pub fn handle_sessions(sub_matches: &ArgMatches) -> Result<()> {
    let db_path = database_for(sub_matches)
        .ok_or_else(|| anyhow!("No database found; pass --db or run `trawler init`"))?;
    let db = Database::new(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    let sessions = db.list_sessions().context("Failed to list sessions")?;

    if sessions.is_empty() {
        println!("No sessions stored in {}", db_path.display());
        return Ok(());
    }

    for session in sessions {
        let label = session.status.as_str();
        let status = match session.status {
            SessionStatus::Completed => label.green(),
            SessionStatus::Failed => label.red(),
            SessionStatus::Running => label.yellow(),
        };
        println!(
            "{}  {:<9}  {:>3} pages  {:>4} screenshots  {}",
            session.id.bright_white(),
            status,
            session.pages_visited,
            session.screenshots,
            session.seed_url
        );
    }
    Ok(())
}
