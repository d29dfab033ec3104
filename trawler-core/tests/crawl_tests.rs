// Tests for run orchestration and the terminal summary

use std::time::Duration;
use tempfile::TempDir;
use trawler_core::crawl::{
    CrawlOptions, DriverKind, execute_crawl, extract_url_path, generate_crawl_report,
};
use trawler_core::data::{Database, SessionStatus};
use trawler_scanner::recorder::ActionKind;
use trawler_scanner::result::{CrawlSummary, PageVisit, Termination};
use trawler_scanner::{CrawlerConfig, normalize};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html")
        .set_body_string(format!("<html><body>{}</body></html>", body))
}

/// Seed page with a sign-up form whose response links to one more page.
async fn signup_site() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<form action="/welcome" method="post">
                   <input name="email" type="email">
                   <button type="submit">Sign up</button>
               </form>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/welcome"))
        .respond_with(html(r#"<a href="/">Home</a> <a href="/about">About</a>"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(html("<p>About us</p>"))
        .mount(&server)
        .await;
    server
}

fn options(url: String, database: Option<std::path::PathBuf>) -> CrawlOptions {
    let mut config = CrawlerConfig {
        max_pages: 5,
        ..Default::default()
    };
    config.interaction.settle_delay = Duration::ZERO;
    config.interaction.navigation_timeout = Duration::from_secs(2);
    CrawlOptions {
        url,
        config,
        driver: DriverKind::Static,
        openai: None,
        database,
        show_progress_bars: false,
    }
}

// ============================================================================
// URL Path Extraction Tests
// ============================================================================

#[test]
fn test_extract_url_path_root() {
    assert_eq!(extract_url_path("http://example.com/"), "/");
    assert_eq!(extract_url_path("http://example.com"), "/");
}

#[test]
fn test_extract_url_path_drops_query_and_fragment() {
    assert_eq!(extract_url_path("http://example.com/login?next=/a#top"), "/login");
}

#[test]
fn test_extract_url_path_with_port() {
    assert_eq!(extract_url_path("http://localhost:3000/signup"), "/signup");
}

#[test]
fn test_extract_url_path_unparsable_is_returned_as_is() {
    assert_eq!(extract_url_path("not a url"), "not a url");
}

// ============================================================================
// execute_crawl Tests
// ============================================================================

#[tokio::test]
async fn test_execute_crawl_without_database() {
    let server = signup_site().await;

    let outcome = execute_crawl(options(format!("{}/", server.uri()), None), None)
        .await
        .unwrap();

    assert!(outcome.session_id.is_none());
    assert_eq!(outcome.summary.pages_visited(), 2);
    assert_eq!(outcome.summary.termination, Termination::FrontierExhausted);
    let labels: Vec<&str> = outcome.records.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(
        labels,
        vec![
            "Filled inputs on root",
            "Highlight button on root",
            "After click on root",
            "No forms on root",
            "No forms on about",
        ]
    );
    let sequences: Vec<usize> = outcome.records.iter().map(|r| r.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_execute_crawl_persists_session() {
    let server = signup_site().await;
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("trawler.db");

    let outcome = execute_crawl(
        options(format!("{}/", server.uri()), Some(db_path.clone())),
        None,
    )
    .await
    .unwrap();
    let session_id = outcome.session_id.expect("session id");

    let db = Database::new(&db_path).unwrap();
    let session = db.get_session(&session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.mode, "forms");
    assert_eq!(session.pages_visited, 2);
    assert_eq!(session.forms_processed, 1);
    assert_eq!(session.screenshots, 5);
    assert_eq!(session.termination.as_deref(), Some("frontier_exhausted"));
    let configuration = session.configuration.unwrap();
    assert!(configuration.contains("\"driver\":\"static\""));
    assert!(configuration.contains("\"walk_links\":false"));

    let visits = db.get_page_visits(&session_id).unwrap();
    assert_eq!(visits.len(), 2);
    assert_eq!(visits[0].forms_processed, 1);
    assert!(visits[1].url.ends_with("/about"));

    let actions = db.get_actions(&session_id).unwrap();
    assert_eq!(actions, outcome.records);
    assert_eq!(actions[0].kind, ActionKind::Fill);
    assert_eq!(actions[4].kind, ActionKind::NoForms);
}

#[tokio::test]
async fn test_execute_crawl_reports_progress() {
    let server = signup_site().await;
    let messages = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = messages.clone();

    execute_crawl(
        options(format!("{}/", server.uri()), None),
        Some(std::sync::Arc::new(move |msg: String| {
            sink.lock().unwrap().push(msg)
        })),
    )
    .await
    .unwrap();

    let messages = messages.lock().unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].starts_with("[1/5] "));
    assert!(messages[1].starts_with("[2/5] "));
}

#[tokio::test]
async fn test_execute_crawl_failure_marks_session_failed() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("trawler.db");

    let result = execute_crawl(
        options("ftp://example.com/".to_string(), Some(db_path.clone())),
        None,
    )
    .await;
    assert!(result.is_err());

    let db = Database::new(&db_path).unwrap();
    let sessions = db.list_sessions().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Failed);
    assert!(sessions[0].error.as_deref().unwrap().contains("ftp://example.com/"));
}

// ============================================================================
// Summary Report Tests
// ============================================================================

fn summary() -> CrawlSummary {
    let base = "https://shop.test/";
    let mut home = PageVisit::new(normalize(base, base).unwrap());
    home.forms_processed = 2;
    home.links_found = vec![
        normalize("/cart", base).unwrap(),
        normalize("/terms", base).unwrap(),
    ];
    home.landed_url = Some("https://shop.test/thanks".to_string());
    let broken = PageVisit::with_error(
        normalize("/cart", base).unwrap(),
        "Timed out loading page".to_string(),
    );

    CrawlSummary {
        seed: normalize(base, base).unwrap(),
        pages: vec![home, broken],
        global_links: vec![normalize("/terms", base).unwrap()],
        pending: vec![normalize("/help", base).unwrap()],
        screenshots: 7,
        termination: Termination::BudgetReached,
    }
}

#[test]
fn test_generate_crawl_report_summary_lines() {
    let report = generate_crawl_report(&summary());

    assert!(report.contains("Seed: https://shop.test/"));
    assert!(report.contains("Pages visited: 2"));
    assert!(report.contains("Forms processed: 2"));
    assert!(report.contains("Screenshots recorded: 7"));
    assert!(report.contains("Failed pages: 1"));
    assert!(report.contains("Stopped: page budget reached"));
    assert!(report.contains("Left in queue: 1"));
}

#[test]
fn test_generate_crawl_report_pages_and_globals() {
    let report = generate_crawl_report(&summary());

    assert!(report.contains("ACT"));
    assert!(report.contains("ERR"));
    assert!(report.contains("(2 forms, 0 buttons, 2 links)"));
    assert!(report.contains("-> /thanks"));
    assert!(report.contains("Timed out loading page"));
    assert!(report.contains("## Global links (not followed after sampling)"));
    assert!(report.contains("  /terms\n"));
}

#[test]
fn test_generate_crawl_report_omits_empty_sections() {
    let mut quiet = summary();
    quiet.pages.truncate(1);
    quiet.global_links.clear();
    quiet.pending.clear();
    quiet.termination = Termination::FrontierExhausted;

    let report = generate_crawl_report(&quiet);
    assert!(!report.contains("Failed pages"));
    assert!(!report.contains("Left in queue"));
    assert!(!report.contains("Global links"));
    assert!(report.contains("Stopped: frontier exhausted"));
}
