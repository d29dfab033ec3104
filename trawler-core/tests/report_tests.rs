// Tests for review document generation

use tempfile::TempDir;
use trawler_core::data::Database;
use trawler_core::report::{
    DocumentCompiler, HtmlCompiler, JsonCompiler, MarkdownCompiler, ReportFormat, save_report,
    session_document,
};
use trawler_scanner::recorder::{ActionKind, ActionRecord};

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";

fn records() -> Vec<ActionRecord> {
    let mut fill = ActionRecord::new(
        ActionKind::Fill,
        "Filled inputs on login",
        "https://example.com/login",
        PNG.to_vec(),
    );
    fill.sequence = 1;
    let mut highlight = ActionRecord::new(
        ActionKind::Highlight,
        "Highlight button on login",
        "https://example.com/login",
        b"<form><button style=\"outline:red\">Go</button></form>".to_vec(),
    );
    highlight.sequence = 2;
    vec![fill, highlight]
}

// ============================================================================
// Report Format Tests
// ============================================================================

#[test]
fn test_report_format_from_str() {
    assert_eq!(ReportFormat::from_str("html"), Some(ReportFormat::Html));
    assert_eq!(ReportFormat::from_str("htm"), Some(ReportFormat::Html));
    assert_eq!(ReportFormat::from_str("json"), Some(ReportFormat::Json));
    assert_eq!(ReportFormat::from_str("markdown"), Some(ReportFormat::Markdown));
    assert_eq!(ReportFormat::from_str("md"), Some(ReportFormat::Markdown));
}

#[test]
fn test_report_format_from_str_case_insensitive() {
    assert_eq!(ReportFormat::from_str("HTML"), Some(ReportFormat::Html));
    assert_eq!(ReportFormat::from_str("Json"), Some(ReportFormat::Json));
}

#[test]
fn test_report_format_from_str_invalid() {
    assert_eq!(ReportFormat::from_str("pdf"), None);
    assert_eq!(ReportFormat::from_str(""), None);
}

#[test]
fn test_report_format_extension() {
    assert_eq!(ReportFormat::Html.extension(), "html");
    assert_eq!(ReportFormat::Json.extension(), "json");
    assert_eq!(ReportFormat::Markdown.extension(), "md");
}

// ============================================================================
// HTML Compiler Tests
// ============================================================================

#[test]
fn test_html_document_has_one_section_per_action() {
    let compiler = HtmlCompiler {
        title: "Crawl <demo>".to_string(),
    };
    let doc = String::from_utf8(compiler.compile(&records())).unwrap();

    assert!(doc.starts_with("<!DOCTYPE html>"));
    assert!(doc.contains("<title>Crawl &lt;demo&gt;</title>"));
    assert_eq!(doc.matches("<section class=\"action\"").count(), 2);
    assert!(doc.contains("<h2>1. Filled inputs on login</h2>"));
    assert!(doc.contains("<h2>2. Highlight button on login</h2>"));
    assert!(doc.contains("page-break-after: always"));
}

#[test]
fn test_html_document_embeds_captures() {
    let compiler = HtmlCompiler {
        title: "Crawl".to_string(),
    };
    let doc = String::from_utf8(compiler.compile(&records())).unwrap();

    assert!(doc.contains("src=\"data:image/png;base64,"));
    assert!(doc.contains("<iframe sandbox"));
    assert!(doc.contains("srcdoc=\"&lt;form&gt;&lt;button style=&quot;outline:red&quot;&gt;"));
}

#[test]
fn test_html_document_preserves_order() {
    let compiler = HtmlCompiler {
        title: "Crawl".to_string(),
    };
    let doc = String::from_utf8(compiler.compile(&records())).unwrap();

    let first = doc.find("Filled inputs on login").unwrap();
    let second = doc.find("Highlight button on login").unwrap();
    assert!(first < second);
}

// ============================================================================
// JSON Compiler Tests
// ============================================================================

#[test]
fn test_json_document_structure() {
    let compiler = JsonCompiler {
        title: "Crawl".to_string(),
    };
    let doc: serde_json::Value = serde_json::from_slice(&compiler.compile(&records())).unwrap();

    let document = &doc["document"];
    assert_eq!(document["metadata"]["generator"], "Trawler");
    assert_eq!(document["metadata"]["title"], "Crawl");
    assert_eq!(document["total_actions"], 2);

    let actions = document["actions"].as_array().unwrap();
    assert_eq!(actions[0]["sequence"], 1);
    assert_eq!(actions[0]["kind"], "fill");
    assert_eq!(actions[0]["media_type"], "image/png");
    assert_eq!(actions[0]["size"], PNG.len());
    assert!(actions[0]["screenshot_base64"].as_str().unwrap().starts_with("iVBORw0KGgo"));
    assert_eq!(actions[1]["media_type"], "text/html");
}

#[test]
fn test_json_document_empty() {
    let compiler = JsonCompiler {
        title: "Crawl".to_string(),
    };
    let doc: serde_json::Value = serde_json::from_slice(&compiler.compile(&[])).unwrap();
    assert_eq!(doc["document"]["total_actions"], 0);
    assert!(doc["document"]["actions"].as_array().unwrap().is_empty());
}

// ============================================================================
// Markdown Compiler Tests
// ============================================================================

#[test]
fn test_markdown_document_table() {
    let compiler = MarkdownCompiler {
        title: "Crawl".to_string(),
    };
    let doc = String::from_utf8(compiler.compile(&records())).unwrap();

    assert!(doc.starts_with("# Crawl\n"));
    assert!(doc.contains("| # | Action | Page | Kind | Capture |"));
    assert!(doc.contains("| 1 | Filled inputs on login | https://example.com/login | fill | image/png"));
    assert!(doc.contains("| 2 | Highlight button on login |"));
    assert!(!doc.contains("base64"));
}

#[test]
fn test_markdown_document_empty() {
    let compiler = MarkdownCompiler {
        title: "Crawl".to_string(),
    };
    let doc = String::from_utf8(compiler.compile(&[])).unwrap();
    assert!(doc.contains("_No actions recorded._"));
}

// ============================================================================
// Stored Session Tests
// ============================================================================

#[test]
fn test_session_document_from_database() {
    let db = Database::in_memory().unwrap();
    let session_id = db.create_session("https://example.com/", "forms", None).unwrap();
    for record in records() {
        db.insert_action(&session_id, &record).unwrap();
    }

    let doc = session_document(&db, &session_id, ReportFormat::Markdown)
        .unwrap()
        .unwrap();
    let doc = String::from_utf8(doc).unwrap();
    assert!(doc.starts_with(&format!(
        "# Trawler session {} (https://example.com/)",
        session_id
    )));
    assert!(doc.contains("Highlight button on login"));
}

#[test]
fn test_session_document_missing_session() {
    let db = Database::in_memory().unwrap();
    assert!(
        session_document(&db, "missing", ReportFormat::Html)
            .unwrap()
            .is_none()
    );
}

#[test]
fn test_save_report() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("report.html");
    let compiler = ReportFormat::Html.compiler("Crawl");

    save_report(&compiler.compile(&records()), &path).unwrap();

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("Filled inputs on login"));
}
