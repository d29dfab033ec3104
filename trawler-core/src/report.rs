// Review document assembly from recorded actions

use crate::data::Database;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use trawler_scanner::recorder::ActionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Html,
    Json,
    Markdown,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "html" | "htm" => Some(ReportFormat::Html),
            "json" => Some(ReportFormat::Json),
            "markdown" | "md" => Some(ReportFormat::Markdown),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Html => "html",
            ReportFormat::Json => "json",
            ReportFormat::Markdown => "md",
        }
    }

    pub fn compiler(&self, title: impl Into<String>) -> Box<dyn DocumentCompiler> {
        let title = title.into();
        match self {
            ReportFormat::Html => Box::new(HtmlCompiler { title }),
            ReportFormat::Json => Box::new(JsonCompiler { title }),
            ReportFormat::Markdown => Box::new(MarkdownCompiler { title }),
        }
    }
}

/// Turns the ordered action log into one reviewable document.
pub trait DocumentCompiler {
    fn compile(&self, records: &[ActionRecord]) -> Vec<u8>;
}

/// What a capture's bytes are, judged by their leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Png,
    Jpeg,
    Html,
}

impl CaptureKind {
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            CaptureKind::Png
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            CaptureKind::Jpeg
        } else {
            CaptureKind::Html
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            CaptureKind::Png => "image/png",
            CaptureKind::Jpeg => "image/jpeg",
            CaptureKind::Html => "text/html",
        }
    }
}

/// One print page per record: label heading, page URL, then the capture.
pub struct HtmlCompiler {
    pub title: String,
}

impl DocumentCompiler for HtmlCompiler {
    fn compile(&self, records: &[ActionRecord]) -> Vec<u8> {
        let mut doc = String::new();
        doc.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
        doc.push_str(&format!("<title>{}</title>\n", escape_html(&self.title)));
        doc.push_str(
            "<style>
body { font-family: sans-serif; margin: 0; }
section.action { page-break-after: always; break-after: page; padding: 1.5rem; }
section.action h2 { margin: 0 0 .25rem 0; font-size: 1.2rem; }
section.action p.page { margin: 0 0 1rem 0; color: #555; font-size: .9rem; word-break: break-all; }
section.action img { max-width: 100%; border: 1px solid #ccc; }
section.action iframe { width: 100%; height: 80vh; border: 1px solid #ccc; }
</style>\n</head>\n<body>\n",
        );
        doc.push_str(&format!(
            "<header><h1>{}</h1><p>{} action(s) recorded. Generated {}.</p></header>\n",
            escape_html(&self.title),
            records.len(),
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        ));

        for record in records {
            doc.push_str(&format!(
                "<section class=\"action\" id=\"action-{}\">\n<h2>{}. {}</h2>\n<p class=\"page\">{}</p>\n",
                record.sequence,
                record.sequence,
                escape_html(&record.label),
                escape_html(&record.page)
            ));
            let kind = CaptureKind::detect(&record.screenshot);
            match kind {
                CaptureKind::Png | CaptureKind::Jpeg => doc.push_str(&format!(
                    "<img alt=\"{}\" src=\"data:{};base64,{}\">\n",
                    escape_html(&record.label),
                    kind.media_type(),
                    BASE64.encode(&record.screenshot)
                )),
                CaptureKind::Html => doc.push_str(&format!(
                    "<iframe sandbox title=\"{}\" srcdoc=\"{}\"></iframe>\n",
                    escape_html(&record.label),
                    escape_html(&String::from_utf8_lossy(&record.screenshot))
                )),
            }
            doc.push_str("</section>\n");
        }

        doc.push_str("</body>\n</html>\n");
        doc.into_bytes()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub sequence: usize,
    pub kind: String,
    pub label: String,
    pub page: String,
    pub media_type: String,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_base64: Option<String>,
}

fn manifest(records: &[ActionRecord], with_payload: bool) -> Vec<ManifestEntry> {
    records
        .iter()
        .map(|record| ManifestEntry {
            sequence: record.sequence,
            kind: record.kind.to_string(),
            label: record.label.clone(),
            page: record.page.clone(),
            media_type: CaptureKind::detect(&record.screenshot).media_type().to_string(),
            size: record.screenshot.len(),
            screenshot_base64: with_payload.then(|| BASE64.encode(&record.screenshot)),
        })
        .collect()
}

/// Manifest plus base64 payloads.
pub struct JsonCompiler {
    pub title: String,
}

impl DocumentCompiler for JsonCompiler {
    fn compile(&self, records: &[ActionRecord]) -> Vec<u8> {
        let document = serde_json::json!({
            "document": {
                "metadata": {
                    "generator": "Trawler",
                    "version": env!("CARGO_PKG_VERSION"),
                    "generated_at": chrono::Utc::now().to_rfc3339(),
                    "format": "json",
                    "title": self.title,
                },
                "total_actions": records.len(),
                "actions": manifest(records, true),
            }
        });
        serde_json::to_vec_pretty(&document).unwrap_or_default()
    }
}

/// Manifest only.
pub struct MarkdownCompiler {
    pub title: String,
}

impl DocumentCompiler for MarkdownCompiler {
    fn compile(&self, records: &[ActionRecord]) -> Vec<u8> {
        let mut doc = String::new();
        doc.push_str(&format!("# {}\n\n", self.title));
        doc.push_str(&format!(
            "Generated {} by Trawler {}.\n\n",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            env!("CARGO_PKG_VERSION")
        ));

        if records.is_empty() {
            doc.push_str("_No actions recorded._\n");
            return doc.into_bytes();
        }

        doc.push_str("| # | Action | Page | Kind | Capture |\n");
        doc.push_str("|---|--------|------|------|---------|\n");
        for entry in manifest(records, false) {
            doc.push_str(&format!(
                "| {} | {} | {} | {} | {} ({} bytes) |\n",
                entry.sequence,
                escape_markdown(&entry.label),
                escape_markdown(&entry.page),
                entry.kind,
                entry.media_type,
                entry.size
            ));
        }
        doc.into_bytes()
    }
}

/// Compile the document of a stored session, or `None` if the session does
/// not exist.
pub fn session_document(
    db: &Database,
    session_id: &str,
    format: ReportFormat,
) -> rusqlite::Result<Option<Vec<u8>>> {
    let Some(session) = db.get_session(session_id)? else {
        return Ok(None);
    };
    let records = db.get_actions(session_id)?;
    let title = format!("Trawler session {} ({})", session.id, session.seed_url);
    Ok(Some(format.compiler(title).compile(&records)))
}

pub fn save_report(content: &[u8], path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content)?;
    Ok(())
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn escape_markdown(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_capture_kind_detection() {
        assert_eq!(CaptureKind::detect(b"\x89PNG\r\n\x1a\nrest"), CaptureKind::Png);
        assert_eq!(CaptureKind::detect(&[0xFF, 0xD8, 0xFF, 0xE0]), CaptureKind::Jpeg);
        assert_eq!(CaptureKind::detect(b"<html></html>"), CaptureKind::Html);
        assert_eq!(CaptureKind::detect(b""), CaptureKind::Html);
    }

    #[test]
    fn test_escape_markdown_keeps_table_intact() {
        assert_eq!(escape_markdown("a|b\nc"), "a\\|b c");
    }
}
