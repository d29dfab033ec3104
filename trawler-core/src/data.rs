use rusqlite::{Connection, OptionalExtension, Result, Row, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};
use trawler_scanner::recorder::{ActionKind, ActionRecord, ActionRecorder};
use trawler_scanner::result::{CrawlSummary, PageVisit};

pub struct Database {
    conn: Connection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "completed" => SessionStatus::Completed,
            "failed" => SessionStatus::Failed,
            _ => SessionStatus::Running,
        }
    }
}

/// One row of `crawl_sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub status: SessionStatus,
    pub seed_url: String,
    pub mode: String,
    pub configuration: Option<String>,
    pub pages_visited: i64,
    pub forms_processed: i64,
    pub buttons_clicked: i64,
    pub screenshots: i64,
    pub termination: Option<String>,
    pub error: Option<String>,
}

/// One row of `page_visits`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageVisitRecord {
    pub visit_order: i64,
    pub url: String,
    pub landed_url: Option<String>,
    pub forms_processed: i64,
    pub buttons_clicked: i64,
    pub fields_filled: i64,
    pub links_found: i64,
    pub links_enqueued: i64,
    pub screenshots: i64,
    pub duration_ms: i64,
    pub error: Option<String>,
}

fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

const SESSION_COLUMNS: &str = "id, start_time, end_time, status, seed_url, mode, configuration,
    pages_visited, forms_processed, buttons_clicked, screenshots, termination, error";

fn session_from_row(row: &Row<'_>) -> Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        start_time: row.get(1)?,
        end_time: row.get(2)?,
        status: SessionStatus::parse(&row.get::<_, String>(3)?),
        seed_url: row.get(4)?,
        mode: row.get(5)?,
        configuration: row.get(6)?,
        pages_visited: row.get(7)?,
        forms_processed: row.get(8)?,
        buttons_clicked: row.get(9)?,
        screenshots: row.get(10)?,
        termination: row.get(11)?,
        error: row.get(12)?,
    })
}

fn action_from_row(row: &Row<'_>) -> Result<ActionRecord> {
    let kind: String = row.get(1)?;
    let kind = kind.parse::<ActionKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            Box::new(io::Error::new(io::ErrorKind::InvalidData, e)),
        )
    })?;
    Ok(ActionRecord {
        sequence: row.get::<_, i64>(0)? as usize,
        kind,
        label: row.get(2)?,
        page: row.get(3)?,
        screenshot: row.get(4)?,
    })
}

impl Database {
    pub fn drop(path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::configure(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self> {
        // Optimize for concurrent writes
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
CREATE TABLE IF NOT EXISTS crawl_sessions (
    id TEXT PRIMARY KEY,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    status TEXT NOT NULL CHECK(status IN ('running', 'completed', 'failed')),
    seed_url TEXT NOT NULL,
    mode TEXT NOT NULL CHECK(mode IN ('forms', 'buttons')),
    configuration TEXT,       -- JSON configuration used

    -- Filled in when the run ends
    pages_visited INTEGER NOT NULL DEFAULT 0,
    forms_processed INTEGER NOT NULL DEFAULT 0,
    buttons_clicked INTEGER NOT NULL DEFAULT 0,
    screenshots INTEGER NOT NULL DEFAULT 0,
    termination TEXT CHECK(termination IN ('frontier_exhausted', 'budget_reached')),
    global_links TEXT,        -- JSON array
    error TEXT
);

CREATE TABLE IF NOT EXISTS page_visits (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    visit_order INTEGER NOT NULL,
    url TEXT NOT NULL,
    landed_url TEXT,
    forms_processed INTEGER NOT NULL DEFAULT 0,
    buttons_clicked INTEGER NOT NULL DEFAULT 0,
    fields_filled INTEGER NOT NULL DEFAULT 0,
    links_found INTEGER NOT NULL DEFAULT 0,
    links_enqueued INTEGER NOT NULL DEFAULT 0,
    screenshots INTEGER NOT NULL DEFAULT 0,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    visited_at INTEGER NOT NULL,

    FOREIGN KEY(session_id) REFERENCES crawl_sessions(id) ON DELETE CASCADE,
    UNIQUE(session_id, url)
);

CREATE INDEX IF NOT EXISTS idx_page_visits_session ON page_visits(session_id, visit_order);

CREATE TABLE IF NOT EXISTS actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    kind TEXT NOT NULL CHECK(kind IN (
        'fill',
        'highlight',
        'click',
        'no_forms',
        'button_click',
        'scroll',
        'link_highlight',
        'navigate'
    )),
    label TEXT NOT NULL,
    page TEXT NOT NULL,
    screenshot BLOB NOT NULL,
    recorded_at INTEGER NOT NULL,

    FOREIGN KEY(session_id) REFERENCES crawl_sessions(id) ON DELETE CASCADE,
    UNIQUE(session_id, sequence)
);

CREATE INDEX IF NOT EXISTS idx_actions_session ON actions(session_id, sequence);
            ",
        )?;
        Ok(())
    }

    // Session management
    pub fn create_session(
        &self,
        seed_url: &str,
        mode: &str,
        configuration: Option<&str>,
    ) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let timestamp = current_timestamp();

        self.conn.execute(
            "INSERT INTO crawl_sessions (id, start_time, status, seed_url, mode, configuration)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &session_id,
                timestamp,
                SessionStatus::Running.as_str(),
                seed_url,
                mode,
                configuration
            ],
        )?;

        Ok(session_id)
    }

    /// Mark the session completed and store the run counters and every
    /// page visit.
    pub fn complete_session(&mut self, session_id: &str, summary: &CrawlSummary) -> Result<()> {
        let timestamp = current_timestamp();
        let global_links: Vec<&str> = summary.global_links.iter().map(|l| l.as_str()).collect();
        let global_links = serde_json::to_string(&global_links).ok();
        let termination = match summary.termination {
            trawler_scanner::Termination::FrontierExhausted => "frontier_exhausted",
            trawler_scanner::Termination::BudgetReached => "budget_reached",
        };

        let tx = self.conn.transaction()?;
        for (order, visit) in summary.pages.iter().enumerate() {
            insert_page_visit(&tx, session_id, order as i64 + 1, visit)?;
        }
        tx.execute(
            "UPDATE crawl_sessions
             SET status = ?1, end_time = ?2, pages_visited = ?3, forms_processed = ?4,
                 buttons_clicked = ?5, screenshots = ?6, termination = ?7, global_links = ?8
             WHERE id = ?9",
            params![
                SessionStatus::Completed.as_str(),
                timestamp,
                summary.pages_visited() as i64,
                summary.forms_processed() as i64,
                summary.buttons_clicked() as i64,
                summary.screenshots as i64,
                termination,
                global_links,
                session_id
            ],
        )?;
        tx.commit()
    }

    /// Mark the session failed. Actions recorded so far stay in place.
    pub fn fail_session(&self, session_id: &str, error: &str) -> Result<()> {
        let timestamp = current_timestamp();
        let screenshots = self.count_actions(session_id)?;
        self.conn.execute(
            "UPDATE crawl_sessions SET status = ?1, end_time = ?2, error = ?3, screenshots = ?4 WHERE id = ?5",
            params![
                SessionStatus::Failed.as_str(),
                timestamp,
                error,
                screenshots as i64,
                session_id
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM crawl_sessions WHERE id = ?1",
            SESSION_COLUMNS
        ))?;
        stmt.query_row(params![session_id], session_from_row)
            .optional()
    }

    /// Newest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM crawl_sessions ORDER BY start_time DESC, rowid DESC",
            SESSION_COLUMNS
        ))?;
        let sessions = stmt
            .query_map([], session_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(sessions)
    }

    pub fn get_global_links(&self, session_id: &str) -> Result<Vec<String>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT global_links FROM crawl_sessions WHERE id = ?1",
                params![session_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        Ok(raw
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default())
    }

    // Page visits
    pub fn get_page_visits(&self, session_id: &str) -> Result<Vec<PageVisitRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT visit_order, url, landed_url, forms_processed, buttons_clicked, fields_filled,
                    links_found, links_enqueued, screenshots, duration_ms, error
             FROM page_visits WHERE session_id = ?1 ORDER BY visit_order",
        )?;

        let visits = stmt
            .query_map(params![session_id], |row| {
                Ok(PageVisitRecord {
                    visit_order: row.get(0)?,
                    url: row.get(1)?,
                    landed_url: row.get(2)?,
                    forms_processed: row.get(3)?,
                    buttons_clicked: row.get(4)?,
                    fields_filled: row.get(5)?,
                    links_found: row.get(6)?,
                    links_enqueued: row.get(7)?,
                    screenshots: row.get(8)?,
                    duration_ms: row.get(9)?,
                    error: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;

        Ok(visits)
    }

    // Actions
    pub fn insert_action(&self, session_id: &str, record: &ActionRecord) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO actions (session_id, sequence, kind, label, page, screenshot, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session_id,
                record.sequence as i64,
                record.kind.as_str(),
                &record.label,
                &record.page,
                &record.screenshot,
                current_timestamp(),
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Remove and return the newest action of a session.
    pub fn delete_last_action(&self, session_id: &str) -> Result<Option<ActionRecord>> {
        let last = self
            .conn
            .query_row(
                "SELECT sequence, kind, label, page, screenshot FROM actions
                 WHERE session_id = ?1 ORDER BY sequence DESC LIMIT 1",
                params![session_id],
                action_from_row,
            )
            .optional()?;

        if let Some(ref record) = last {
            self.conn.execute(
                "DELETE FROM actions WHERE session_id = ?1 AND sequence = ?2",
                params![session_id, record.sequence as i64],
            )?;
        }
        Ok(last)
    }

    pub fn get_actions(&self, session_id: &str) -> Result<Vec<ActionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT sequence, kind, label, page, screenshot FROM actions
             WHERE session_id = ?1 ORDER BY sequence",
        )?;

        let actions = stmt
            .query_map(params![session_id], action_from_row)?
            .collect::<Result<Vec<_>>>()?;

        Ok(actions)
    }

    pub fn count_actions(&self, session_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM actions WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

}

fn insert_page_visit(
    conn: &Connection,
    session_id: &str,
    visit_order: i64,
    visit: &PageVisit,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO page_visits (
            session_id, visit_order, url, landed_url, forms_processed, buttons_clicked,
            fields_filled, links_found, links_enqueued, screenshots, duration_ms, error, visited_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            session_id,
            visit_order,
            visit.url.as_str(),
            &visit.landed_url,
            visit.forms_processed as i64,
            visit.buttons_clicked as i64,
            visit.fields_filled as i64,
            visit.links_found.len() as i64,
            visit.links_enqueued as i64,
            visit.screenshots as i64,
            visit.duration.as_millis() as i64,
            &visit.error,
            current_timestamp(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// [`ActionRecorder`] that writes each record to the `actions` table the
/// moment it is taken, so a run that dies halfway still leaves its trail.
///
/// Storage errors are logged and the record is lost; the engine carries on.
pub struct SqliteRecorder {
    db: Arc<Mutex<Database>>,
    session_id: String,
}

impl SqliteRecorder {
    pub fn new(db: Arc<Mutex<Database>>, session_id: impl Into<String>) -> Self {
        Self {
            db,
            session_id: session_id.into(),
        }
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ActionRecorder for SqliteRecorder {
    fn record(&self, mut record: ActionRecord) -> usize {
        let db = self.db();
        let existing = db.count_actions(&self.session_id).unwrap_or_else(|e| {
            warn!("Could not count actions: {}", e);
            0
        });
        record.sequence = existing + 1;
        match db.insert_action(&self.session_id, &record) {
            Ok(_) => debug!("Stored action #{} '{}'", record.sequence, record.label),
            Err(e) => warn!("Could not store action '{}': {}", record.label, e),
        }
        record.sequence
    }

    fn retract_last(&self) -> Option<ActionRecord> {
        self.db()
            .delete_last_action(&self.session_id)
            .unwrap_or_else(|e| {
                warn!("Could not retract last action: {}", e);
                None
            })
    }

    fn records(&self) -> Vec<ActionRecord> {
        self.db().get_actions(&self.session_id).unwrap_or_else(|e| {
            warn!("Could not load actions: {}", e);
            Vec::new()
        })
    }

    fn len(&self) -> usize {
        self.db().count_actions(&self.session_id).unwrap_or_else(|e| {
            warn!("Could not count actions: {}", e);
            0
        })
    }
}
