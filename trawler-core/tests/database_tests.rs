// Tests for database functionality

use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use trawler_core::data::{Database, SessionStatus, SqliteRecorder};
use trawler_scanner::recorder::{ActionKind, ActionRecord, ActionRecorder};
use trawler_scanner::result::{CrawlSummary, PageVisit, Termination};
use trawler_scanner::normalize;

fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(&db_path).unwrap();
    (temp_dir, db)
}

fn action(kind: ActionKind, label: &str) -> ActionRecord {
    ActionRecord::new(kind, label, "https://example.com/", b"<html></html>".to_vec())
}

// ============================================================================
// Database Creation Tests
// ============================================================================

#[test]
fn test_database_creation() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    assert!(!Database::exists(&db_path));
    let db = Database::new(&db_path);
    assert!(db.is_ok());
    assert!(Database::exists(&db_path));
}

#[test]
fn test_database_drop() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let db = Database::new(&db_path).unwrap();
    drop(db);
    Database::drop(&db_path).unwrap();
    assert!(!Database::exists(&db_path));
}

#[test]
fn test_schema_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");

    let db = Database::new(&db_path).unwrap();
    let session_id = db.create_session("https://example.com/", "forms", None).unwrap();
    drop(db);

    let reopened = Database::new(&db_path).unwrap();
    assert!(reopened.get_session(&session_id).unwrap().is_some());
}

// ============================================================================
// Session Tests
// ============================================================================

#[test]
fn test_create_session() {
    let (_temp_dir, db) = create_test_db();

    let session_id = db
        .create_session("https://example.com/", "forms", Some("{\"max_pages\":20}"))
        .unwrap();
    let session = db.get_session(&session_id).unwrap().unwrap();

    assert_eq!(session.status, SessionStatus::Running);
    assert_eq!(session.seed_url, "https://example.com/");
    assert_eq!(session.mode, "forms");
    assert_eq!(session.configuration.as_deref(), Some("{\"max_pages\":20}"));
    assert!(session.end_time.is_none());
    assert_eq!(session.pages_visited, 0);
}

#[test]
fn test_create_session_rejects_unknown_mode() {
    let (_temp_dir, db) = create_test_db();
    assert!(db.create_session("https://example.com/", "links", None).is_err());
}

#[test]
fn test_get_missing_session() {
    let (_temp_dir, db) = create_test_db();
    assert!(db.get_session("nope").unwrap().is_none());
}

#[test]
fn test_complete_session() {
    let (_temp_dir, mut db) = create_test_db();
    let base = "https://example.com/";
    let session_id = db.create_session(base, "buttons", None).unwrap();

    let mut home = PageVisit::new(normalize(base, base).unwrap());
    home.buttons_clicked = 3;
    home.fields_filled = 4;
    home.screenshots = 3;
    home.links_found = vec![normalize("/about", base).unwrap()];
    home.links_enqueued = 1;
    let about = PageVisit::with_error(
        normalize("/about", base).unwrap(),
        "Navigation failed".to_string(),
    );
    let summary = CrawlSummary {
        seed: normalize(base, base).unwrap(),
        pages: vec![home, about],
        global_links: vec![normalize("/privacy", base).unwrap()],
        pending: Vec::new(),
        screenshots: 3,
        termination: Termination::FrontierExhausted,
    };

    db.complete_session(&session_id, &summary).unwrap();

    let session = db.get_session(&session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.end_time.is_some());
    assert_eq!(session.pages_visited, 2);
    assert_eq!(session.buttons_clicked, 3);
    assert_eq!(session.screenshots, 3);
    assert_eq!(session.termination.as_deref(), Some("frontier_exhausted"));
    assert_eq!(
        db.get_global_links(&session_id).unwrap(),
        vec!["https://example.com/privacy".to_string()]
    );

    let visits = db.get_page_visits(&session_id).unwrap();
    assert_eq!(visits.len(), 2);
    assert_eq!(visits[0].visit_order, 1);
    assert_eq!(visits[0].url, "https://example.com/");
    assert_eq!(visits[0].fields_filled, 4);
    assert_eq!(visits[0].links_found, 1);
    assert_eq!(visits[1].error.as_deref(), Some("Navigation failed"));
}

#[test]
fn test_fail_session_keeps_actions() {
    let (_temp_dir, db) = create_test_db();
    let session_id = db.create_session("https://example.com/", "forms", None).unwrap();
    db.insert_action(&session_id, &ActionRecord { sequence: 1, ..action(ActionKind::Fill, "Filled inputs on root") })
        .unwrap();

    db.fail_session(&session_id, "browser crashed").unwrap();

    let session = db.get_session(&session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.error.as_deref(), Some("browser crashed"));
    assert_eq!(session.screenshots, 1);
    assert_eq!(db.get_actions(&session_id).unwrap().len(), 1);
}

#[test]
fn test_list_sessions() {
    let (_temp_dir, db) = create_test_db();
    let first = db.create_session("https://one.example/", "forms", None).unwrap();
    let second = db.create_session("https://two.example/", "buttons", None).unwrap();

    let sessions = db.list_sessions().unwrap();
    let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec![second.as_str(), first.as_str()]);
}

#[test]
fn test_global_links_default_to_empty() {
    let (_temp_dir, db) = create_test_db();
    let session_id = db.create_session("https://example.com/", "forms", None).unwrap();
    assert!(db.get_global_links(&session_id).unwrap().is_empty());
    assert!(db.get_global_links("missing").unwrap().is_empty());
}

// ============================================================================
// Action Tests
// ============================================================================

#[test]
fn test_actions_are_returned_in_sequence_order() {
    let (_temp_dir, db) = create_test_db();
    let session_id = db.create_session("https://example.com/", "forms", None).unwrap();

    for (sequence, label) in [(2, "Highlight button on root"), (1, "Filled inputs on root")] {
        let record = ActionRecord {
            sequence,
            ..action(ActionKind::Highlight, label)
        };
        db.insert_action(&session_id, &record).unwrap();
    }

    let labels: Vec<String> = db
        .get_actions(&session_id)
        .unwrap()
        .into_iter()
        .map(|r| r.label)
        .collect();
    assert_eq!(labels, vec!["Filled inputs on root", "Highlight button on root"]);
    assert_eq!(db.count_actions(&session_id).unwrap(), 2);
}

#[test]
fn test_link_walk_actions_are_stored() {
    let db = Database::in_memory().unwrap();
    let session_id = db.create_session("https://example.com/", "forms", None).unwrap();
    db.insert_action(
        &session_id,
        &ActionRecord {
            sequence: 1,
            ..action(ActionKind::LinkHighlight, "Highlight link 'About' on https://example.com/")
        },
    )
    .unwrap();
    db.insert_action(
        &session_id,
        &ActionRecord {
            sequence: 2,
            ..action(ActionKind::Navigate, "Navigated to https://example.com/about")
        },
    )
    .unwrap();

    let kinds: Vec<ActionKind> = db
        .get_actions(&session_id)
        .unwrap()
        .into_iter()
        .map(|r| r.kind)
        .collect();
    assert_eq!(kinds, vec![ActionKind::LinkHighlight, ActionKind::Navigate]);
}

#[test]
fn test_duplicate_sequence_is_rejected() {
    let (_temp_dir, db) = create_test_db();
    let session_id = db.create_session("https://example.com/", "forms", None).unwrap();
    let record = ActionRecord {
        sequence: 1,
        ..action(ActionKind::Click, "After click on root")
    };

    db.insert_action(&session_id, &record).unwrap();
    assert!(db.insert_action(&session_id, &record).is_err());
}

#[test]
fn test_delete_last_action() {
    let (_temp_dir, db) = create_test_db();
    let session_id = db.create_session("https://example.com/", "forms", None).unwrap();
    assert!(db.delete_last_action(&session_id).unwrap().is_none());

    for (sequence, label) in [(1, "Filled inputs on root"), (2, "Highlight button on root")] {
        let record = ActionRecord {
            sequence,
            ..action(ActionKind::Fill, label)
        };
        db.insert_action(&session_id, &record).unwrap();
    }

    let removed = db.delete_last_action(&session_id).unwrap().unwrap();
    assert_eq!(removed.sequence, 2);
    assert_eq!(removed.label, "Highlight button on root");
    assert_eq!(db.count_actions(&session_id).unwrap(), 1);
}

// ============================================================================
// SqliteRecorder Tests
// ============================================================================

#[test]
fn test_sqlite_recorder_assigns_sequences() {
    let db = Database::in_memory().unwrap();
    let session_id = db.create_session("https://example.com/", "forms", None).unwrap();
    let db = Arc::new(Mutex::new(db));
    let recorder = SqliteRecorder::new(db.clone(), session_id.clone());

    assert!(recorder.is_empty());
    assert_eq!(recorder.record(action(ActionKind::Fill, "Filled inputs on root")), 1);
    assert_eq!(recorder.record(action(ActionKind::Highlight, "Highlight button on root")), 2);
    assert_eq!(recorder.record(action(ActionKind::Click, "After click on root")), 3);
    assert_eq!(recorder.len(), 3);

    let stored = db.lock().unwrap().get_actions(&session_id).unwrap();
    assert_eq!(stored, recorder.records());
    assert_eq!(stored[2].kind, ActionKind::Click);
    assert_eq!(stored[0].screenshot, b"<html></html>".to_vec());
}

#[test]
fn test_sqlite_recorder_retract_then_record() {
    let db = Database::in_memory().unwrap();
    let session_id = db.create_session("https://example.com/", "forms", None).unwrap();
    let recorder = SqliteRecorder::new(Arc::new(Mutex::new(db)), session_id);

    recorder.record(action(ActionKind::Fill, "Filled inputs on root"));
    recorder.record(action(ActionKind::Highlight, "Highlight button on root"));
    let retracted = recorder.retract_last().unwrap();
    assert_eq!(retracted.label, "Highlight button on root");

    assert_eq!(recorder.record(action(ActionKind::NoForms, "No forms on root")), 2);
    let labels: Vec<String> = recorder.records().into_iter().map(|r| r.label).collect();
    assert_eq!(labels, vec!["Filled inputs on root", "No forms on root"]);
}

#[test]
fn test_sqlite_recorders_keep_sessions_apart() {
    let db = Database::in_memory().unwrap();
    let first = db.create_session("https://one.example/", "forms", None).unwrap();
    let second = db.create_session("https://two.example/", "forms", None).unwrap();
    let db = Arc::new(Mutex::new(db));

    let a = SqliteRecorder::new(db.clone(), first);
    let b = SqliteRecorder::new(db, second);
    a.record(action(ActionKind::Fill, "Filled inputs on root"));
    a.record(action(ActionKind::Click, "After click on root"));
    b.record(action(ActionKind::NoForms, "No forms on root"));

    assert_eq!(a.len(), 2);
    assert_eq!(b.len(), 1);
    assert_eq!(b.records()[0].sequence, 1);
}
