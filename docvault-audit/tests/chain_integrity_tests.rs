//! End-to-end chain behaviour against the DuckDB store.

use docvault_audit::{
    AuditAction, AuditConfig, AuditLevel, AuditQuery, AuditRecord, AuditRecordStore,
    AuditService, DuckDbAuditStore,
};
use docvault_storage::SharedConnection;
use duckdb::{Connection, params};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};

fn setup(min_level: AuditLevel) -> (SharedConnection, Arc<DuckDbAuditStore>, AuditService) {
    let conn: SharedConnection = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
    let store = Arc::new(DuckDbAuditStore::open_with_conn(conn.clone()).unwrap());
    let service = AuditService::new(
        store.clone(),
        AuditConfig {
            min_level,
            ..AuditConfig::default()
        },
    );
    service.init().unwrap();
    (conn, store, service)
}

fn write(id: &str) -> AuditRecord {
    AuditRecord::new(AuditAction::Write, "document", id).user("alice")
}

#[test]
fn clean_chain_has_no_invalid_entries() {
    let (_, _, service) = setup(AuditLevel::Info);
    for id in ["A", "B", "C"] {
        service.record(AuditLevel::Info, write(id)).unwrap();
    }
    assert!(service.verify().unwrap().is_empty());
}

#[test]
fn mutating_a_stored_row_is_detected() {
    let (conn, _, service) = setup(AuditLevel::Info);
    let entries: Vec<_> = ["A", "B", "C"]
        .iter()
        .map(|id| service.record(AuditLevel::Info, write(id)).unwrap().unwrap())
        .collect();

    conn.lock()
        .unwrap()
        .execute(
            "UPDATE audit_entries SET details = ? WHERE id = ?",
            params!["rewritten history", entries[1].id.to_string()],
        )
        .unwrap();

    let invalid = service.verify().unwrap();
    assert!(invalid.contains(&entries[1].id));
    assert!(invalid.contains(&entries[2].id));
    assert!(!invalid.contains(&entries[0].id));
}

#[test]
fn deleting_a_middle_row_breaks_the_link() {
    let (conn, _, service) = setup(AuditLevel::Info);
    let entries: Vec<_> = ["A", "B", "C"]
        .iter()
        .map(|id| service.record(AuditLevel::Info, write(id)).unwrap().unwrap())
        .collect();

    conn.lock()
        .unwrap()
        .execute(
            "DELETE FROM audit_entries WHERE id = ?",
            params![entries[1].id.to_string()],
        )
        .unwrap();

    assert_eq!(service.verify().unwrap(), vec![entries[2].id.clone()]);
}

#[test]
fn compulsory_threshold_filters_info() {
    let (_, store, service) = setup(AuditLevel::Compulsory);

    service.record(AuditLevel::Info, write("A")).unwrap();
    assert_eq!(store.count().unwrap(), 0);

    service.record(AuditLevel::Compulsory, write("A")).unwrap();
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn query_by_level_and_action() {
    let (_, _, service) = setup(AuditLevel::Verbose);
    service.record(AuditLevel::Verbose, AuditRecord::new(AuditAction::Read, "document", "A")).unwrap();
    service.record(AuditLevel::Compulsory, AuditRecord::new(AuditAction::Export, "document", "A")).unwrap();
    service.record(AuditLevel::Info, write("B")).unwrap();

    let exports = service.query(&AuditQuery::new().action(AuditAction::Export)).unwrap();
    assert_eq!(exports.len(), 1);
    assert_eq!(exports[0].level, AuditLevel::Compulsory);

    let verbose = service.query(&AuditQuery::new().level(AuditLevel::Verbose)).unwrap();
    assert_eq!(verbose.len(), 1);
    assert_eq!(verbose[0].action, AuditAction::Read);

    let all = service.query(&AuditQuery::new()).unwrap();
    let ids: Vec<_> = all.iter().map(|e| e.resource_id.as_str()).collect();
    assert_eq!(ids, vec!["A", "A", "B"]);
}

#[test]
fn concurrent_records_keep_a_single_chain() {
    let (_, store, service) = setup(AuditLevel::Info);
    let service = Arc::new(service);

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let service = service.clone();
            std::thread::spawn(move || {
                for i in 0..10 {
                    service
                        .record(AuditLevel::Info, write(&format!("{t}-{i}")))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.count().unwrap(), 40);
    assert!(service.verify().unwrap().is_empty());
}

#[test]
fn chain_continues_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vault.duckdb");

    {
        let conn: SharedConnection = Arc::new(Mutex::new(Connection::open(&path).unwrap()));
        let store = Arc::new(DuckDbAuditStore::open_with_conn(conn).unwrap());
        let service = AuditService::new(store, AuditConfig::default());
        service.init().unwrap();
        service.record(AuditLevel::Info, write("A")).unwrap();
        service.shutdown();
    }

    let conn: SharedConnection = Arc::new(Mutex::new(Connection::open(&path).unwrap()));
    let store = Arc::new(DuckDbAuditStore::open_with_conn(conn).unwrap());
    let service = AuditService::new(store, AuditConfig::default());
    assert!(service.init().unwrap().is_valid());

    let b = service.record(AuditLevel::Info, write("B")).unwrap().unwrap();
    assert!(b.previous_entry_id.is_some());
    assert!(service.verify().unwrap().is_empty());
}
