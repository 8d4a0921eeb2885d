// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn migrations_run_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("iqrfgd.db");
    let db = Database::open(&path).unwrap();
    assert_eq!(db.drivers().unwrap().count(), 0);
    // A second open over the same file is idempotent.
    drop(db);
    let db = Database::open(&path).unwrap();
    assert_eq!(db.products().unwrap().count(), 0);
}

#[test]
fn drivers_come_back_ordered() {
    let db = Database::in_memory().unwrap();
    db.insert_driver("sensor", Some(0x5e), 1.0, "var b = 2;").unwrap();
    db.insert_driver("coordinator", Some(0x00), 1.0, "var a = 1;").unwrap();

    let names: Vec<String> = db.drivers().unwrap().map(|d| d.name).collect();
    assert_eq!(names, vec!["coordinator", "sensor"]);
}

#[test]
fn driver_bundle_concatenates_code() {
    let db = Database::in_memory().unwrap();
    db.insert_driver("a", None, 1.0, "var a = 1;").unwrap();
    db.insert_driver("b", None, 2.5, "var b = 2;").unwrap();

    let bundle = db.driver_code_bundle().unwrap();
    assert!(bundle.contains("var a = 1;"));
    assert!(bundle.contains("var b = 2;"));
}

#[test]
fn api_token_round_trip() {
    let db = Database::in_memory().unwrap();
    let id = db
        .insert_api_token("operator", "c2FsdA==", "aGFzaA==", 1_700_000_000, 0, false)
        .unwrap();

    let token = db.api_token(id).unwrap().unwrap();
    assert_eq!(token.owner, "operator");
    assert_eq!(token.salt, "c2FsdA==");
    assert!(!token.revoked);
    assert!(!token.service);
    assert_eq!(token.expires_at, 0);

    assert!(db.api_token(id + 1).unwrap().is_none());
}

#[test]
fn revoke_marks_token() {
    let db = Database::in_memory().unwrap();
    let id = db.insert_api_token("op", "s", "h", 0, 0, true).unwrap();
    assert!(db.revoke_api_token(id).unwrap());
    assert!(db.api_token(id).unwrap().unwrap().revoked);
    assert!(!db.revoke_api_token(9999).unwrap());
}
