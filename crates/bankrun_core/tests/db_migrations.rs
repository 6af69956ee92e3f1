use bankrun_core::db::migrations::latest_version;
use bankrun_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn in_memory_store_has_bank_tables() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "banks");
    assert_table_exists(&conn, "cells");
}

#[test]
fn reopening_store_file_keeps_schema_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("banks.sqlite3");

    drop(open_db(&path).unwrap());
    let conn = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "cells");
}

#[test]
fn newer_schema_version_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite3");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 42;").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 42);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn cells_cascade_with_their_bank() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "INSERT INTO banks (id, title) VALUES (1, 'one');
         INSERT INTO cells (bank, reg, addr, value) VALUES (1, 0, 0, 'x');
         DELETE FROM banks WHERE id = 1;",
    )
    .unwrap();

    let remaining: i64 = conn
        .query_row("SELECT COUNT(*) FROM cells;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(remaining, 0);
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1);",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
