use lessondeck_core::db::migrations::latest_version;
use lessondeck_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    for table in [
        "users",
        "lessons",
        "slides",
        "slide_notes",
        "slide_comments",
        "comment_reactions",
    ] {
        assert_table_exists(&conn, table);
    }
}

#[test]
fn deleting_a_lesson_cascades_to_its_deck() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "INSERT INTO lessons (id, title) VALUES ('L1', 'Cells');
         INSERT INTO slides (slide_uuid, lesson_id, title, position) VALUES ('s1', 'L1', 'Intro', 0);
         INSERT INTO slide_notes (slide_row_id, content, kind, sort_order)
            SELECT row_id, 'note', 'text', 0 FROM slides WHERE slide_uuid = 's1';
         DELETE FROM lessons WHERE id = 'L1';",
    )
    .unwrap();

    assert_eq!(count(&conn, "slides"), 0);
    assert_eq!(count(&conn, "slide_notes"), 0);
}

#[test]
fn note_kind_is_constrained() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "INSERT INTO lessons (id, title) VALUES ('L1', 'Cells');
         INSERT INTO slides (slide_uuid, lesson_id, title, position) VALUES ('s1', 'L1', 'Intro', 0);",
    )
    .unwrap();

    let err = conn
        .execute(
            "INSERT INTO slide_notes (slide_row_id, content, kind, sort_order)
             SELECT row_id, 'x', 'audio', 0 FROM slides WHERE slide_uuid = 's1';",
            [],
        )
        .unwrap_err();
    assert!(DbError::from(err).is_constraint_violation());
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lessondeck.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "slides");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
