//! Persistence for the local-image to remote-id mapping. One sqlite table
//! keyed by local file name; the remote id is the only handle the display
//! accepts when selecting a previously uploaded image.

use std::env;
use std::sync::OnceLock;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

pub fn new_connection() -> Result<Connection, rusqlite::Error> {
    let db_path = database_path();
    let conn = Connection::open(db_path)?;

    // 5 seconds covers concurrent handler access during uploads
    let _ = conn.execute("PRAGMA busy_timeout = 5000;", []);

    // WAL only needs to succeed once per database; a failure here means
    // another connection holds a transaction, which is fine
    let _ = conn.execute("PRAGMA journal_mode = WAL;", []);
    let _ = conn.execute("PRAGMA synchronous = NORMAL;", []);

    create_tables(&conn)?;
    Ok(conn)
}

fn create_tables(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS uploaded_images (
            file_name TEXT PRIMARY KEY,
            remote_id TEXT NOT NULL,
            sent_at TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

static RESOLVED_DB_PATH: OnceLock<String> = OnceLock::new();

fn database_path() -> String {
    RESOLVED_DB_PATH
        .get_or_init(|| {
            let db_path = env::var("DATABASE_URL").unwrap_or_else(|_| "art.db".to_string());
            let db_path = db_path
                .strip_prefix("sqlite://")
                .unwrap_or(&db_path)
                .to_string();

            // Absolute paths survive working-directory changes
            if !db_path.starts_with('/')
                && db_path != ":memory:"
                && let Ok(cwd) = env::current_dir()
            {
                return cwd.join(&db_path).to_string_lossy().to_string();
            }

            db_path
        })
        .clone()
}

/// A local file that has been pushed to the display.
#[derive(Debug, Clone, Serialize)]
pub struct UploadedImage {
    pub file_name: String,
    pub remote_id: String,
    pub sent_at: String,
}

pub fn record_upload(
    conn: &Connection,
    file_name: &str,
    remote_id: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO uploaded_images (file_name, remote_id, sent_at)
         VALUES (?1, ?2, ?3)",
        params![file_name, remote_id, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub fn remote_id_for(
    conn: &Connection,
    file_name: &str,
) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT remote_id FROM uploaded_images WHERE file_name = ?1",
        [file_name],
        |row| row.get(0),
    )
    .optional()
}

pub fn all_mappings(conn: &Connection) -> Result<Vec<UploadedImage>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT file_name, remote_id, sent_at FROM uploaded_images ORDER BY file_name",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(UploadedImage {
            file_name: row.get(0)?,
            remote_id: row.get(1)?,
            sent_at: row.get(2)?,
        })
    })?;
    Ok(rows.filter_map(|row| row.ok()).collect())
}

#[cfg(test)]
pub fn new_test_connection() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    create_tables(&conn).expect("Failed to create tables");
    conn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_lookup() {
        let conn = new_test_connection();
        record_upload(&conn, "sunset.jpg", "MY_F0001").unwrap();

        assert_eq!(
            remote_id_for(&conn, "sunset.jpg").unwrap().as_deref(),
            Some("MY_F0001")
        );
        assert_eq!(remote_id_for(&conn, "unknown.png").unwrap(), None);
    }

    #[test]
    fn test_reupload_replaces_mapping() {
        let conn = new_test_connection();
        record_upload(&conn, "sunset.jpg", "MY_F0001").unwrap();
        record_upload(&conn, "sunset.jpg", "MY_F0002").unwrap();

        assert_eq!(
            remote_id_for(&conn, "sunset.jpg").unwrap().as_deref(),
            Some("MY_F0002")
        );
        assert_eq!(all_mappings(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_mappings_sorted_by_file_name() {
        let conn = new_test_connection();
        record_upload(&conn, "b.png", "MY_F0002").unwrap();
        record_upload(&conn, "a.jpg", "MY_F0001").unwrap();

        let mappings = all_mappings(&conn).unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[0].file_name, "a.jpg");
        assert_eq!(mappings[1].file_name, "b.png");
        assert!(!mappings[0].sent_at.is_empty());
    }
}
