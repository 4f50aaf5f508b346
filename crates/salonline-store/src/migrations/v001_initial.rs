//! v001 -- Initial schema creation.
//!
//! A single key/value table mirroring browser local storage.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS local_storage (
    key        TEXT PRIMARY KEY NOT NULL,
    value      TEXT NOT NULL,              -- opaque string, JSON by convention
    updated_at TEXT NOT NULL               -- RFC-3339
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
