//! String key/value access to the `local_storage` table.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Read the value stored under `key`.
    pub fn get_item(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM local_storage WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Insert or overwrite the value under `key`.
    pub fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO local_storage (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Remove `key`. Returns whether a value was present.
    pub fn remove_item(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM local_storage WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_item("k").unwrap(), None);

        db.set_item("k", "one").unwrap();
        db.set_item("k", "two").unwrap();
        assert_eq!(db.get_item("k").unwrap().as_deref(), Some("two"));

        assert!(db.remove_item("k").unwrap());
        assert!(!db.remove_item("k").unwrap());
        assert_eq!(db.get_item("k").unwrap(), None);
    }
}
