//! The Local Identity Store.
//!
//! `load` never fails: a missing, unreadable or corrupt record is reported
//! as "no identity" so the widget falls back to the intake form.

use std::path::Path;
use std::sync::Mutex;

use salonline_shared::constants::IDENTITY_STORAGE_KEY;
use salonline_shared::Visitor;
use tracing::{debug, warn};

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Durable storage for the one visitor identity a widget owns.
pub trait IdentityStore: Send + Sync {
    /// The persisted visitor, or `None` if absent or unparseable.
    fn load(&self) -> Option<Visitor>;

    /// Persist `visitor`, replacing any previous record.
    fn save(&self, visitor: &Visitor) -> Result<()>;

    /// Remove the record entirely.
    fn clear(&self) -> Result<()>;
}

/// Identity kept in the SQLite `local_storage` table.
pub struct SqliteIdentityStore {
    db: Mutex<Database>,
    key: String,
}

impl SqliteIdentityStore {
    pub fn new(db: Database) -> Self {
        Self::with_key(db, IDENTITY_STORAGE_KEY)
    }

    /// Store under a custom key, e.g. one per embedded business.
    pub fn with_key(db: Database, key: impl Into<String>) -> Self {
        Self {
            db: Mutex::new(db),
            key: key.into(),
        }
    }

    /// Open the platform default database, or `widget.db` inside `dir`.
    pub fn open(dir: Option<&Path>) -> Result<Self> {
        let db = match dir {
            Some(dir) => Database::open_in(dir)?,
            None => Database::new()?,
        };
        Ok(Self::new(db))
    }

    fn read_raw(&self) -> Result<Option<String>> {
        let db = self.db.lock().map_err(|_| StoreError::Poisoned)?;
        db.get_item(&self.key)
    }
}

impl IdentityStore for SqliteIdentityStore {
    fn load(&self) -> Option<Visitor> {
        let raw = match self.read_raw() {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read stored identity");
                return None;
            }
        };

        match serde_json::from_str::<Visitor>(&raw) {
            Ok(visitor) => {
                debug!(email = %visitor.email, ticket = ?visitor.ticket_id, "Loaded stored identity");
                Some(visitor)
            }
            Err(e) => {
                warn!(error = %e, "Stored identity is corrupt, ignoring it");
                None
            }
        }
    }

    fn save(&self, visitor: &Visitor) -> Result<()> {
        let json = serde_json::to_string(visitor)?;
        let db = self.db.lock().map_err(|_| StoreError::Poisoned)?;
        db.set_item(&self.key, &json)
    }

    fn clear(&self) -> Result<()> {
        let db = self.db.lock().map_err(|_| StoreError::Poisoned)?;
        db.remove_item(&self.key)?;
        Ok(())
    }
}

/// Identity kept in memory only, for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryIdentityStore {
    raw: Mutex<Option<String>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `visitor` already stored.
    pub fn with_visitor(visitor: &Visitor) -> Self {
        Self {
            raw: Mutex::new(serde_json::to_string(visitor).ok()),
        }
    }

    /// Overwrite the raw stored string. Useful for simulating corruption.
    pub fn set_raw(&self, raw: impl Into<String>) {
        if let Ok(mut slot) = self.raw.lock() {
            *slot = Some(raw.into());
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Option<Visitor> {
        let raw = self.raw.lock().ok()?.clone()?;
        match serde_json::from_str(&raw) {
            Ok(visitor) => Some(visitor),
            Err(e) => {
                warn!(error = %e, "Stored identity is corrupt, ignoring it");
                None
            }
        }
    }

    fn save(&self, visitor: &Visitor) -> Result<()> {
        let json = serde_json::to_string(visitor)?;
        *self.raw.lock().map_err(|_| StoreError::Poisoned)? = Some(json);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.raw.lock().map_err(|_| StoreError::Poisoned)? = None;
        Ok(())
    }
}
