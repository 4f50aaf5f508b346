//! # salonline-store
//!
//! Client-local persistence for the support widget.
//!
//! The widget owns exactly one durable record: the visitor identity
//! (name, email, phone and the active ticket id). It is stored as JSON under a
//! single well-known key in a small SQLite key/value table, the desktop
//! equivalent of browser local storage.

pub mod database;
pub mod identity;
pub mod local_storage;
pub mod migrations;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use identity::{IdentityStore, MemoryIdentityStore, SqliteIdentityStore};
