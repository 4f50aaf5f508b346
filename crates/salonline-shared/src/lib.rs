//! # salonline-shared
//!
//! Types shared by the support-chat store and client: visitor identity,
//! transcript messages, the wire format spoken with the operator inbox, and
//! the codec that turns raw message text into typed content.

pub mod codec;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use types::*;
