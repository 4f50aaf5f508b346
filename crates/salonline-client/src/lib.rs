//! # salonline-client
//!
//! Conversation engine of the Salonline support chat widget: keeps a
//! visitor's transcript in sync with the operator inbox, tracks unread
//! replies, and drives the resolve/continue/reset lifecycle of a ticket.

pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod inbox;
pub mod notify;
pub mod reconcile;
pub mod resolution;
pub mod scheduler;
pub mod transcript;
pub mod widget;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::WidgetConfig;
pub use conversation::WidgetSnapshot;
pub use error::{AdapterError, ClientError};
pub use events::WidgetEvent;
pub use widget::{spawn, WidgetHandle};

/// Install the `fmt` subscriber, honouring `RUST_LOG`.
///
/// Logs go to stderr so stdout stays free for the host.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("salonline_client=debug,salonline_store=info,warn"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
