use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "Salonline";

/// Key under which the visitor identity record is persisted locally
pub const IDENTITY_STORAGE_KEY: &str = "salonline.support.identity";

/// Reserved id of the client-only welcome banner. Never issued by the server.
pub const WELCOME_MESSAGE_ID: &str = "welcome";

/// Prefix of ids given to optimistic, not yet acknowledged visitor messages
pub const LOCAL_MESSAGE_PREFIX: &str = "local-";

/// Token an operator message starts with when it resolves the ticket
pub const RESOLUTION_SENTINEL: &str = "[[resolved]]";

/// Poll cadence while the conversation view is open
pub const FOREGROUND_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Poll cadence while the view is closed (unread tracking only)
pub const BACKGROUND_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Seconds a resolved conversation stays on screen before resetting
pub const RESOLUTION_COUNTDOWN_SECS: u32 = 15;

/// Countdown tick period
pub const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Default `source` reported when the widget opens a ticket
pub const DEFAULT_SOURCE: &str = "widget";
