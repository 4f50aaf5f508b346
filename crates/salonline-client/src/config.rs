//! Widget configuration loaded from environment variables.
//!
//! Every setting has a default so the widget can start with zero
//! configuration; without a backend URL it runs against an in-memory inbox.

use std::path::PathBuf;
use std::time::Duration;

use salonline_shared::constants::{
    BACKGROUND_POLL_INTERVAL, DEFAULT_SOURCE, FOREGROUND_POLL_INTERVAL, RESOLUTION_COUNTDOWN_SECS,
};

#[derive(Debug, Clone)]
pub struct WidgetConfig {
    /// Base URL of the backend exposing the support functions.
    /// Env: `SALONLINE_BACKEND_URL`
    /// Default: none (in-memory inbox).
    pub backend_url: Option<String>,

    /// Anonymous API key sent as `apikey` and bearer token.
    /// Env: `SALONLINE_API_KEY`
    pub api_key: Option<String>,

    /// Business the widget is embedded for.
    /// Env: `SALONLINE_COMPANY_ID`
    pub company_id: Option<String>,

    /// `source` recorded on tickets the widget opens.
    /// Env: `SALONLINE_SOURCE`
    /// Default: `"widget"`
    pub source: String,

    /// Env: `SALONLINE_FOREGROUND_POLL_SECS`
    /// Default: 5 s
    pub foreground_interval: Duration,

    /// Env: `SALONLINE_BACKGROUND_POLL_SECS`
    /// Default: 10 s
    pub background_interval: Duration,

    /// Seconds a resolved conversation stays visible before it resets.
    /// Env: `SALONLINE_RESOLUTION_COUNTDOWN_SECS`
    /// Default: 15
    pub countdown_secs: u32,

    /// Directory holding `widget.db`.
    /// Env: `SALONLINE_DATA_DIR`
    /// Default: platform data directory.
    pub data_dir: Option<PathBuf>,

    /// Whether to ring the audible cue on new operator messages.
    /// Env: `SALONLINE_CHIME` (true/false)
    /// Default: `true`
    pub chime_enabled: bool,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            api_key: None,
            company_id: None,
            source: DEFAULT_SOURCE.to_string(),
            foreground_interval: FOREGROUND_POLL_INTERVAL,
            background_interval: BACKGROUND_POLL_INTERVAL,
            countdown_secs: RESOLUTION_COUNTDOWN_SECS,
            data_dir: None,
            chime_enabled: true,
        }
    }
}

impl WidgetConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = var("SALONLINE_BACKEND_URL").filter(|v| !v.trim().is_empty()) {
            config.backend_url = Some(url.trim().to_string());
        }

        if let Some(key) = var("SALONLINE_API_KEY").filter(|v| !v.is_empty()) {
            config.api_key = Some(key);
        }

        if let Some(id) = var("SALONLINE_COMPANY_ID").filter(|v| !v.is_empty()) {
            config.company_id = Some(id);
        }

        if let Some(source) = var("SALONLINE_SOURCE").filter(|v| !v.is_empty()) {
            config.source = source;
        }

        if let Some(secs) = parse_positive(&var, "SALONLINE_FOREGROUND_POLL_SECS") {
            config.foreground_interval = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_positive(&var, "SALONLINE_BACKGROUND_POLL_SECS") {
            config.background_interval = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_positive(&var, "SALONLINE_RESOLUTION_COUNTDOWN_SECS") {
            config.countdown_secs = u32::try_from(secs).unwrap_or(RESOLUTION_COUNTDOWN_SECS);
        }

        if let Some(dir) = var("SALONLINE_DATA_DIR").filter(|v| !v.is_empty()) {
            config.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(val) = var("SALONLINE_CHIME") {
            config.chime_enabled = val != "false" && val != "0";
        }

        config
    }
}

fn parse_positive(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<u64> {
    let raw = var(name)?;
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::warn!(var = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}
