use serde::{Deserialize, Serialize};

/// Top-level client settings container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientSettings {
    pub backend: BackendSettings,
    pub realtime: RealtimeSettings,
    pub logging: LoggingSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            backend: BackendSettings::default(),
            realtime: RealtimeSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Connection details for the hosted backing store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendSettings {
    /// Base URL of the hosted project, e.g. `https://abc.example.co`.
    pub url: String,
    /// Public (anonymous) API key sent with every request.
    pub anon_key: String,
    /// Table holding the bookmark rows.
    pub table: String,
    pub request_timeout_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            table: "bookmarks".to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// Change feed subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RealtimeSettings {
    /// Channel names are `{channel_prefix}-{user_id}`.
    pub channel_prefix: String,
    /// Capacity of the per-subscription event buffer.
    pub event_buffer: usize,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            channel_prefix: "bookmarks-realtime".to_string(),
            event_buffer: 256,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    /// One of `trace`, `debug`, `info`, `warn`, `error`.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
