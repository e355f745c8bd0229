//! Process-wide settings record.
//!
//! Every field falls back to its default when absent, so records written by
//! older versions keep loading after new fields are added.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default number of log lines kept by the UI
pub const DEFAULT_LOG_LIMIT: u32 = 50;

/// Log level handed to the tunnel process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Debug,
    All,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::All => "all",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "all" => Ok(LogLevel::All),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub auto_start: bool,
    /// Empty, or the id of the tunnel to enable once the tunnel process is up
    #[serde(rename = "autoConnectTunnelID")]
    pub auto_connect_tunnel_id: String,
    pub log_level: LogLevel,
    pub start_minimized: bool,
    pub minimize_to_tray: bool,
    pub log_limit: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_start: false,
            auto_connect_tunnel_id: String::new(),
            log_level: LogLevel::Debug,
            start_minimized: false,
            minimize_to_tray: false,
            log_limit: DEFAULT_LOG_LIMIT,
        }
    }
}

impl Settings {
    /// The auto-connect tunnel id, if one is set
    pub fn auto_connect(&self) -> Option<&str> {
        Some(self.auto_connect_tunnel_id.as_str()).filter(|id| !id.is_empty())
    }
}
