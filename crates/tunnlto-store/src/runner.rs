//! Tunnel Process Boundary
//!
//! The external process that actually brings tunnels up is driven through
//! [`TunnelRunner`]. Requests are fire-and-forget; progress comes back
//! later as [`WiresockState`] events.
//!
//! ```text
//!  TunnelManager ──enable_tunnel──▶ TunnelRunner ──▶ tunnel process
//!        ▲                                                │
//!        └──────────── AutoConnect ◀── WiresockState ◀────┘
//! ```

use crate::kv::KeyValueStore;
use crate::manager::TunnelManager;
use crate::settings::LogLevel;
use crate::tunnel::Tunnel;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Tunnel process errors
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Tunnel process is not installed")]
    NotInstalled,

    #[error("Tunnel process rejected the request: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Requests to the tunnel process
pub trait TunnelRunner {
    /// Ask the process to bring `tunnel` up. Returns once the request is sent.
    fn enable_tunnel(&self, tunnel: &Tunnel, log_level: LogLevel) -> Result<(), RunnerError>;

    /// Ask the process to tear the active tunnel down.
    ///
    /// Returns on acknowledgement, not on teardown.
    fn disable_tunnel(&self) -> Result<(), RunnerError>;
}

/// Tunnel process lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WiresockStatus {
    Stopped,
    Starting,
    Running,
    Other(String),
}

impl From<String> for WiresockStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "STOPPED" => WiresockStatus::Stopped,
            "STARTING" => WiresockStatus::Starting,
            "RUNNING" => WiresockStatus::Running,
            _ => WiresockStatus::Other(s),
        }
    }
}

impl From<WiresockStatus> for String {
    fn from(status: WiresockStatus) -> Self {
        match status {
            WiresockStatus::Stopped => "STOPPED".to_string(),
            WiresockStatus::Starting => "STARTING".to_string(),
            WiresockStatus::Running => "RUNNING".to_string(),
            WiresockStatus::Other(s) => s,
        }
    }
}

/// Connection state of the active tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TunnelStatus {
    Connected,
    Connecting,
    Disconnected,
    Other(String),
}

impl From<String> for TunnelStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "CONNECTED" => TunnelStatus::Connected,
            "CONNECTING" => TunnelStatus::Connecting,
            "DISCONNECTED" => TunnelStatus::Disconnected,
            _ => TunnelStatus::Other(s),
        }
    }
}

impl From<TunnelStatus> for String {
    fn from(status: TunnelStatus) -> Self {
        match status {
            TunnelStatus::Connected => "CONNECTED".to_string(),
            TunnelStatus::Connecting => "CONNECTING".to_string(),
            TunnelStatus::Disconnected => "DISCONNECTED".to_string(),
            TunnelStatus::Other(s) => s,
        }
    }
}

/// State event published by the tunnel process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WiresockState {
    pub wiresock_status: WiresockStatus,
    pub tunnel_status: TunnelStatus,
    /// Id of the tunnel the process is handling, empty if none
    #[serde(default)]
    pub tunnel_id: String,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl WiresockState {
    pub fn is_connected_to(&self, id: &str) -> bool {
        self.tunnel_status == TunnelStatus::Connected && self.tunnel_id == id
    }
}

/// One-shot auto-connect trigger.
///
/// Fires on the first event reporting the process as stopped, then never
/// again for the life of the value.
#[derive(Debug, Default)]
pub struct AutoConnect {
    fired: bool,
}

impl AutoConnect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    /// Feed one state event.
    ///
    /// Returns the id of the tunnel that was enabled, if any.
    pub fn on_state<S, R>(
        &mut self,
        state: &WiresockState,
        manager: &TunnelManager<S>,
        runner: &R,
    ) -> Result<Option<String>, RunnerError>
    where
        S: KeyValueStore,
        R: TunnelRunner + ?Sized,
    {
        if self.fired || state.wiresock_status != WiresockStatus::Stopped {
            return Ok(None);
        }
        self.fired = true;

        let settings = manager.settings();
        let Some(id) = settings.auto_connect() else {
            debug!("No auto-connect tunnel configured");
            return Ok(None);
        };

        let Some(tunnel) = manager.get_tunnel(id) else {
            warn!("Auto-connect tunnel {} does not exist", id);
            return Ok(None);
        };

        info!("Auto-connecting tunnel {} ({:?})", tunnel.id, tunnel.name);
        runner.enable_tunnel(tunnel, settings.log_level)?;
        Ok(Some(tunnel.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use crate::settings::Settings;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingRunner {
        enabled: RefCell<Vec<(String, LogLevel)>>,
        disabled: RefCell<usize>,
    }

    impl TunnelRunner for RecordingRunner {
        fn enable_tunnel(&self, tunnel: &Tunnel, log_level: LogLevel) -> Result<(), RunnerError> {
            self.enabled.borrow_mut().push((tunnel.id.clone(), log_level));
            Ok(())
        }

        fn disable_tunnel(&self) -> Result<(), RunnerError> {
            *self.disabled.borrow_mut() += 1;
            Ok(())
        }
    }

    fn state(wiresock: &str, tunnel: &str, id: &str) -> WiresockState {
        WiresockState {
            wiresock_status: wiresock.to_string().into(),
            tunnel_status: tunnel.to_string().into(),
            tunnel_id: id.to_string(),
            logs: Vec::new(),
        }
    }

    fn manager_with_auto_connect(id: &str) -> TunnelManager<MemoryStore> {
        let mut manager = TunnelManager::load(MemoryStore::new()).unwrap();
        let mut tunnel = Tunnel::draft("ab12");
        tunnel.name = "home".to_string();
        manager.add_tunnel(tunnel).unwrap();
        manager
            .update_settings(Settings {
                auto_connect_tunnel_id: id.to_string(),
                log_level: LogLevel::All,
                ..Default::default()
            })
            .unwrap();
        manager
    }

    #[test]
    fn test_state_wire_format() {
        let json = concat!(
            r#"{"wiresock_status":"STOPPED","tunnel_status":"DISCONNECTED","#,
            r#""tunnel_id":"","logs":["started"]}"#,
        );
        let parsed: WiresockState = serde_json::from_str(json).unwrap();

        assert_eq!(parsed.wiresock_status, WiresockStatus::Stopped);
        assert_eq!(parsed.tunnel_status, TunnelStatus::Disconnected);
        assert_eq!(parsed.logs, vec!["started"]);
        assert_eq!(serde_json::to_string(&parsed).unwrap(), json);
    }

    #[test]
    fn test_unknown_status_is_kept() {
        let json = r#"{"wiresock_status":"PAUSED","tunnel_status":"ERROR"}"#;
        let parsed: WiresockState = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.wiresock_status, WiresockStatus::Other("PAUSED".to_string()));
        assert_eq!(parsed.tunnel_status, TunnelStatus::Other("ERROR".to_string()));
        assert_eq!(parsed.tunnel_id, "");
    }

    #[test]
    fn test_is_connected_to() {
        assert!(state("RUNNING", "CONNECTED", "ab12").is_connected_to("ab12"));
        assert!(!state("RUNNING", "CONNECTED", "ab12").is_connected_to("cd34"));
        assert!(!state("RUNNING", "CONNECTING", "ab12").is_connected_to("ab12"));
    }

    #[test]
    fn test_auto_connect_fires_once_on_stopped() {
        let manager = manager_with_auto_connect("ab12");
        let runner = RecordingRunner::default();
        let mut auto = AutoConnect::new();

        let starting = state("STARTING", "DISCONNECTED", "");
        let stopped = state("STOPPED", "DISCONNECTED", "");

        let fired = auto.on_state(&starting, &manager, &runner).unwrap();
        assert_eq!(fired, None);
        assert!(!auto.has_fired());

        let fired = auto.on_state(&stopped, &manager, &runner).unwrap();
        assert_eq!(fired.as_deref(), Some("ab12"));

        auto.on_state(&stopped, &manager, &runner).unwrap();
        assert_eq!(*runner.enabled.borrow(), vec![("ab12".to_string(), LogLevel::All)]);
        assert_eq!(*runner.disabled.borrow(), 0);
    }

    #[test]
    fn test_auto_connect_without_setting_still_latches() {
        let manager = TunnelManager::load(MemoryStore::new()).unwrap();
        let runner = RecordingRunner::default();
        let mut auto = AutoConnect::new();

        let stopped = state("STOPPED", "DISCONNECTED", "");
        let fired = auto.on_state(&stopped, &manager, &runner).unwrap();
        assert_eq!(fired, None);
        assert!(auto.has_fired());
        assert!(runner.enabled.borrow().is_empty());
    }
}
