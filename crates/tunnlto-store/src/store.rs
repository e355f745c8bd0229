//! Tunnel Store
//!
//! Maps the tunnel collection, the selected-tunnel pointer and the settings
//! record onto an injected [`KeyValueStore`].
//!
//! # Layout
//!
//! | Key | Value |
//! |-----|-------|
//! | `tunnels` | JSON object, tunnel id → tunnel |
//! | `selectedTunnelID` | plain tunnel id |
//! | `settings` | JSON settings record |
//!
//! Every write replaces a whole value. There is no partial-record update.

use crate::kv::{KeyValueStore, KvError};
use crate::migration::{MigrationReport, SchemaMigrator};
use crate::settings::Settings;
use crate::tunnel::{Tunnel, ValidationError};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Key holding the whole tunnel collection
pub const TUNNELS_KEY: &str = "tunnels";

/// Key holding the selected tunnel id
pub const SELECTED_TUNNEL_KEY: &str = "selectedTunnelID";

/// Key holding the settings record
pub const SETTINGS_KEY: &str = "settings";

/// Where an unreadable collection blob is parked before it can be overwritten
pub const CORRUPT_TUNNELS_KEY: &str = "tunnels.corrupt";

/// Tunnel store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Kv(#[from] KvError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("A tunnel named \"{0}\" already exists")]
    DuplicateName(String),

    #[error("Unknown tunnel: {0}")]
    UnknownTunnel(String),

    #[error("No free tunnel id left")]
    IdSpaceExhausted,

    #[error("Invalid tunnel: {0}")]
    Invalid(#[from] ValidationError),
}

/// Persistent tunnel store.
///
/// Opening the store runs the schema migrations, so every record read back
/// through it is in the current shape.
pub struct TunnelStore<S: KeyValueStore> {
    kv: S,
    migration: MigrationReport,
    /// Raw collection entries that failed to decode, written back on save
    unreadable: BTreeMap<String, Value>,
}

impl<S: KeyValueStore> TunnelStore<S> {
    /// Open the store, upgrading older records first
    pub fn open(mut kv: S) -> Result<Self, StoreError> {
        let migration = SchemaMigrator::run(&mut kv)?;
        if migration.changed() {
            info!("Schema migration finished: {}", migration);
        } else {
            debug!("Schema up to date");
        }

        Ok(Self {
            kv,
            migration,
            unreadable: BTreeMap::new(),
        })
    }

    /// What the startup migration did
    pub fn migration_report(&self) -> &MigrationReport {
        &self.migration
    }

    /// Load every tunnel, keyed by id.
    ///
    /// An unreadable collection counts as empty; its raw text is copied to
    /// [`CORRUPT_TUNNELS_KEY`] first. Individual records that fail to decode
    /// are left out of the result but kept as raw JSON, and
    /// [`Self::save_tunnels`] writes them back unchanged.
    pub fn load_tunnels(&mut self) -> Result<BTreeMap<String, Tunnel>, StoreError> {
        self.unreadable.clear();

        let Some(blob) = self.kv.get(TUNNELS_KEY)? else {
            return Ok(BTreeMap::new());
        };

        let raw: BTreeMap<String, Value> = match serde_json::from_str(&blob) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Tunnel collection is unreadable ({}), starting empty", e);
                self.kv.set(CORRUPT_TUNNELS_KEY, &blob)?;
                return Ok(BTreeMap::new());
            }
        };

        let mut tunnels = BTreeMap::new();
        for (id, value) in raw {
            match serde_json::from_value::<Tunnel>(value.clone()) {
                Ok(mut tunnel) => {
                    if tunnel.id != id {
                        warn!("Tunnel stored under {} claims id {:?}, using {}", id, tunnel.id, id);
                        tunnel.id = id.clone();
                    }
                    tunnels.insert(id, tunnel);
                }
                Err(e) => {
                    warn!("Keeping unreadable tunnel record {} as is: {}", id, e);
                    self.unreadable.insert(id, value);
                }
            }
        }

        debug!("Loaded {} tunnels", tunnels.len());
        Ok(tunnels)
    }

    /// Replace the stored collection.
    ///
    /// Unreadable records from the last load are written back, unless a
    /// tunnel in `tunnels` now uses their id.
    pub fn save_tunnels(&mut self, tunnels: &BTreeMap<String, Tunnel>) -> Result<(), StoreError> {
        let mut collection: Map<String, Value> = self
            .unreadable
            .iter()
            .filter(|(id, _)| !tunnels.contains_key(*id))
            .map(|(id, value)| (id.clone(), value.clone()))
            .collect();
        for (id, tunnel) in tunnels {
            collection.insert(id.clone(), serde_json::to_value(tunnel)?);
        }

        let blob = serde_json::to_string(&collection)?;
        self.kv.set(TUNNELS_KEY, &blob)?;
        self.unreadable.retain(|id, _| !tunnels.contains_key(id));

        debug!("Saved {} tunnels", tunnels.len());
        Ok(())
    }

    /// Ids of stored records that could not be decoded
    pub fn unreadable_ids(&self) -> impl Iterator<Item = &str> {
        self.unreadable.keys().map(String::as_str)
    }

    pub fn is_unreadable(&self, id: &str) -> bool {
        self.unreadable.contains_key(id)
    }

    /// The selected tunnel id, if any
    pub fn selected_tunnel_id(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .kv
            .get(SELECTED_TUNNEL_KEY)?
            .filter(|id| !id.is_empty()))
    }

    pub fn set_selected_tunnel_id(&mut self, id: &str) -> Result<(), StoreError> {
        self.kv.set(SELECTED_TUNNEL_KEY, id)?;
        Ok(())
    }

    pub fn clear_selected_tunnel_id(&mut self) -> Result<(), StoreError> {
        self.kv.remove(SELECTED_TUNNEL_KEY)?;
        Ok(())
    }

    /// Load settings, falling back to defaults.
    ///
    /// Missing fields take their defaults; an unreadable record is replaced
    /// by [`Settings::default`] on the next save.
    pub fn load_settings(&self) -> Result<Settings, StoreError> {
        let Some(blob) = self.kv.get(SETTINGS_KEY)? else {
            return Ok(Settings::default());
        };

        Ok(serde_json::from_str(&blob).unwrap_or_else(|e| {
            warn!("Settings record is unreadable ({}), using defaults", e);
            Settings::default()
        }))
    }

    pub fn save_settings(&mut self, settings: &Settings) -> Result<(), StoreError> {
        let blob = serde_json::to_string(settings)?;
        self.kv.set(SETTINGS_KEY, &blob)?;
        Ok(())
    }

    /// Borrow the underlying key-value store
    pub fn kv(&self) -> &S {
        &self.kv
    }

    /// Give back the underlying key-value store
    pub fn into_inner(self) -> S {
        self.kv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use crate::settings::LogLevel;
    use crate::tunnel::Rules;

    fn sample(id: &str, name: &str) -> Tunnel {
        let mut tunnel = Tunnel::draft(id);
        tunnel.name = name.to_string();
        tunnel.interface.ipv4_address = "10.0.0.2".to_string();
        tunnel.interface.ipv6_address = "fd00::2".to_string();
        tunnel.interface.private_key = "cHJpdmF0ZQ==".to_string();
        tunnel.peer.endpoint = "vpn.example.com".to_string();
        tunnel.peer.port = "51820".to_string();
        tunnel.peer.persistent_keepalive = "25".to_string();
        tunnel.rules.allowed.apps = "firefox.exe".to_string();
        tunnel.rules.disallowed.ip_addresses = "192.168.0.0/16".to_string();
        tunnel
    }

    #[test]
    fn test_collection_survives_reopen() {
        let mut tunnels = BTreeMap::new();
        tunnels.insert("ab12".to_string(), sample("ab12", "home"));
        tunnels.insert("zz99".to_string(), sample("zz99", "work"));

        let mut store = TunnelStore::open(MemoryStore::new()).unwrap();
        store.save_tunnels(&tunnels).unwrap();

        let mut reopened = TunnelStore::open(store.into_inner()).unwrap();
        assert!(!reopened.migration_report().changed());
        assert_eq!(reopened.load_tunnels().unwrap(), tunnels);
    }

    #[test]
    fn test_empty_store() {
        let mut store = TunnelStore::open(MemoryStore::new()).unwrap();
        assert!(store.load_tunnels().unwrap().is_empty());
        assert_eq!(store.selected_tunnel_id().unwrap(), None);
        assert_eq!(store.load_settings().unwrap(), Settings::default());
    }

    #[test]
    fn test_corrupt_collection_is_parked() {
        let kv = MemoryStore::with_entries([(TUNNELS_KEY, "{\"ab12\": ")]);
        let mut store = TunnelStore::open(kv).unwrap();

        assert!(store.load_tunnels().unwrap().is_empty());
        assert_eq!(
            store.kv().get(CORRUPT_TUNNELS_KEY).unwrap().as_deref(),
            Some("{\"ab12\": ")
        );
    }

    #[test]
    fn test_bad_record_is_kept_and_key_wins() {
        let kv = MemoryStore::with_entries([(
            TUNNELS_KEY,
            r#"{"ab12":{"id":"xxxx","name":"home"},"cd34":42}"#,
        )]);
        let mut store = TunnelStore::open(kv).unwrap();

        let tunnels = store.load_tunnels().unwrap();
        assert_eq!(tunnels.len(), 1);
        assert_eq!(tunnels["ab12"].id, "ab12");
        assert_eq!(tunnels["ab12"].name, "home");
        assert_eq!(store.unreadable_ids().collect::<Vec<_>>(), vec!["cd34"]);
    }

    #[test]
    fn test_unreadable_record_survives_save() {
        let kv = MemoryStore::with_entries([(
            TUNNELS_KEY,
            r#"{"ab12":{"id":"ab12","name":"home"},"cd34":{"name":["not","a","string"]}}"#,
        )]);
        let mut store = TunnelStore::open(kv).unwrap();

        let mut tunnels = store.load_tunnels().unwrap();
        tunnels.insert("ef56".to_string(), sample("ef56", "work"));
        store.save_tunnels(&tunnels).unwrap();

        let mut reopened = TunnelStore::open(store.into_inner()).unwrap();
        assert_eq!(reopened.load_tunnels().unwrap(), tunnels);
        assert!(reopened.is_unreadable("cd34"));

        let raw: Value = serde_json::from_str(&reopened.kv().get(TUNNELS_KEY).unwrap().unwrap())
            .unwrap();
        assert_eq!(raw["cd34"]["name"], serde_json::json!(["not", "a", "string"]));
    }

    #[test]
    fn test_tunnel_saved_over_unreadable_id_replaces_it() {
        let kv = MemoryStore::with_entries([(TUNNELS_KEY, r#"{"cd34":42}"#)]);
        let mut store = TunnelStore::open(kv).unwrap();

        let mut tunnels = store.load_tunnels().unwrap();
        tunnels.insert("cd34".to_string(), sample("cd34", "work"));
        store.save_tunnels(&tunnels).unwrap();
        assert!(!store.is_unreadable("cd34"));

        tunnels.clear();
        store.save_tunnels(&tunnels).unwrap();
        assert_eq!(store.kv().get(TUNNELS_KEY).unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn test_null_fields_decode_as_empty() {
        let kv = MemoryStore::with_entries([(
            TUNNELS_KEY,
            r#"{"ab12":{"id":"ab12","name":"home","interface":{"ipv4Address":"10.0.0.2","dns":null},
                "peer":{"endpoint":"vpn.example.com","presharedKey":null},"rules":null}}"#,
        )]);
        let mut store = TunnelStore::open(kv).unwrap();

        let tunnels = store.load_tunnels().unwrap();
        assert_eq!(tunnels["ab12"].interface.dns, "");
        assert_eq!(tunnels["ab12"].peer.preshared_key, "");
        assert_eq!(tunnels["ab12"].rules, Rules::default());
        assert_eq!(store.unreadable_ids().count(), 0);
    }

    #[test]
    fn test_selected_tunnel_id() {
        let mut store = TunnelStore::open(MemoryStore::new()).unwrap();

        store.set_selected_tunnel_id("ab12").unwrap();
        assert_eq!(store.selected_tunnel_id().unwrap().as_deref(), Some("ab12"));

        store.clear_selected_tunnel_id().unwrap();
        assert_eq!(store.selected_tunnel_id().unwrap(), None);

        store.set_selected_tunnel_id("").unwrap();
        assert_eq!(store.selected_tunnel_id().unwrap(), None);
    }

    #[test]
    fn test_settings_round_trip_and_fallback() {
        let mut store = TunnelStore::open(MemoryStore::new()).unwrap();
        let settings = Settings {
            auto_start: true,
            log_level: LogLevel::All,
            ..Default::default()
        };
        store.save_settings(&settings).unwrap();
        assert_eq!(store.load_settings().unwrap(), settings);

        let kv = MemoryStore::with_entries([(SETTINGS_KEY, r#"{"logLevel":"verbose"}"#)]);
        let store = TunnelStore::open(kv).unwrap();
        assert_eq!(store.load_settings().unwrap(), Settings::default());
    }
}
