//! Schema Migration
//!
//! Upgrades persisted tunnels from every historical shape to the current
//! one. Two passes run on every startup, in order:
//!
//! 1. **Pre-1.0 → 1.0.0**: each tunnel used to live under its own
//!    `tunnel-wireguard-*` key as a flat object. Those are rebuilt as 1.0.0
//!    records, given a fresh id, written into the collection, and the
//!    legacy key is removed.
//! 2. **1.0.0 → 1.0.1**: the single `interface.ipAddress` field is split
//!    into `ipv4Address` / `ipv6Address`.
//!
//! Both passes decide what to do from what is stored, so running them on
//! already-migrated data writes nothing.
//!
//! ```text
//!  LegacyTunnelV0 ──upgrade(id)──▶ TunnelV1_0_0 ──upgrade()──▶ Tunnel (1.0.1)
//! ```

use crate::kv::KeyValueStore;
use crate::store::{StoreError, TUNNELS_KEY};
use crate::tunnel::{
    self, Interface, Peer, RuleSet, Rules, Tunnel, join_non_empty, null_as_default,
    split_addresses, split_endpoint,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, info, warn};

/// Prefix of the per-tunnel keys written before 1.0
pub const LEGACY_TUNNEL_PREFIX: &str = "tunnel-wireguard-";

/// Pre-1.0 selection key, superseded by `selectedTunnelID`
pub const LEGACY_SELECTED_KEY: &str = "selectedTunnel";

/// Persisted record layouts, oldest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SchemaVersion {
    /// One flat object per key
    V0,
    /// Nested record, single `interface.ipAddress`
    V1_0_0,
    /// Nested record, split IPv4 / IPv6 addresses
    V1_0_1,
}

impl SchemaVersion {
    pub const CURRENT: SchemaVersion = SchemaVersion::V1_0_1;
}

/// Flat pre-1.0 tunnel. Any field may be missing or null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LegacyTunnelV0 {
    pub name: Option<String>,
    pub private_key: Option<String>,
    /// `address/mask` list
    pub interface_address: Option<String>,
    pub dns: Option<String>,
    pub mtu: Option<String>,
    pub public_key: Option<String>,
    pub preshared_key: Option<String>,
    /// `host:port`
    pub endpoint: Option<String>,
    pub allowed_apps: Option<String>,
    pub disallowed_apps: Option<String>,
    #[serde(rename = "allowedIPs")]
    pub allowed_ips: Option<String>,
    #[serde(rename = "disallowedIPs")]
    pub disallowed_ips: Option<String>,
}

impl LegacyTunnelV0 {
    /// Rebuild as a 1.0.0 record under `id`
    pub fn upgrade(self, id: String) -> TunnelV1_0_0 {
        let address = self.interface_address.unwrap_or_default();
        let ip_address = join_non_empty(
            address
                .split(',')
                .map(|entry| entry.split('/').next().unwrap_or_default()),
        );
        let (endpoint, port) = split_endpoint(&self.endpoint.unwrap_or_default());

        TunnelV1_0_0 {
            id,
            name: self.name.unwrap_or_default(),
            interface: InterfaceV1_0_0 {
                ip_address,
                port: String::new(),
                private_key: self.private_key.unwrap_or_default(),
                dns: self.dns.unwrap_or_default(),
                mtu: self.mtu.unwrap_or_default(),
            },
            peer: Peer {
                endpoint,
                port,
                public_key: self.public_key.unwrap_or_default(),
                preshared_key: self.preshared_key.unwrap_or_default(),
                persistent_keepalive: String::new(),
            },
            rules: Rules {
                allowed: RuleSet {
                    apps: self.allowed_apps.unwrap_or_default(),
                    folders: String::new(),
                    ip_addresses: self.allowed_ips.unwrap_or_default(),
                },
                disallowed: RuleSet {
                    apps: self.disallowed_apps.unwrap_or_default(),
                    folders: String::new(),
                    ip_addresses: self.disallowed_ips.unwrap_or_default(),
                },
            },
        }
    }
}

/// 1.0.0 interface with a single address field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InterfaceV1_0_0 {
    #[serde(deserialize_with = "null_as_default")]
    pub ip_address: String,
    #[serde(deserialize_with = "null_as_default")]
    pub port: String,
    #[serde(deserialize_with = "null_as_default")]
    pub private_key: String,
    #[serde(deserialize_with = "null_as_default")]
    pub dns: String,
    #[serde(deserialize_with = "null_as_default")]
    pub mtu: String,
}

/// 1.0.0 tunnel record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelV1_0_0 {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub interface: InterfaceV1_0_0,
    #[serde(deserialize_with = "null_as_default")]
    pub peer: Peer,
    #[serde(deserialize_with = "null_as_default")]
    pub rules: Rules,
}

impl TunnelV1_0_0 {
    /// Split the address field into IPv4 / IPv6
    pub fn upgrade(self) -> Tunnel {
        let addresses = split_addresses(&self.interface.ip_address);

        Tunnel {
            id: self.id,
            name: self.name,
            interface: Interface {
                ipv4_address: addresses.ipv4,
                ipv6_address: addresses.ipv6,
                port: self.interface.port,
                private_key: self.interface.private_key,
                dns: self.interface.dns,
                mtu: self.interface.mtu,
            },
            peer: self.peer,
            rules: self.rules,
        }
    }
}

/// A stored tunnel in any historical shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelRecord {
    /// Legacy record together with the id it is being given
    V0 { id: String, legacy: LegacyTunnelV0 },
    V1_0_0(TunnelV1_0_0),
    V1_0_1(Tunnel),
}

impl TunnelRecord {
    /// Decode a collection entry, telling shapes apart by field presence
    pub fn from_collection_value(value: Value) -> Result<Self, serde_json::Error> {
        let has_single_address = value
            .get("interface")
            .and_then(Value::as_object)
            .is_some_and(|interface| interface.contains_key("ipAddress"));

        if has_single_address {
            serde_json::from_value(value).map(TunnelRecord::V1_0_0)
        } else {
            serde_json::from_value(value).map(TunnelRecord::V1_0_1)
        }
    }

    pub fn version(&self) -> SchemaVersion {
        match self {
            TunnelRecord::V0 { .. } => SchemaVersion::V0,
            TunnelRecord::V1_0_0(_) => SchemaVersion::V1_0_0,
            TunnelRecord::V1_0_1(_) => SchemaVersion::V1_0_1,
        }
    }

    /// Run every remaining upgrade step
    pub fn into_current(self) -> Tunnel {
        match self {
            TunnelRecord::V0 { id, legacy } => legacy.upgrade(id).upgrade(),
            TunnelRecord::V1_0_0(record) => record.upgrade(),
            TunnelRecord::V1_0_1(tunnel) => tunnel,
        }
    }
}

/// What a migration run changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Legacy keys turned into collection records
    pub legacy_imported: usize,
    /// Legacy keys left in place because they could not be decoded
    pub legacy_skipped: usize,
    /// Records whose address field was split
    pub addresses_split: usize,
    /// Obsolete keys removed
    pub obsolete_keys_removed: usize,
}

impl MigrationReport {
    /// True if anything was written
    pub fn changed(&self) -> bool {
        self.legacy_imported > 0 || self.addresses_split > 0 || self.obsolete_keys_removed > 0
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} legacy tunnels imported, {} skipped, {} address fields split, \
             {} obsolete keys removed",
            self.legacy_imported,
            self.legacy_skipped,
            self.addresses_split,
            self.obsolete_keys_removed
        )
    }
}

/// Runs the upgrade passes against a key-value store
pub struct SchemaMigrator;

impl SchemaMigrator {
    /// Run both passes. Safe to call on every startup.
    pub fn run<S: KeyValueStore + ?Sized>(kv: &mut S) -> Result<MigrationReport, StoreError> {
        let mut report = MigrationReport::default();

        let Some(mut collection) = Self::read_collection(kv)? else {
            warn!("Tunnel collection is unreadable, skipping schema migration");
            return Ok(report);
        };

        Self::migrate_legacy_keys(kv, &mut collection, &mut report)?;
        Self::split_address_fields(kv, &mut collection, &mut report)?;

        Ok(report)
    }

    /// The raw collection, or `None` if the stored blob is not a JSON object
    fn read_collection<S: KeyValueStore + ?Sized>(
        kv: &S,
    ) -> Result<Option<Map<String, Value>>, StoreError> {
        match kv.get(TUNNELS_KEY)? {
            None => Ok(Some(Map::new())),
            Some(blob) => Ok(serde_json::from_str(&blob).ok()),
        }
    }

    fn write_collection<S: KeyValueStore + ?Sized>(
        kv: &mut S,
        collection: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        kv.set(TUNNELS_KEY, &serde_json::to_string(collection)?)?;
        Ok(())
    }

    /// Pre-1.0 → 1.0.0
    fn migrate_legacy_keys<S: KeyValueStore + ?Sized>(
        kv: &mut S,
        collection: &mut Map<String, Value>,
        report: &mut MigrationReport,
    ) -> Result<(), StoreError> {
        let keys = kv.keys()?;

        if keys.iter().any(|k| k == LEGACY_SELECTED_KEY) {
            kv.remove(LEGACY_SELECTED_KEY)?;
            report.obsolete_keys_removed += 1;
        }

        let legacy_keys: Vec<String> = keys
            .into_iter()
            .filter(|k| k.starts_with(LEGACY_TUNNEL_PREFIX))
            .collect();

        if legacy_keys.is_empty() {
            debug!("No pre-1.0 tunnels found");
            return Ok(());
        }

        let mut rng = rand::thread_rng();
        let mut minted: HashSet<String> = HashSet::new();

        for key in legacy_keys {
            let Some(blob) = kv.get(&key)? else { continue };

            let legacy: LegacyTunnelV0 = match serde_json::from_str(&blob) {
                Ok(legacy) => legacy,
                Err(e) => {
                    warn!("Leaving undecodable legacy tunnel {} in place: {}", key, e);
                    report.legacy_skipped += 1;
                    continue;
                }
            };

            let id = tunnel::generate_id(&mut rng, |id| {
                collection.contains_key(id) || minted.contains(id)
            })
            .ok_or(StoreError::IdSpaceExhausted)?;
            minted.insert(id.clone());

            let record = legacy.upgrade(id.clone());
            info!("Migrated pre-1.0 tunnel \"{}\" as {}", record.name, id);

            collection.insert(id, serde_json::to_value(&record)?);
            Self::write_collection(kv, collection)?;
            kv.remove(&key)?;
            report.legacy_imported += 1;
        }

        Ok(())
    }

    /// 1.0.0 → 1.0.1
    fn split_address_fields<S: KeyValueStore + ?Sized>(
        kv: &mut S,
        collection: &mut Map<String, Value>,
        report: &mut MigrationReport,
    ) -> Result<(), StoreError> {
        let mut upgraded = Vec::new();

        for (id, value) in collection.iter() {
            match TunnelRecord::from_collection_value(value.clone()) {
                Ok(record @ TunnelRecord::V1_0_0(_)) => {
                    let mut tunnel = record.into_current();
                    if tunnel.id.is_empty() {
                        tunnel.id = id.clone();
                    }
                    info!("Split address field of tunnel \"{}\" ({})", tunnel.name, id);
                    upgraded.push((id.clone(), tunnel));
                }
                Ok(_) => {}
                Err(e) => warn!("Cannot classify tunnel record {}: {}", id, e),
            }
        }

        if upgraded.is_empty() {
            return Ok(());
        }

        report.addresses_split = upgraded.len();
        for (id, tunnel) in upgraded {
            collection.insert(id, serde_json::to_value(&tunnel)?);
        }
        Self::write_collection(kv, collection)
    }
}
