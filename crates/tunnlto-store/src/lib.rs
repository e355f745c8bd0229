//! tunnlto store - Tunnel Configuration Engine
//!
//! Persistent WireGuard tunnel configurations for a WireSock-driven VPN
//! client: storage with schema migration, profile import, and key handling.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      TunnelManager                       │
//! │   in-memory tunnels · selection · settings · id minting  │
//! └───────┬──────────────────────────────────────▲───────────┘
//!         │                                      │
//!         ▼                                      │ drafts
//! ┌───────────────┐   startup   ┌────────────┐   │
//! │  TunnelStore  │────────────▶│  Schema    │   │  ┌───────────────┐
//! │ whole-blob    │             │  Migrator  │   ├──│ ProfileImport │
//! │ read / write  │             └─────┬──────┘   │  └───────────────┘
//! └───────┬───────┘                   │          │  ┌───────────────┐
//!         │                           │          └──│  KeyPair      │
//!         ▼                           ▼             └───────────────┘
//! ┌──────────────────────────────────────────┐
//! │      KeyValueStore (memory / file)       │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! - **Injected persistence**: any [`KeyValueStore`] backs the store
//! - **Idempotent migrations**: pre-1.0 keys and split address fields are
//!   upgraded on every open, and a second run writes nothing
//! - **Tolerant parsing**: profile import and key derivation never abort
//!
//! # Security
//!
//! - Private keys are never printed by `Debug`
//! - Keys are generated from the OS random source

mod keys;
mod kv;
mod manager;
mod migration;
mod profile;
mod runner;
mod settings;
mod store;
mod tunnel;

pub use keys::{
    EncodedKeyPair, KEY_LEN, KeyError, KeyPair, PrivateKey, PublicKey, derive_public_key,
    generate_key_pair, is_valid_key,
};
pub use kv::{FileStore, KeyValueStore, KvError, MemoryStore};
pub use manager::TunnelManager;
pub use migration::{
    LEGACY_SELECTED_KEY, LEGACY_TUNNEL_PREFIX, LegacyTunnelV0, MigrationReport, SchemaMigrator,
    SchemaVersion, TunnelRecord, TunnelV1_0_0,
};
pub use profile::{ProfileField, ProfileImport, profile_name, render_wiresock_config};
pub use runner::{
    AutoConnect, RunnerError, TunnelRunner, TunnelStatus, WiresockState, WiresockStatus,
};
pub use settings::{DEFAULT_LOG_LIMIT, LogLevel, Settings};
pub use store::{
    CORRUPT_TUNNELS_KEY, SELECTED_TUNNEL_KEY, SETTINGS_KEY, StoreError, TUNNELS_KEY, TunnelStore,
};
pub use tunnel::{
    ID_ALPHABET, ID_LEN, Interface, Peer, RuleSet, Rules, SplitAddresses, Tunnel, ValidationError,
    generate_id, is_valid_id, split_addresses, split_apps_and_folders, split_endpoint,
};
