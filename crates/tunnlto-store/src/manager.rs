//! Tunnel Manager
//!
//! In-memory view over [`TunnelStore`] used by the rest of the application.
//! Every mutation is written back through the store before it returns.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut manager = TunnelManager::load(FileStore::open(data_dir)?)?;
//!
//! // Import a profile and save it under a fresh id
//! let tunnel = manager.import_profile("office.conf", &text)?;
//! manager.save_tunnel(tunnel)?;
//!
//! for tunnel in manager.tunnels() {
//!     println!("{} {}", tunnel.id, tunnel.name);
//! }
//! ```

use crate::kv::KeyValueStore;
use crate::profile::ProfileImport;
use crate::settings::Settings;
use crate::store::{StoreError, TunnelStore};
use crate::tunnel::{Tunnel, generate_id};
use rand::Rng;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Tunnel collection, selection and settings, kept in sync with storage
pub struct TunnelManager<S: KeyValueStore> {
    store: TunnelStore<S>,
    tunnels: BTreeMap<String, Tunnel>,
    selected: Option<String>,
    settings: Settings,
}

impl<S: KeyValueStore> TunnelManager<S> {
    /// Open the store (migrating it) and load everything into memory.
    ///
    /// A stored selection that no longer names a tunnel is cleared.
    pub fn load(kv: S) -> Result<Self, StoreError> {
        let mut store = TunnelStore::open(kv)?;
        let tunnels = store.load_tunnels()?;
        let settings = store.load_settings()?;

        let mut selected = store.selected_tunnel_id()?;
        if let Some(id) = selected.as_deref() {
            if !tunnels.contains_key(id) {
                warn!("Selected tunnel {} no longer exists, clearing selection", id);
                store.clear_selected_tunnel_id()?;
                selected = None;
            }
        }

        info!("Loaded {} tunnels", tunnels.len());
        Ok(Self {
            store,
            tunnels,
            selected,
            settings,
        })
    }

    pub fn get_tunnel(&self, id: &str) -> Option<&Tunnel> {
        self.tunnels.get(id)
    }

    /// Ids of every tunnel, in id order
    pub fn get_tunnel_id_list(&self) -> Vec<String> {
        self.tunnels.keys().cloned().collect()
    }

    /// Names of every tunnel, in id order
    pub fn get_tunnel_names(&self) -> Vec<String> {
        self.tunnels.values().map(|t| t.name.clone()).collect()
    }

    pub fn tunnels(&self) -> impl Iterator<Item = &Tunnel> {
        self.tunnels.values()
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }

    /// Insert or replace by id and persist the collection.
    ///
    /// No field or name checks happen here; see [`Self::save_tunnel`]. If the
    /// write fails the in-memory collection is left as it was.
    pub fn add_tunnel(&mut self, tunnel: Tunnel) -> Result<(), StoreError> {
        debug!("Storing tunnel {} ({:?})", tunnel.id, tunnel.name);
        let id = tunnel.id.clone();
        let previous = self.tunnels.insert(id.clone(), tunnel);

        if let Err(e) = self.store.save_tunnels(&self.tunnels) {
            match previous {
                Some(previous) => self.tunnels.insert(id, previous),
                None => self.tunnels.remove(&id),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Validate, check the name against every other tunnel, then store.
    pub fn save_tunnel(&mut self, tunnel: Tunnel) -> Result<(), StoreError> {
        tunnel.validate()?;
        if self.is_name_taken(&tunnel.name, &tunnel.id) {
            return Err(StoreError::DuplicateName(tunnel.name));
        }
        self.add_tunnel(tunnel)
    }

    /// Delete by id and persist.
    ///
    /// Clears the selection and the auto-connect setting when they point at
    /// the removed tunnel. An unknown id changes nothing.
    pub fn remove_tunnel(&mut self, id: &str) -> Result<(), StoreError> {
        let Some(removed) = self.tunnels.remove(id) else {
            debug!("Remove of unknown tunnel {} ignored", id);
            return Ok(());
        };
        if let Err(e) = self.store.save_tunnels(&self.tunnels) {
            self.tunnels.insert(id.to_string(), removed);
            return Err(e);
        }

        if self.selected.as_deref() == Some(id) {
            self.clear_selection()?;
        }
        if self.settings.auto_connect() == Some(id) {
            info!("Auto-connect tunnel {} removed, disabling auto-connect", id);
            let mut settings = self.settings.clone();
            settings.auto_connect_tunnel_id.clear();
            self.store.save_settings(&settings)?;
            self.settings = settings;
        }

        info!("Removed tunnel {}", id);
        Ok(())
    }

    /// True if a tunnel other than `excluding_id` is called exactly `name`
    pub fn is_name_taken(&self, name: &str, excluding_id: &str) -> bool {
        self.tunnels
            .values()
            .any(|t| t.id != excluding_id && t.name == name)
    }

    /// A fresh id not used by any stored record, readable or not
    pub fn generate_tunnel_id(&self) -> Result<String, StoreError> {
        self.generate_tunnel_id_with(&mut rand::thread_rng())
    }

    pub fn generate_tunnel_id_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<String, StoreError> {
        generate_id(rng, |id| self.tunnels.contains_key(id) || self.store.is_unreadable(id))
            .ok_or(StoreError::IdSpaceExhausted)
    }

    /// An empty tunnel under a fresh id. Not persisted.
    pub fn new_draft(&self) -> Result<Tunnel, StoreError> {
        Ok(Tunnel::draft(self.generate_tunnel_id()?))
    }

    /// Parse a profile into a draft under a fresh id. Not persisted.
    pub fn import_profile(&self, file_name: &str, text: &str) -> Result<Tunnel, StoreError> {
        let id = self.generate_tunnel_id()?;
        Ok(ProfileImport::parse(file_name, text).to_tunnel(id))
    }

    pub fn selected_tunnel_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected_tunnel(&self) -> Option<&Tunnel> {
        self.selected.as_deref().and_then(|id| self.tunnels.get(id))
    }

    pub fn select_tunnel(&mut self, id: &str) -> Result<(), StoreError> {
        if !self.tunnels.contains_key(id) {
            return Err(StoreError::UnknownTunnel(id.to_string()));
        }
        self.store.set_selected_tunnel_id(id)?;
        self.selected = Some(id.to_string());
        Ok(())
    }

    pub fn clear_selection(&mut self) -> Result<(), StoreError> {
        self.store.clear_selected_tunnel_id()?;
        self.selected = None;
        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the settings record.
    ///
    /// A non-empty auto-connect id must name a stored tunnel.
    pub fn update_settings(&mut self, settings: Settings) -> Result<(), StoreError> {
        if let Some(id) = settings.auto_connect() {
            if !self.tunnels.contains_key(id) {
                return Err(StoreError::UnknownTunnel(id.to_string()));
            }
        }
        self.store.save_settings(&settings)?;
        self.settings = settings;
        Ok(())
    }

    pub fn store(&self) -> &TunnelStore<S> {
        &self.store
    }

    pub fn into_store(self) -> TunnelStore<S> {
        self.store
    }
}
