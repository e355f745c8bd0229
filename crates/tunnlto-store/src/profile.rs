//! WireGuard Profile Import / Export
//!
//! Reads externally authored `.conf` profiles into tunnel field updates and
//! renders tunnels back into the config text the tunnel process consumes.
//!
//! Import is deliberately forgiving: unknown lines are skipped, malformed
//! values produce degenerate fields, and no cross-field check is made.
//! Whether the result is a usable tunnel is decided by
//! [`Tunnel::validate`](crate::tunnel::Tunnel::validate).

use crate::tunnel::{Tunnel, split_addresses, split_apps_and_folders, split_endpoint};
use std::fmt::Write as _;
use tracing::debug;

/// A tunnel field a profile line can set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileField {
    Ipv4Address,
    Ipv6Address,
    InterfacePort,
    PrivateKey,
    Dns,
    Mtu,
    Endpoint,
    PeerPort,
    PublicKey,
    PresharedKey,
    PersistentKeepalive,
    AllowedApps,
    AllowedFolders,
    AllowedIps,
    DisallowedApps,
    DisallowedFolders,
    DisallowedIps,
}

impl ProfileField {
    /// The tunnel field this update writes
    fn slot(self, tunnel: &mut Tunnel) -> &mut String {
        match self {
            ProfileField::Ipv4Address => &mut tunnel.interface.ipv4_address,
            ProfileField::Ipv6Address => &mut tunnel.interface.ipv6_address,
            ProfileField::InterfacePort => &mut tunnel.interface.port,
            ProfileField::PrivateKey => &mut tunnel.interface.private_key,
            ProfileField::Dns => &mut tunnel.interface.dns,
            ProfileField::Mtu => &mut tunnel.interface.mtu,
            ProfileField::Endpoint => &mut tunnel.peer.endpoint,
            ProfileField::PeerPort => &mut tunnel.peer.port,
            ProfileField::PublicKey => &mut tunnel.peer.public_key,
            ProfileField::PresharedKey => &mut tunnel.peer.preshared_key,
            ProfileField::PersistentKeepalive => &mut tunnel.peer.persistent_keepalive,
            ProfileField::AllowedApps => &mut tunnel.rules.allowed.apps,
            ProfileField::AllowedFolders => &mut tunnel.rules.allowed.folders,
            ProfileField::AllowedIps => &mut tunnel.rules.allowed.ip_addresses,
            ProfileField::DisallowedApps => &mut tunnel.rules.disallowed.apps,
            ProfileField::DisallowedFolders => &mut tunnel.rules.disallowed.folders,
            ProfileField::DisallowedIps => &mut tunnel.rules.disallowed.ip_addresses,
        }
    }
}

/// Field updates read from one profile
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileImport {
    /// Tunnel name, taken from the file name
    pub name: String,
    /// Updates in file order; later ones overwrite earlier ones
    pub updates: Vec<(ProfileField, String)>,
    /// Non-blank lines that set nothing
    pub ignored_lines: usize,
}

impl ProfileImport {
    /// Parse profile `text` read from a file called `file_name`
    pub fn parse(file_name: &str, text: &str) -> Self {
        let mut import = ProfileImport {
            name: profile_name(file_name),
            ..Default::default()
        };

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('#') || line.starts_with(';') || line.starts_with('[') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                import.ignored_lines += 1;
                continue;
            };

            if !import.read_assignment(key.trim(), value.trim()) {
                import.ignored_lines += 1;
            }
        }

        debug!(
            "Parsed profile {:?}: {} updates, {} ignored lines",
            import.name,
            import.updates.len(),
            import.ignored_lines
        );
        import
    }

    /// Record the updates for one `key = value` line. False if `key` is unknown.
    fn read_assignment(&mut self, key: &str, value: &str) -> bool {
        use ProfileField::*;

        match key {
            "Address" => {
                let addresses = split_addresses(value);
                if !addresses.ipv4.is_empty() {
                    self.set(Ipv4Address, addresses.ipv4);
                }
                if !addresses.ipv6.is_empty() {
                    self.set(Ipv6Address, addresses.ipv6);
                }
            }
            "Port" | "ListenPort" => self.set(InterfacePort, value),
            "PrivateKey" => self.set(PrivateKey, value),
            "DNS" => self.set(Dns, value),
            "MTU" => self.set(Mtu, value),
            "Endpoint" => {
                let (host, port) = split_endpoint(value);
                self.set(Endpoint, host);
                self.set(PeerPort, port);
            }
            "PublicKey" => self.set(PublicKey, value),
            "PresharedKey" => self.set(PresharedKey, value),
            "PersistentKeepalive" => self.set(PersistentKeepalive, value),
            "AllowedIPs" => self.set(AllowedIps, value),
            "DisallowedIPs" => self.set(DisallowedIps, value),
            "AllowedApps" => {
                let (apps, folders) = split_apps_and_folders(value);
                self.set(AllowedApps, apps);
                self.set(AllowedFolders, folders);
            }
            "DisallowedApps" => {
                let (apps, folders) = split_apps_and_folders(value);
                self.set(DisallowedApps, apps);
                self.set(DisallowedFolders, folders);
            }
            _ => return false,
        }
        true
    }

    fn set(&mut self, field: ProfileField, value: impl Into<String>) {
        self.updates.push((field, value.into()));
    }

    /// Overwrite the name and every field the profile set
    pub fn apply_to(&self, tunnel: &mut Tunnel) {
        tunnel.name = self.name.clone();
        for (field, value) in &self.updates {
            *field.slot(tunnel) = value.clone();
        }
    }

    /// A fresh tunnel under `id` holding the imported fields
    pub fn to_tunnel(&self, id: impl Into<String>) -> Tunnel {
        let mut tunnel = Tunnel::draft(id);
        self.apply_to(&mut tunnel);
        tunnel
    }
}

/// File name without directories or its last extension
pub fn profile_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);

    match base.rfind('.') {
        Some(dot) if dot > 0 => base[..dot].to_string(),
        _ => base.to_string(),
    }
}

/// Render `tunnel` as WireSock / WireGuard config text.
///
/// Optional lines are left out when their field is empty.
pub fn render_wiresock_config(tunnel: &Tunnel) -> String {
    let mut out = String::new();
    let iface = &tunnel.interface;
    let peer = &tunnel.peer;
    let rules = &tunnel.rules;

    out.push_str("[Interface]\n");
    line(&mut out, "PrivateKey", &iface.private_key, true);
    line(&mut out, "Address", &tunnel.addresses(), true);
    line(&mut out, "ListenPort", &iface.port, false);
    line(&mut out, "DNS", &iface.dns, false);
    line(&mut out, "MTU", &iface.mtu, false);

    out.push_str("\n[Peer]\n");
    line(&mut out, "PublicKey", &peer.public_key, true);
    line(&mut out, "PresharedKey", &peer.preshared_key, false);
    line(&mut out, "Endpoint", &join_endpoint(&peer.endpoint, &peer.port), true);
    line(&mut out, "PersistentKeepalive", &peer.persistent_keepalive, false);
    line(&mut out, "AllowedApps", &rules.allowed.apps_and_folders(), false);
    line(&mut out, "DisallowedApps", &rules.disallowed.apps_and_folders(), false);
    line(&mut out, "AllowedIPs", &rules.allowed.ip_addresses, false);
    line(&mut out, "DisallowedIPs", &rules.disallowed.ip_addresses, false);

    out
}

fn line(out: &mut String, key: &str, value: &str, required: bool) {
    let value = value.trim();
    if required || !value.is_empty() {
        let _ = writeln!(out, "{} = {}", key, value);
    }
}

/// `host:port`, bracketing IPv6 hosts
fn join_endpoint(host: &str, port: &str) -> String {
    let host = host.trim();
    let port = port.trim();

    match (host.contains(':'), port.is_empty()) {
        (_, true) => host.to_string(),
        (true, false) => format!("[{}]:{}", host, port),
        (false, false) => format!("{}:{}", host, port),
    }
}
