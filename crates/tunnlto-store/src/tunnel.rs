//! Tunnel Entity
//!
//! The persisted shape of a tunnel (schema 1.0.1) plus the small
//! field-splitting helpers shared by profile import and schema migration.

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};

/// Symbols a tunnel id is drawn from
pub const ID_ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Characters in a tunnel id
pub const ID_LEN: usize = 4;

/// Random draws before falling back to an ordered scan of the id space
const MAX_RANDOM_ID_ATTEMPTS: usize = 64;

/// Local end of the tunnel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Interface {
    #[serde(deserialize_with = "null_as_default")]
    pub ipv4_address: String,
    #[serde(deserialize_with = "null_as_default")]
    pub ipv6_address: String,
    #[serde(deserialize_with = "null_as_default")]
    pub port: String,
    #[serde(deserialize_with = "null_as_default")]
    pub private_key: String,
    #[serde(deserialize_with = "null_as_default")]
    pub dns: String,
    #[serde(deserialize_with = "null_as_default")]
    pub mtu: String,
}

/// Remote end of the tunnel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Peer {
    #[serde(deserialize_with = "null_as_default")]
    pub endpoint: String,
    #[serde(deserialize_with = "null_as_default")]
    pub port: String,
    #[serde(deserialize_with = "null_as_default")]
    pub public_key: String,
    /// Empty when unset
    #[serde(deserialize_with = "null_as_default")]
    pub preshared_key: String,
    /// Seconds as a numeric string, empty when unset
    #[serde(deserialize_with = "null_as_default")]
    pub persistent_keepalive: String,
}

/// One side of the split-tunnelling rules.
///
/// Each field is comma-separated free text consumed by the tunnel process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuleSet {
    #[serde(deserialize_with = "null_as_default")]
    pub apps: String,
    #[serde(deserialize_with = "null_as_default")]
    pub folders: String,
    #[serde(deserialize_with = "null_as_default")]
    pub ip_addresses: String,
}

impl RuleSet {
    /// Apps and folders as one list, the way the tunnel process expects them
    pub fn apps_and_folders(&self) -> String {
        join_non_empty([self.apps.as_str(), self.folders.as_str()])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rules {
    #[serde(deserialize_with = "null_as_default")]
    pub allowed: RuleSet,
    #[serde(deserialize_with = "null_as_default")]
    pub disallowed: RuleSet,
}

/// A named VPN endpoint configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunnel {
    /// Four lowercase alphanumeric characters, assigned once
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub interface: Interface,
    #[serde(deserialize_with = "null_as_default")]
    pub peer: Peer,
    #[serde(deserialize_with = "null_as_default")]
    pub rules: Rules,
}

impl Tunnel {
    /// An empty draft carrying the given id
    pub fn draft(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Check the fields the editor treats as required.
    ///
    /// Cross-field semantics (key validity, address syntax) are not checked.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut missing = Vec::new();

        if self.name.trim().is_empty() {
            missing.push("name");
        }
        if self.interface.ipv4_address.trim().is_empty()
            && self.interface.ipv6_address.trim().is_empty()
        {
            missing.push("interface.address");
        }
        if self.interface.private_key.trim().is_empty() {
            missing.push("interface.privateKey");
        }
        if self.peer.endpoint.trim().is_empty() {
            missing.push("peer.endpoint");
        }
        if self.peer.port.trim().is_empty() {
            missing.push("peer.port");
        }
        if self.peer.public_key.trim().is_empty() {
            missing.push("peer.publicKey");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { missing })
        }
    }

    /// Interface addresses joined the way a profile `Address` line holds them
    pub fn addresses(&self) -> String {
        join_non_empty([
            self.interface.ipv4_address.as_str(),
            self.interface.ipv6_address.as_str(),
        ])
    }
}

/// Required tunnel fields left empty
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Missing required fields: {}", .missing.join(", "))]
pub struct ValidationError {
    pub missing: Vec<&'static str>,
}

/// IPv4 / IPv6 halves of an `Address` list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitAddresses {
    pub ipv4: String,
    pub ipv6: String,
}

/// Split a comma-separated address list into its IPv4 and IPv6 entries.
///
/// An entry containing `:` is IPv6, otherwise one containing `.` is IPv4.
/// When several entries of one family appear, the last one wins. Entries of
/// neither family are dropped.
pub fn split_addresses(value: &str) -> SplitAddresses {
    let mut split = SplitAddresses::default();

    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        if entry.contains(':') {
            split.ipv6 = entry.to_string();
        } else if entry.contains('.') {
            split.ipv4 = entry.to_string();
        }
    }

    split
}

/// Split `host:port` on the last colon so bare IPv6 hosts survive.
///
/// Without a colon the whole value is the host and the port is empty.
/// Brackets around an IPv6 host (`[::1]:51820`) are removed.
pub fn split_endpoint(value: &str) -> (String, String) {
    let value = value.trim();
    match value.rsplit_once(':') {
        Some((host, port)) => {
            let host = host
                .strip_prefix('[')
                .and_then(|h| h.strip_suffix(']'))
                .unwrap_or(host);
            (host.trim().to_string(), port.trim().to_string())
        }
        None => (value.to_string(), String::new()),
    }
}

/// Split an app list into `(apps, folders)`.
///
/// Entries containing `/` or `\` are folders. Each half is rejoined with `", "`.
pub fn split_apps_and_folders(value: &str) -> (String, String) {
    let (folders, apps): (Vec<&str>, Vec<&str>) = value
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .partition(|e| e.contains('/') || e.contains('\\'));

    (apps.join(", "), folders.join(", "))
}

/// Draw a tunnel id for which `is_taken` returns false.
///
/// Random 4-character ids are drawn until a free one turns up. After
/// a bounded number of collisions the namespace (36^4 ids) is scanned in
/// order instead, so the result is `None` only when every id is taken.
pub fn generate_id<R, F>(rng: &mut R, is_taken: F) -> Option<String>
where
    R: Rng + ?Sized,
    F: Fn(&str) -> bool,
{
    for _ in 0..MAX_RANDOM_ID_ATTEMPTS {
        let id: String = (0..ID_LEN)
            .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
            .collect();
        if !is_taken(&id) {
            return Some(id);
        }
    }

    let space = ID_ALPHABET.len().pow(ID_LEN as u32);
    (0..space).map(id_at).find(|id| !is_taken(id.as_str()))
}

/// The `n`th id of the namespace in alphabet order
fn id_at(mut n: usize) -> String {
    let mut id = [0u8; ID_LEN];
    for slot in id.iter_mut().rev() {
        *slot = ID_ALPHABET[n % ID_ALPHABET.len()];
        n /= ID_ALPHABET.len();
    }
    id.iter().map(|&b| b as char).collect()
}

/// True for a well-formed tunnel id
pub fn is_valid_id(id: &str) -> bool {
    id.len() == ID_LEN && id.bytes().all(|b| ID_ALPHABET.contains(&b))
}

/// Deserialize `null` as the field's default.
///
/// Records written by older releases carry `null` for unset fields.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Join the non-empty parts with `", "`
pub(crate) fn join_non_empty<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn complete_tunnel() -> Tunnel {
        let mut tunnel = Tunnel::draft("ab12");
        tunnel.name = "office".to_string();
        tunnel.interface.ipv4_address = "10.0.0.2".to_string();
        tunnel.interface.private_key = "priv".to_string();
        tunnel.peer.endpoint = "vpn.example.com".to_string();
        tunnel.peer.port = "51820".to_string();
        tunnel.peer.public_key = "pub".to_string();
        tunnel
    }

    #[test]
    fn test_split_addresses() {
        let split = split_addresses("10.0.0.2, fe80::1");
        assert_eq!(split.ipv4, "10.0.0.2");
        assert_eq!(split.ipv6, "fe80::1");
    }

    #[test]
    fn test_split_addresses_last_wins() {
        let split = split_addresses("10.0.0.2/32,10.0.0.3/32, fd00::2/128 ,,");
        assert_eq!(split.ipv4, "10.0.0.3/32");
        assert_eq!(split.ipv6, "fd00::2/128");

        let split = split_addresses("");
        assert_eq!(split, SplitAddresses::default());
    }

    #[test]
    fn test_mapped_ipv6_counts_as_ipv6() {
        let split = split_addresses("::ffff:10.0.0.2");
        assert_eq!(split.ipv4, "");
        assert_eq!(split.ipv6, "::ffff:10.0.0.2");
    }

    #[test]
    fn test_split_endpoint() {
        assert_eq!(
            split_endpoint("2001:db8::1:51820"),
            ("2001:db8::1".to_string(), "51820".to_string())
        );
        assert_eq!(
            split_endpoint("vpn.example.com:443"),
            ("vpn.example.com".to_string(), "443".to_string())
        );
        assert_eq!(
            split_endpoint("[fd00::1]:51820"),
            ("fd00::1".to_string(), "51820".to_string())
        );
        assert_eq!(
            split_endpoint("vpn.example.com"),
            ("vpn.example.com".to_string(), String::new())
        );
    }

    #[test]
    fn test_split_apps_and_folders() {
        let (apps, folders) = split_apps_and_folders("chrome.exe, C:\\Program Files\\App");
        assert_eq!(apps, "chrome.exe");
        assert_eq!(folders, "C:\\Program Files\\App");

        let (apps, folders) = split_apps_and_folders("a.exe,b.exe, /opt/tools ,");
        assert_eq!(apps, "a.exe, b.exe");
        assert_eq!(folders, "/opt/tools");
    }

    #[test]
    fn test_validate() {
        assert!(complete_tunnel().validate().is_ok());

        let err = Tunnel::draft("ab12").validate().unwrap_err();
        assert_eq!(
            err.missing,
            vec![
                "name",
                "interface.address",
                "interface.privateKey",
                "peer.endpoint",
                "peer.port",
                "peer.publicKey",
            ]
        );

        let mut v6_only = complete_tunnel();
        v6_only.interface.ipv4_address.clear();
        v6_only.interface.ipv6_address = "fd00::2".to_string();
        assert!(v6_only.validate().is_ok());
    }

    #[test]
    fn test_serialized_field_names() {
        let value = serde_json::to_value(complete_tunnel()).unwrap();
        assert_eq!(value["interface"]["ipv4Address"], "10.0.0.2");
        assert_eq!(value["interface"]["privateKey"], "priv");
        assert_eq!(value["peer"]["persistentKeepalive"], "");
        assert_eq!(value["rules"]["allowed"]["ipAddresses"], "");
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let json = r#"{"id":"ab12","name":"x","interface":{"ipv4Address":"10.0.0.2"}}"#;
        let tunnel: Tunnel = serde_json::from_str(json).unwrap();
        assert_eq!(tunnel.interface.ipv4_address, "10.0.0.2");
        assert_eq!(tunnel.peer, Peer::default());
        assert_eq!(tunnel.addresses(), "10.0.0.2");
    }

    #[test]
    fn test_generated_ids_are_unique_and_well_formed() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut taken = HashSet::new();

        for _ in 0..500 {
            let id = generate_id(&mut rng, |id| taken.contains(id)).unwrap();
            assert!(is_valid_id(&id), "bad id {}", id);
            assert!(taken.insert(id));
        }
    }

    #[test]
    fn test_collisions_fall_back_to_scan() {
        // a zero rng always draws "aaaa"
        let mut rng = StepRng::new(0, 0);
        let taken: HashSet<String> = ["aaaa", "aaab"].iter().map(|s| s.to_string()).collect();

        let id = generate_id(&mut rng, |id| taken.contains(id)).unwrap();
        assert_eq!(id, "aaac");
    }

    #[test]
    fn test_exhausted_namespace() {
        let mut rng = StepRng::new(0, 0);
        assert_eq!(generate_id(&mut rng, |_| true), None);
    }

    #[test]
    fn test_id_at() {
        assert_eq!(id_at(0), "aaaa");
        assert_eq!(id_at(35), "aaa9");
        assert_eq!(id_at(36), "aaba");
        assert_eq!(id_at(36usize.pow(4) - 1), "9999");
        assert!(!is_valid_id("AB12"));
        assert!(!is_valid_id("ab1"));
    }
}
