//! WireGuard Key Management
//!
//! X25519 key generation and public-key derivation for tunnel interfaces.
//!
//! Two layers are exposed:
//!
//! - A typed layer ([`PrivateKey`], [`PublicKey`], [`KeyPair`]) that reports
//!   malformed input through [`KeyError`].
//! - A tolerant string layer ([`generate_key_pair`], [`derive_public_key`])
//!   used by the editing flow. It never fails: derivation of a malformed key
//!   yields an empty string, which callers render as "no key".

use base64::{
    Engine as _, alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

/// Standard alphabet. Encodes with padding, decodes with or without it.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Raw key length shared by private and public Curve25519 keys
pub const KEY_LEN: usize = 32;

/// WireGuard private key (Curve25519)
#[derive(Clone)]
pub struct PrivateKey {
    secret: StaticSecret,
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            secret: StaticSecret::from(bytes),
        }
    }

    /// Create from base64 string
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        decode_key(s).map(Self::from_bytes)
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            key: X25519Public::from(&self.secret),
        }
    }

    /// Get raw bytes
    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        self.secret.to_bytes()
    }

    /// Encode as base64
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey([redacted])")
    }
}

/// WireGuard public key (Curve25519)
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    key: X25519Public,
}

impl PublicKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            key: X25519Public::from(bytes),
        }
    }

    /// Create from base64 string
    pub fn from_base64(s: &str) -> Result<Self, KeyError> {
        decode_key(s).map(Self::from_bytes)
    }

    /// Get raw bytes
    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        self.key.to_bytes()
    }

    /// Encode as base64
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({}...)", &self.to_base64()[..8])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

/// A key pair (private + public)
#[derive(Clone)]
pub struct KeyPair {
    pub private: PrivateKey,
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_private(PrivateKey::generate())
    }

    /// Create from a private key
    pub fn from_private(private: PrivateKey) -> Self {
        let public = private.public_key();
        Self { private, public }
    }

    /// Both halves as base64 strings
    pub fn encode(&self) -> EncodedKeyPair {
        EncodedKeyPair {
            public_key: self.public.to_base64(),
            private_key: self.private.to_base64(),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish()
    }
}

/// Base64 form of a key pair, as stored on a tunnel
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedKeyPair {
    pub public_key: String,
    pub private_key: String,
}

impl fmt::Debug for EncodedKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedKeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"[redacted]")
            .finish()
    }
}

/// Produce a fresh key pair, both halves base64 encoded.
pub fn generate_key_pair() -> EncodedKeyPair {
    KeyPair::generate().encode()
}

/// Derive the base64 public key for a base64 private key.
///
/// Returns an empty string when the input is not valid base64 or does not
/// decode to exactly 32 bytes. This runs on every keystroke in the editor,
/// so it must not fail.
pub fn derive_public_key(private_key_base64: &str) -> String {
    match PrivateKey::from_base64(private_key_base64.trim()) {
        Ok(private) => private.public_key().to_base64(),
        Err(_) => String::new(),
    }
}

/// True if `s` decodes to a 32-byte key.
pub fn is_valid_key(s: &str) -> bool {
    decode_key(s.trim()).is_ok()
}

fn decode_key(s: &str) -> Result<[u8; KEY_LEN], KeyError> {
    let bytes = BASE64.decode(s).map_err(|_| KeyError::InvalidBase64)?;
    bytes.try_into().map_err(|_| KeyError::InvalidLength)
}

/// Key parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("Invalid base64 encoding")]
    InvalidBase64,

    #[error("Invalid key length (expected 32 bytes)")]
    InvalidLength,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let keypair = KeyPair::generate();

        assert_eq!(keypair.private.to_bytes().len(), KEY_LEN);
        assert_eq!(keypair.public.to_bytes().len(), KEY_LEN);
    }

    #[test]
    fn test_private_key_base64_restores_same_bytes() {
        let keypair = KeyPair::generate();

        let b64 = keypair.private.to_base64();
        let restored = PrivateKey::from_base64(&b64).unwrap();

        assert_eq!(keypair.private.to_bytes(), restored.to_bytes());
    }

    #[test]
    fn test_derived_key_matches_generated_pair() {
        for _ in 0..8 {
            let pair = generate_key_pair();
            assert_eq!(derive_public_key(&pair.private_key), pair.public_key);
        }
    }

    #[test]
    fn test_known_vector() {
        // RFC 7748 section 6.1, Alice's key pair
        let private = PrivateKey::from_bytes([
            0x77, 0x07, 0x6d, 0x0a, 0x73, 0x18, 0xa5, 0x7d, 0x3c, 0x16, 0xc1, 0x72, 0x51, 0xb2,
            0x66, 0x45, 0xdf, 0x4c, 0x2f, 0x87, 0xeb, 0xc0, 0x99, 0x2a, 0xb1, 0x77, 0xfb, 0xa5,
            0x1d, 0xb9, 0x2c, 0x2a,
        ]);
        let expected = [
            0x85, 0x20, 0xf0, 0x09, 0x89, 0x30, 0xa7, 0x54, 0x74, 0x8b, 0x7d, 0xdc, 0xb4, 0x3e,
            0xf7, 0x5a, 0x0d, 0xbf, 0x3a, 0x0d, 0x26, 0x38, 0x1a, 0xf4, 0xeb, 0xa4, 0xa9, 0x8e,
            0xaa, 0x9b, 0x4e, 0x6a,
        ];

        assert_eq!(private.public_key().to_bytes(), expected);
        assert_eq!(
            derive_public_key(&private.to_base64()),
            BASE64.encode(expected)
        );
    }

    #[test]
    fn test_invalid_input_derives_empty() {
        assert_eq!(derive_public_key("not-valid-base64!!"), "");
        assert_eq!(derive_public_key(""), "");
        // valid base64, wrong length
        assert_eq!(derive_public_key("AAAA"), "");
    }

    #[test]
    fn test_whitespace_is_ignored() {
        let pair = generate_key_pair();
        let padded = format!("  {}\n", pair.private_key);
        assert_eq!(derive_public_key(&padded), pair.public_key);
    }

    #[test]
    fn test_key_errors() {
        assert_eq!(
            PublicKey::from_base64("not-valid-base64!!!").unwrap_err(),
            KeyError::InvalidBase64
        );
        assert_eq!(
            PrivateKey::from_base64("AAAA").unwrap_err(),
            KeyError::InvalidLength
        );
        assert!(!is_valid_key("AAAA"));
        assert!(is_valid_key(&generate_key_pair().public_key));
    }

    #[test]
    fn test_unpadded_keys_are_accepted() {
        let pair = generate_key_pair();
        assert!(pair.private_key.ends_with('='));

        let unpadded = pair.private_key.trim_end_matches('=');
        assert_eq!(unpadded.len(), 43);
        assert!(is_valid_key(unpadded));
        assert_eq!(derive_public_key(unpadded), pair.public_key);
        assert_eq!(
            PublicKey::from_base64(pair.public_key.trim_end_matches('='))
                .unwrap()
                .to_base64(),
            pair.public_key
        );
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let pair = KeyPair::generate();
        let debug = format!("{:?}", pair.private);
        assert!(!debug.contains(&pair.private.to_base64()));

        let encoded = pair.encode();
        let debug = format!("{:?}", encoded);
        assert!(!debug.contains(&encoded.private_key));
    }
}
