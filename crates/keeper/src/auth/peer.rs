//! Deterministic derivation of the shared peer password.
//!
//! Every cluster member computes the same secret from the same canonical
//! property set without talking to anyone: volatile keys are dropped, the
//! rest are hashed in key order, followed by `server.id` and the peer id.

use ensemble_common::constants::peer::{
    DEFAULT_DIGEST, EXCLUDED_KEY_PREFIXES, EXCLUDED_KEYS, PEER_ID_MARKER,
};
use ensemble_common::{CoordError, Result};
use sha2::Digest;
use std::collections::BTreeMap;

/// Digest used for derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    /// Look up an algorithm by its conventional name (`SHA`, `SHA-1`, `SHA-256`, ...)
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "SHA" | "SHA1" | "SHA-1" => Ok(Self::Sha1),
            "SHA256" | "SHA-256" => Ok(Self::Sha256),
            _ => Err(CoordError::DigestUnavailable(format!(
                "{name} MessageDigest not available"
            ))),
        }
    }

    fn digest<'a>(self, chunks: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
        match self {
            Self::Sha1 => {
                let mut hasher = sha1::Sha1::new();
                for chunk in chunks {
                    hasher.update(chunk);
                }
                hasher.finalize().to_vec()
            }
            Self::Sha256 => {
                let mut hasher = sha2::Sha256::new();
                for chunk in chunks {
                    hasher.update(chunk);
                }
                hasher.finalize().to_vec()
            }
        }
    }
}

/// Property set with volatile keys removed and values trimmed, ordered by key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalPropertySet(BTreeMap<String, String>);

impl CanonicalPropertySet {
    pub fn from_properties<I, K, V>(properties: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let entries = properties
            .into_iter()
            .map(|(k, v)| (Into::<String>::into(k), v))
            .filter(|(k, _)| !is_excluded(k))
            .map(|(k, v)| (k, trim_value(v.as_ref()).to_string()))
            .collect();
        Self(entries)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Strip leading and trailing ASCII control characters and spaces (everything up to U+0020)
fn trim_value(value: &str) -> &str {
    value.trim_matches(|c: char| c <= ' ')
}

/// True for keys that differ between members and must not influence the password
pub fn is_excluded(key: &str) -> bool {
    EXCLUDED_KEY_PREFIXES.iter().any(|p| key.starts_with(p)) || EXCLUDED_KEYS.contains(&key)
}

/// Input of one derivation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerPasswordInput {
    pub properties: CanonicalPropertySet,
    pub peer_id: i32,
}

/// Computes peer passwords with a fixed digest
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerPasswordDeriver {
    algorithm: DigestAlgorithm,
}

impl PeerPasswordDeriver {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Deriver for a digest given by name, failing with `DigestUnavailable` if unknown
    pub fn from_digest_name(name: &str) -> Result<Self> {
        DigestAlgorithm::from_name(name).map(Self::new)
    }

    /// Deriver on the default digest
    pub fn standard() -> Result<Self> {
        Self::from_digest_name(DEFAULT_DIGEST)
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Lowercase hex digest over the canonical set and the peer id
    pub fn derive(&self, input: &PeerPasswordInput) -> String {
        tracing::info!(peer_id = input.peer_id, "Deriving password for peer");

        let peer_id = input.peer_id.to_string();
        let chunks = input
            .properties
            .iter()
            .flat_map(|(k, v)| [k.as_bytes(), v.as_bytes()])
            .chain([PEER_ID_MARKER.as_bytes(), peer_id.as_bytes()]);

        hex::encode(self.algorithm.digest(chunks))
    }

    /// Canonicalize `properties` and derive the password of `peer_id`
    pub fn derive_from<I, K, V>(&self, properties: I, peer_id: i32) -> String
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        self.derive(&PeerPasswordInput {
            properties: CanonicalPropertySet::from_properties(properties),
            peer_id,
        })
    }
}
