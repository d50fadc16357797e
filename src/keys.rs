//! Store key layout for per-address records.
//!
//! Each wallet address owns exactly two keys:
//!
//! - `lock:<address>` - the owner token of the acquisition currently in flight
//! - `nonce:<address>` - the last nonce issued for the address
//!
//! With a prefix configured, both keys become `<prefix>:lock:<address>` and
//! `<prefix>:nonce:<address>`, which keeps the nonce streams of the same account on
//! different chains apart.

use crate::error::AllocatorError;

const LOCK_SEGMENT: &str = "lock";
const NONCE_SEGMENT: &str = "nonce";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySpace {
    prefix: Option<String>,
}

impl KeySpace {
    pub fn new(prefix: Option<String>) -> Self {
        let prefix = prefix
            .map(|p| p.trim().trim_end_matches(':').to_string())
            .filter(|p| !p.is_empty());
        Self { prefix }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn lock_key(&self, address: &CanonicalAddress) -> String {
        self.key(LOCK_SEGMENT, address)
    }

    pub fn nonce_key(&self, address: &CanonicalAddress) -> String {
        self.key(NONCE_SEGMENT, address)
    }

    fn key(&self, segment: &str, address: &CanonicalAddress) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}:{segment}:{}", address.0),
            None => format!("{segment}:{}", address.0),
        }
    }
}

/// A wallet address normalized for key construction.
///
/// `0x`-prefixed hex addresses are case-insensitive on EVM chains (the mixed case is only an
/// EIP-55 checksum), so they are lower-cased; every other format is kept as-is apart from
/// surrounding whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalAddress(String);

impl CanonicalAddress {
    pub fn parse(address: &str) -> Result<Self, AllocatorError> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(AllocatorError::InvalidAddress);
        }
        let is_hex = trimmed.len() > 2
            && (trimmed.starts_with("0x") || trimmed.starts_with("0X"))
            && trimmed[2..].chars().all(|c| c.is_ascii_hexdigit());
        let canonical = if is_hex {
            trimmed.to_ascii_lowercase()
        } else {
            trimmed.to_string()
        };
        Ok(Self(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CanonicalAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
