//! Identifier newtypes for ledger entities.
//!
//! Transaction ids, contract ids, and owner addresses are all content-derived
//! base64url strings on the wire; the newtypes keep them from being mixed up
//! in signatures. [`SortKey`] is the only identifier kept as raw bytes, since
//! replay ordering relies on byte-lexicographic comparison.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::encoding::{b64url_encode, sha256_concat};

/// Transaction id on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(String);

impl TxId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive a deterministic id from raw parts (used for synthetic
    /// dry-run interactions and by the mock ledger).
    pub fn derive_from(parts: &[&[u8]]) -> Self {
        Self(b64url_encode(&sha256_concat(parts)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Id of a contract, which is the id of its definition transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(String);

impl ContractId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The definition transaction id this contract id refers to.
    pub fn tx_id(&self) -> TxId {
        TxId::new(self.0.clone())
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<TxId> for ContractId {
    fn from(id: TxId) -> Self {
        Self(id.0)
    }
}

/// Owner wallet address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ledger-derived ordering key for an interaction.
///
/// Thirty-two opaque bytes, unique per interaction by construction
/// (a digest over the confirming block hash and the transaction id).
/// Compared byte-lexicographically and never used for state content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SortKey([u8; 32]);

impl SortKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive the key for an interaction confirmed in a given block.
    pub fn derive(block_indep_hash: &str, tx_id: &TxId) -> Self {
        Self(sha256_concat(&[
            block_indep_hash.as_bytes(),
            tx_id.as_str().as_bytes(),
        ]))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for SortKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SortKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SortKey::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
