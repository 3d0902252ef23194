//! Interaction records: the state-mutating transactions replay folds over.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{Address, ContractId, SortKey, TxId};

/// One confirmed interaction against a contract.
///
/// Immutable once fetched. The pair `(block_height, sort_key)` is the
/// replay ordering key; `input` is the JSON the contract handler receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: TxId,
    pub owner: Address,
    pub contract_id: ContractId,
    pub block_height: u64,
    pub sort_key: SortKey,
    pub input: Value,
}

impl Interaction {
    /// The full ordering key, including the id as a final disambiguator so
    /// sorting is total even in the presence of duplicate fetches.
    pub fn order_key(&self) -> (u64, &SortKey, &TxId) {
        (self.block_height, &self.sort_key, &self.id)
    }
}
