//! Contract definitions: immutable source plus initial state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{Address, ContractId, TxId};

/// How a contract's logic is executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceType {
    /// Manifest-selected builtin handler. The source payload is a small
    /// JSON manifest naming a handler compiled into the executor.
    Script { handler: String },
    /// Sandboxed WASM bytecode, tagged with the language it was built from.
    Wasm { lang: String, bytecode: Vec<u8> },
}

impl SourceType {
    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            SourceType::Script { .. } => "script",
            SourceType::Wasm { .. } => "wasm",
        }
    }
}

/// A contract's immutable definition, loaded once and cached for the
/// process lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDefinition {
    /// Id of the definition transaction (and of the contract).
    pub contract_id: ContractId,
    /// Transaction holding the source payload.
    pub src_tx_id: TxId,
    pub source: SourceType,
    /// State the fold starts from when no checkpoint exists.
    pub init_state: Value,
    /// Deployer address.
    pub owner: Address,
    /// Height the definition transaction was confirmed at.
    pub deploy_height: u64,
    /// Declared MIME type of the source payload, when present.
    pub content_type: Option<String>,
}
