//! The fixed tag vocabulary used to recognize contract transactions.
//!
//! Every ledger transaction carries an untyped name/value tag list. Contract
//! definitions and interactions are distinguished from unrelated traffic
//! purely by these tags; anything not matching the vocabulary is ignored.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::ids::ContractId;

/// Untyped tag mapping as stored on the ledger.
pub type TagMap = BTreeMap<String, String>;

/// Protocol marker tag present on every transaction this system owns.
pub const APP_NAME: &str = "App-Name";
/// Protocol version tag.
pub const APP_VERSION: &str = "App-Version";
/// `App-Name` value marking a contract definition transaction.
pub const APP_NAME_CONTRACT: &str = "WeaveContract";
/// `App-Name` value marking an interaction transaction.
pub const APP_NAME_INTERACTION: &str = "WeaveAction";
/// Current protocol version written on submitted interactions.
pub const PROTOCOL_VERSION: &str = "0.4";

/// On an interaction: the contract id it targets.
pub const CONTRACT: &str = "Contract";
/// On a definition: the transaction holding the contract source.
pub const CONTRACT_SRC: &str = "Contract-Src";
/// On a source transaction: `script` or `wasm`.
pub const CONTRACT_TYPE: &str = "Contract-Type";
/// On a `wasm` source transaction: the language the bytecode was built from.
pub const WASM_LANG: &str = "Wasm-Lang";
/// MIME type of a transaction's data payload.
pub const CONTENT_TYPE: &str = "Content-Type";
/// On a definition: inline JSON initial state.
pub const INIT_STATE: &str = "Init-State";
/// On a definition: transaction id whose data payload is the initial state.
pub const INIT_STATE_TX: &str = "Init-State-TX";
/// On an interaction: the JSON input passed to the handler.
pub const INPUT: &str = "Input";
/// On an interaction: a foreign contract id the interaction declares it
/// writes to. May appear multiple times conceptually; encoded as a
/// comma-separated list since the map holds one value per name.
pub const INTERACT_WRITE: &str = "Interact-Write";

/// `Contract-Type` value for manifest-selected builtin handlers.
pub const CONTRACT_TYPE_SCRIPT: &str = "script";
/// `Contract-Type` value for WASM bytecode contracts.
pub const CONTRACT_TYPE_WASM: &str = "wasm";

/// Look up a tag value by name.
pub fn tag<'a>(tags: &'a TagMap, name: &str) -> Option<&'a str> {
    tags.get(name).map(String::as_str)
}

/// True when the tag map marks a contract definition transaction.
pub fn is_contract_definition(tags: &TagMap) -> bool {
    tag(tags, APP_NAME) == Some(APP_NAME_CONTRACT)
}

/// True when the tag map marks an interaction against `contract_id`.
pub fn is_interaction_for(tags: &TagMap, contract_id: &ContractId) -> bool {
    tag(tags, APP_NAME) == Some(APP_NAME_INTERACTION)
        && tag(tags, CONTRACT) == Some(contract_id.as_str())
}

/// Assemble the tag map for submitting an interaction.
///
/// `declared_writes` lists foreign contracts the interaction intends to
/// write to; empty for ordinary interactions.
pub fn interaction_tags(
    contract_id: &ContractId,
    input: &Value,
    declared_writes: &[ContractId],
) -> TagMap {
    let mut tags = TagMap::new();
    tags.insert(APP_NAME.to_string(), APP_NAME_INTERACTION.to_string());
    tags.insert(APP_VERSION.to_string(), PROTOCOL_VERSION.to_string());
    tags.insert(CONTRACT.to_string(), contract_id.as_str().to_string());
    tags.insert(INPUT.to_string(), input.to_string());
    if !declared_writes.is_empty() {
        let targets: Vec<&str> = declared_writes.iter().map(|c| c.as_str()).collect();
        tags.insert(INTERACT_WRITE.to_string(), targets.join(","));
    }
    tags
}
