//! Total ordering of interactions for replay.
//!
//! Block height first, then the ledger-derived sort key bytewise, with
//! the transaction id as the final component so records are comparable
//! even when a forged key collides. The resulting order is the contract's
//! canonical history; every node must produce the same sequence.

use weave_types::ids::ContractId;
use weave_types::{EvalError, Interaction};

fn sort_debug_enabled() -> bool {
    matches!(
        std::env::var("WEAVE_DEBUG_SORT")
            .ok()
            .as_deref()
            .map(|v| v.to_ascii_lowercase())
            .as_deref(),
        Some("1") | Some("true") | Some("yes") | Some("on")
    )
}

/// Order interactions into the canonical replay sequence.
///
/// Records that are byte-identical in the order (same id, same key) are
/// pagination-overlap duplicates and collapse to one. Two *different*
/// records comparing equal under (height, key) break the total order and
/// are fatal: the upstream ledger guarantees unique sort keys, so a
/// collision means corrupted or forged data.
pub fn sort_interactions(
    contract_id: &ContractId,
    mut interactions: Vec<Interaction>,
) -> Result<Vec<Interaction>, EvalError> {
    interactions.sort_by(|a, b| a.order_key().cmp(&b.order_key()));

    let mut ordered: Vec<Interaction> = Vec::with_capacity(interactions.len());
    for interaction in interactions {
        if let Some(last) = ordered.last() {
            if last.block_height == interaction.block_height
                && last.sort_key == interaction.sort_key
            {
                if last.id == interaction.id {
                    continue;
                }
                return Err(EvalError::AmbiguousOrdering {
                    contract_id: contract_id.clone(),
                    block_height: interaction.block_height,
                    first: last.id.clone(),
                    second: interaction.id,
                });
            }
        }
        ordered.push(interaction);
    }

    if sort_debug_enabled() {
        for interaction in &ordered {
            eprintln!(
                "[sort] contract={} id={} height={} key={}",
                contract_id,
                interaction.id,
                interaction.block_height,
                interaction.sort_key.to_hex()
            );
        }
    }

    Ok(ordered)
}
