//! Fatal evaluation errors.
//!
//! These abort the enclosing evaluation call and surface to the caller.
//! Per-interaction failures are not errors in this sense; they are recorded
//! in the validity ledger and replay continues past them.

use crate::ids::{ContractId, TxId};

/// Errors that abort an evaluation run.
#[derive(Debug, Clone)]
pub enum EvalError {
    /// The contract identifier does not resolve on the ledger.
    DefinitionNotFound {
        /// The identifier that failed to resolve
        contract_id: ContractId,
    },

    /// The identifier resolved, but the definition is unusable.
    DefinitionMalformed {
        contract_id: ContractId,
        /// What was missing or contradictory (e.g. WASM source without a
        /// declared language, initial state that is not valid JSON)
        reason: String,
    },

    /// A loader could not reach the ledger. Recoverable; the caller may
    /// retry the whole evaluation.
    LoaderUnavailable {
        /// Operation that failed (fetch, query, height resolution)
        operation: String,
        reason: String,
    },

    /// Two distinct interactions compared equal under the total order.
    /// The upstream ledger guarantees unique sort keys, so this indicates
    /// corrupted or forged data.
    AmbiguousOrdering {
        contract_id: ContractId,
        block_height: u64,
        /// The two records that collided
        first: TxId,
        second: TxId,
    },

    /// A foreign read exceeded the configured depth bound, or re-entered a
    /// contract already being evaluated on the active call path.
    CallDepthExceeded {
        contract_id: ContractId,
        /// Nesting depth the refused read would have reached
        depth: u32,
        max_depth: u32,
        /// True when refusal was due to a cycle rather than depth
        cycle: bool,
    },
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::DefinitionNotFound { contract_id } => {
                write!(f, "contract definition not found: {}", contract_id)
            }
            EvalError::DefinitionMalformed {
                contract_id,
                reason,
            } => {
                write!(f, "malformed definition for {}: {}", contract_id, reason)
            }
            EvalError::LoaderUnavailable { operation, reason } => {
                write!(f, "ledger unavailable during {}: {}", operation, reason)
            }
            EvalError::AmbiguousOrdering {
                contract_id,
                block_height,
                first,
                second,
            } => {
                write!(
                    f,
                    "ambiguous interaction ordering for {} at height {}: {} and {} share a sort key",
                    contract_id, block_height, first, second
                )
            }
            EvalError::CallDepthExceeded {
                contract_id,
                depth,
                max_depth,
                cycle,
            } => {
                if *cycle {
                    write!(
                        f,
                        "call depth exceeded: foreign read of {} re-enters the active call path (depth {}, max {})",
                        contract_id, depth, max_depth
                    )
                } else {
                    write!(
                        f,
                        "call depth exceeded: foreign read of {} at depth {} over limit {}",
                        contract_id, depth, max_depth
                    )
                }
            }
        }
    }
}

impl std::error::Error for EvalError {}
