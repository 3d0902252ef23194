//! Evaluation configuration, per-interaction results, and the accumulated
//! evaluation state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ContractId, SortKey, TxId};

/// Default per-interaction gas budget.
///
/// Bounded by default so replay over untrusted bytecode always terminates;
/// pass `gas_limit: None` to opt into unbounded execution for trusted
/// builtin handlers.
pub const DEFAULT_GAS_LIMIT: u64 = 1_000_000_000;

/// Default bound on nested foreign-read hops.
pub const DEFAULT_MAX_CALL_DEPTH: u32 = 3;

/// Evaluation options, passed by value into every evaluation call.
///
/// The evaluator never mutates the options it receives; callers that want
/// different behavior pass a different record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOptions {
    /// Per-interaction gas budget. `None` means unbounded.
    pub gas_limit: Option<u64>,
    /// Maximum number of nested foreign-read hops from the root evaluation.
    /// Zero disables foreign reads entirely.
    pub max_call_depth: u32,
    /// Resume from cached checkpoints when available.
    pub use_cache: bool,
    /// Allow handlers to declare writes against foreign contracts.
    /// Declared writes are surfaced in results, never applied by the core.
    pub internal_writes: bool,
    /// Allow integers outside the IEEE-754 safe range in handler-returned
    /// state. Off by default: such values do not survive JSON round-trips
    /// on every host, which breaks cross-node state agreement.
    pub allow_big_int: bool,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            gas_limit: Some(DEFAULT_GAS_LIMIT),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            use_cache: true,
            internal_writes: false,
            allow_big_int: false,
        }
    }
}

impl EvaluationOptions {
    pub fn with_gas_limit(mut self, gas_limit: Option<u64>) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_max_call_depth(mut self, depth: u32) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_internal_writes(mut self, enabled: bool) -> Self {
        self.internal_writes = enabled;
        self
    }

    pub fn with_big_int(mut self, allowed: bool) -> Self {
        self.allow_big_int = allowed;
        self
    }
}

/// Classification of a single interaction's outcome.
///
/// `ContractError` is logic the contract itself rejected; `Exception` is a
/// host or environment failure (malformed input shape, sandbox fault, gas
/// exhaustion). Downstream validity bookkeeping depends on the distinction
/// being preserved exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    #[serde(rename = "error")]
    ContractError,
    Exception,
}

/// A write declared by a handler against a foreign contract.
///
/// Collected for external indexing when `internal_writes` is enabled; the
/// evaluator itself never applies these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InnerWrite {
    pub target: ContractId,
    pub input: Value,
}

/// The outcome of applying exactly one interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionResult {
    pub outcome: Outcome,
    /// State after the interaction. Equal to the prior state unless
    /// `outcome` is `Ok`.
    pub state: Value,
    /// Optional read-only return value (dry-run and view calls).
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub gas_used: u64,
    pub inner_writes: Vec<InnerWrite>,
}

impl InteractionResult {
    pub fn ok(state: Value, result: Option<Value>, gas_used: u64) -> Self {
        Self {
            outcome: Outcome::Ok,
            state,
            result,
            error_message: None,
            gas_used,
            inner_writes: Vec::new(),
        }
    }

    pub fn contract_error(prior_state: Value, message: impl Into<String>, gas_used: u64) -> Self {
        Self {
            outcome: Outcome::ContractError,
            state: prior_state,
            result: None,
            error_message: Some(message.into()),
            gas_used,
            inner_writes: Vec::new(),
        }
    }

    pub fn exception(prior_state: Value, message: impl Into<String>, gas_used: u64) -> Self {
        Self {
            outcome: Outcome::Exception,
            state: prior_state,
            result: None,
            error_message: Some(message.into()),
            gas_used,
            inner_writes: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == Outcome::Ok
    }
}

/// Accumulated result of replaying a contract's interactions.
///
/// Owned by exactly one in-flight evaluation run; shared only after the
/// run completes (cloned into the checkpoint cache and to callers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationState {
    /// The contract state after the last applied interaction.
    pub state: Value,
    /// Per-interaction validity: `true` iff the interaction completed `Ok`.
    pub validity: BTreeMap<TxId, bool>,
    /// Error messages for interactions that did not complete `Ok`.
    pub error_messages: BTreeMap<TxId, String>,
    /// Height this state is valid up to, inclusive.
    pub last_evaluated_height: u64,
}

impl EvaluationState {
    /// Fresh accumulator starting from a definition's initial state.
    pub fn initial(state: Value) -> Self {
        Self {
            state,
            validity: BTreeMap::new(),
            error_messages: BTreeMap::new(),
            last_evaluated_height: 0,
        }
    }
}

/// A cached checkpoint: the evaluation state as of a specific height.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Height this checkpoint covers, inclusive.
    pub block_height: u64,
    /// Sort key of the last interaction folded into this checkpoint.
    /// `None` when no interaction at all has been applied yet.
    pub sort_key: Option<SortKey>,
    pub state: EvaluationState,
    /// Wall-clock creation time. Diagnostic only; never consulted by
    /// replay logic, which must stay clock-independent.
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(block_height: u64, sort_key: Option<SortKey>, state: EvaluationState) -> Self {
        Self {
            block_height,
            sort_key,
            state,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_options_are_bounded() {
        let options = EvaluationOptions::default();
        assert_eq!(options.gas_limit, Some(DEFAULT_GAS_LIMIT));
        assert_eq!(options.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
        assert!(options.use_cache);
        assert!(!options.internal_writes);
        assert!(!options.allow_big_int);
    }

    #[test]
    fn outcome_serializes_to_wire_labels() {
        assert_eq!(serde_json::to_string(&Outcome::Ok).unwrap(), "\"ok\"");
        assert_eq!(
            serde_json::to_string(&Outcome::ContractError).unwrap(),
            "\"error\""
        );
        assert_eq!(
            serde_json::to_string(&Outcome::Exception).unwrap(),
            "\"exception\""
        );
    }

    #[test]
    fn non_ok_results_keep_prior_state() {
        let prior = json!({"balance": 10});
        let result = InteractionResult::contract_error(prior.clone(), "rejected", 42);
        assert_eq!(result.state, prior);
        assert!(!result.is_ok());
        assert_eq!(result.gas_used, 42);
    }
}
