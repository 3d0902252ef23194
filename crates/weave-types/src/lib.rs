//! Shared types for the weave-replay workspace.
//!
//! This crate provides foundational types used across multiple crates in the
//! workspace, breaking circular dependency chains.
//!
//! ## Identifiers
//!
//! The [`ids`] module holds the newtypes for ledger entities:
//! - [`TxId`](ids::TxId), [`ContractId`](ids::ContractId), [`Address`](ids::Address) - base64url strings
//! - [`SortKey`](ids::SortKey) - raw ordering bytes
//!
//! ## Records
//!
//! [`Interaction`](interaction::Interaction), [`ContractDefinition`](definition::ContractDefinition),
//! [`EvaluationState`](evaluation::EvaluationState) and friends make up the
//! evaluation data model; [`EvalError`](error::EvalError) is the fatal error
//! taxonomy shared by every layer.

pub mod definition;
pub mod encoding;
pub mod error;
pub mod evaluation;
pub mod ids;
pub mod interaction;
pub mod tags;

// Re-export commonly used types at crate root
pub use definition::{ContractDefinition, SourceType};
pub use error::EvalError;
pub use evaluation::{
    CacheEntry, EvaluationOptions, EvaluationState, InnerWrite, InteractionResult, Outcome,
    DEFAULT_GAS_LIMIT, DEFAULT_MAX_CALL_DEPTH,
};
pub use ids::{Address, ContractId, SortKey, TxId};
pub use interaction::Interaction;
pub use tags::TagMap;

use std::time::Duration;

/// Configuration for retry behavior on gateway operations.
#[derive(Debug, Copy, Clone)]
pub struct RetryConfig {
    /// Number of retry attempts.
    pub retries: usize,
    /// Initial backoff duration between retries.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
}

impl RetryConfig {
    /// Create a new RetryConfig with the specified parameters.
    pub fn new(retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    /// Backoff before the given attempt (zero-based), doubling each time
    /// and capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: usize) -> Duration {
        let factor = 1u32 << attempt.min(16) as u32;
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_millis(5000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryConfig::new(5, 100, 450);
        assert_eq!(retry.backoff_for(0), Duration::from_millis(100));
        assert_eq!(retry.backoff_for(1), Duration::from_millis(200));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(400));
        assert_eq!(retry.backoff_for(3), Duration::from_millis(450));
    }
}
