//! weave-replay
//!
//! Deterministic reconstruction of smart contract state on an append-only,
//! content-addressed ledger. Every interaction ever submitted against a
//! contract is replayed in a consensus-agreed total order through the
//! contract's own logic; any node replaying the same interaction set
//! arrives at bit-identical state.
//!
//! The pipeline: definition loading ([`weave_evaluator::DefinitionLoader`]),
//! interaction loading and ordering, sandboxed execution behind the
//! [`weave_handlers::HandlerApi`] seam (WASM with instruction metering, or
//! compiled-in builtins), and the [`weave_evaluator::StateEvaluator`] fold
//! with checkpoint caching, gas accounting, and recursive foreign-contract
//! reads.
//!
//! # Example
//!
//! ```ignore
//! use weave_replay::{ContractId, Weave};
//!
//! let weave = Weave::builder().with_persistent_cache().build()?;
//! let state = weave.read_contract(&ContractId::new("..."), None).await?;
//! for (tx, valid) in &state.validity {
//!     println!("{tx}: {valid}");
//! }
//! ```

mod client;

pub use client::{Weave, WeaveBuilder, DEFAULT_CACHE_DIR};

// The member crates, for callers that compose the pipeline themselves.
pub use weave_evaluator;
pub use weave_gateway;
pub use weave_handlers;
pub use weave_types;

// The types the facade surface speaks.
pub use weave_types::{
    Address, ContractDefinition, ContractId, EvalError, EvaluationOptions, EvaluationState,
    Interaction, InteractionResult, Outcome, SourceType, TxId,
};
