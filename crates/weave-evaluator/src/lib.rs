//! Deterministic contract state evaluation.
//!
//! This crate holds the replay pipeline between the ledger gateway and the
//! execution backends:
//!
//! - [`definitions`]: fetch-once [`DefinitionLoader`]
//! - [`interactions`]: range-querying [`InteractionsLoader`]
//! - [`sorter`]: the canonical total order over interactions
//! - [`cache`] / [`store`]: checkpoint cache with optional disk mirror
//! - [`single_flight`]: per-contract evaluation gate
//! - [`evaluator`]: the [`StateEvaluator`] fold itself
//! - [`metrics`]: run counters and reporting

pub mod cache;
pub mod definitions;
pub mod evaluator;
pub mod interactions;
pub mod metrics;
pub mod single_flight;
pub mod sorter;
pub mod store;

pub use cache::{StateCache, DEFAULT_MAX_CHECKPOINTS};
pub use definitions::DefinitionLoader;
pub use evaluator::{StateEvaluator, DEFAULT_CHECKPOINT_INTERVAL};
pub use interactions::InteractionsLoader;
pub use metrics::{EvalMetrics, EvalMetricsSnapshot};
pub use single_flight::ContractLocks;
pub use sorter::sort_interactions;
pub use store::FsCheckpointStore;
