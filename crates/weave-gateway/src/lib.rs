//! Ledger Gateway Layer
//!
//! The boundary between the evaluation core and the ledger hosting it.
//!
//! This crate provides:
//! - [`client`]: the [`LedgerClient`] trait plus the transaction records it speaks
//! - [`http`]: HTTP gateway implementation over `ureq`
//! - [`query`]: cursor pagination helpers
//! - [`mock`]: in-memory ledger for tests
//!
//! # Example
//!
//! ```ignore
//! use weave_gateway::HttpGateway;
//!
//! let gateway = HttpGateway::from_env();
//! let head = gateway.current_height().await?;
//! ```

pub mod client;
pub mod http;
pub mod mock;
pub mod query;

// Re-export main types for convenience
pub use client::{BlockRef, InteractionPage, LedgerClient, TransactionDraft, TxMetadata};
pub use http::{HttpGateway, DEFAULT_GATEWAY};
pub use mock::MockLedger;
pub use query::{drain_interactions, MAX_PAGE_SIZE};
