//! The ledger client boundary.
//!
//! Everything the evaluation core needs from the ledger goes through
//! [`LedgerClient`]: transaction metadata, data payloads, interaction
//! queries, submission, and the current chain head. Implementations decide
//! transport; the core only sees these five operations.

use anyhow::Result;
use async_trait::async_trait;

use weave_types::tags::TagMap;
use weave_types::{Address, ContractId, TxId};

/// The block a transaction was confirmed in.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRef {
    pub height: u64,
    /// Content hash of the block, independent of its position. Combined
    /// with the transaction id to derive the replay sort key.
    pub indep_hash: String,
}

/// Transaction metadata as the ledger reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct TxMetadata {
    pub id: TxId,
    pub owner: Address,
    pub tags: TagMap,
    /// `None` while the transaction is pending confirmation.
    pub block: Option<BlockRef>,
}

impl TxMetadata {
    /// True once the ledger has confirmed the transaction into a block.
    pub fn is_confirmed(&self) -> bool {
        self.block.is_some()
    }
}

/// An unsigned transaction handed to the ledger client for submission.
/// Signing and funding are the client's concern, not the core's.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionDraft {
    pub tags: TagMap,
    pub data: Vec<u8>,
}

/// One page of an interaction query.
#[derive(Debug, Clone)]
pub struct InteractionPage {
    pub items: Vec<TxMetadata>,
    /// Cursor for the next page; `None` when this page is the last.
    pub next_cursor: Option<String>,
}

/// Client for the append-only ledger hosting contracts and interactions.
///
/// Fetch methods return `Ok(None)` when the id does not exist; `Err` is
/// reserved for transport failures. Callers that need the distinction
/// (definition resolution does) rely on it.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetch metadata and tags for a transaction.
    async fn fetch_transaction(&self, id: &TxId) -> Result<Option<TxMetadata>>;

    /// Fetch a transaction's data payload.
    async fn fetch_data(&self, id: &TxId) -> Result<Option<Vec<u8>>>;

    /// Query interactions against a contract within an inclusive height
    /// range. Pagination is cursor-based; pass the previous page's
    /// `next_cursor` to continue.
    async fn query_interactions(
        &self,
        contract_id: &ContractId,
        from_height: u64,
        to_height: u64,
        cursor: Option<String>,
        page_size: u32,
    ) -> Result<InteractionPage>;

    /// Submit a transaction for inclusion on the ledger.
    async fn submit_transaction(&self, draft: TransactionDraft) -> Result<TxId>;

    /// Current chain head height.
    async fn current_height(&self) -> Result<u64>;
}
