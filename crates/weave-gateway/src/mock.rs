//! In-memory mock ledger for tests.
//!
//! Simulates a small gateway: transactions with tags and data payloads,
//! block confirmation, cursor pagination, and submissions. Also provides
//! error injection so callers can exercise transport-failure paths without
//! a network.
//!
//! # Example
//!
//! ```ignore
//! let ledger = MockLedger::new();
//! let contract = ledger.deploy_script_contract("token", &json!({"balances": {}}));
//! ledger.add_interaction(&contract, &Address::new("alice"), 2, &json!({"function": "transfer"}));
//! ```

use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use weave_types::encoding::{b64url_encode, sha256_concat};
use weave_types::tags::{self, TagMap};
use weave_types::{Address, ContractId, TxId};

use crate::client::{BlockRef, InteractionPage, LedgerClient, TransactionDraft, TxMetadata};

#[derive(Default)]
struct MockInner {
    txs: HashMap<TxId, TxMetadata>,
    data: HashMap<TxId, Vec<u8>>,
    height: u64,
    force_error: Option<String>,
    submitted: Vec<TransactionDraft>,
    seq: u64,
}

/// Mock ledger backed by in-memory maps.
#[derive(Default)]
pub struct MockLedger {
    inner: Mutex<MockInner>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic block hash for a mock height. Public so tests can
    /// derive the sort keys the loader will compute.
    pub fn block_hash(height: u64) -> String {
        b64url_encode(&sha256_concat(&[b"mock-block", &height.to_be_bytes()]))
    }

    /// Set the chain head height.
    pub fn set_height(&self, height: u64) {
        self.inner.lock().height = height;
    }

    /// Make every subsequent call fail with the given message, or clear
    /// the injected failure with `None`.
    pub fn set_force_error(&self, message: Option<&str>) {
        self.inner.lock().force_error = message.map(String::from);
    }

    /// Insert a raw transaction record.
    pub fn add_transaction(&self, meta: TxMetadata) {
        let mut inner = self.inner.lock();
        if let Some(block) = &meta.block {
            inner.height = inner.height.max(block.height);
        }
        inner.txs.insert(meta.id.clone(), meta);
    }

    /// Attach a data payload to a transaction id.
    pub fn add_data(&self, id: &TxId, bytes: impl Into<Vec<u8>>) {
        self.inner.lock().data.insert(id.clone(), bytes.into());
    }

    /// Drafts submitted through [`LedgerClient::submit_transaction`].
    pub fn submitted(&self) -> Vec<TransactionDraft> {
        self.inner.lock().submitted.clone()
    }

    fn next_tx_id(&self) -> TxId {
        let mut inner = self.inner.lock();
        inner.seq += 1;
        TxId::derive_from(&[b"mock-tx", &inner.seq.to_be_bytes()])
    }

    fn confirmed(&self, id: TxId, owner: &str, tags: TagMap, height: u64) -> TxMetadata {
        TxMetadata {
            id,
            owner: Address::new(owner),
            tags,
            block: Some(BlockRef {
                height,
                indep_hash: Self::block_hash(height),
            }),
        }
    }

    /// Deploy a contract whose source is a builtin-handler manifest.
    pub fn deploy_script_contract(&self, handler: &str, init_state: &Value) -> ContractId {
        let mut source_tags = TagMap::new();
        source_tags.insert(
            tags::CONTRACT_TYPE.to_string(),
            tags::CONTRACT_TYPE_SCRIPT.to_string(),
        );
        let manifest = format!(r#"{{"handler":"{}"}}"#, handler);
        self.deploy_contract(source_tags, manifest.into_bytes(), init_state)
    }

    /// Deploy a contract with WASM bytecode.
    pub fn deploy_wasm_contract(&self, lang: &str, bytecode: &[u8], init_state: &Value) -> ContractId {
        let mut source_tags = TagMap::new();
        source_tags.insert(
            tags::CONTRACT_TYPE.to_string(),
            tags::CONTRACT_TYPE_WASM.to_string(),
        );
        source_tags.insert(tags::WASM_LANG.to_string(), lang.to_string());
        self.deploy_contract(source_tags, bytecode.to_vec(), init_state)
    }

    /// Deploy a contract with explicit source tags and payload; the
    /// definition and source transactions confirm at height 1.
    pub fn deploy_contract(
        &self,
        source_tags: TagMap,
        source_data: Vec<u8>,
        init_state: &Value,
    ) -> ContractId {
        let src_id = self.next_tx_id();
        let src_meta = self.confirmed(src_id.clone(), "contract-deployer", source_tags, 1);
        self.add_transaction(src_meta);
        self.add_data(&src_id, source_data);

        let contract_id = self.next_tx_id();
        let mut contract_tags = TagMap::new();
        contract_tags.insert(
            tags::APP_NAME.to_string(),
            tags::APP_NAME_CONTRACT.to_string(),
        );
        contract_tags.insert(tags::CONTRACT_SRC.to_string(), src_id.as_str().to_string());
        contract_tags.insert(tags::INIT_STATE.to_string(), init_state.to_string());
        let contract_meta = self.confirmed(contract_id.clone(), "contract-deployer", contract_tags, 1);
        self.add_transaction(contract_meta);

        ContractId::from(contract_id)
    }

    /// Add a confirmed interaction against a contract.
    pub fn add_interaction(
        &self,
        contract_id: &ContractId,
        owner: &Address,
        height: u64,
        input: &Value,
    ) -> TxId {
        let id = self.next_tx_id();
        let itx_tags = tags::interaction_tags(contract_id, input, &[]);
        let meta = self.confirmed(id.clone(), owner.as_str(), itx_tags, height);
        self.add_transaction(meta);
        id
    }

    /// Add a confirmed interaction whose `Input` tag holds an arbitrary
    /// raw string (possibly not valid JSON).
    pub fn add_raw_interaction(
        &self,
        contract_id: &ContractId,
        owner: &Address,
        height: u64,
        input_raw: &str,
    ) -> TxId {
        let id = self.next_tx_id();
        let mut itx_tags = TagMap::new();
        itx_tags.insert(
            tags::APP_NAME.to_string(),
            tags::APP_NAME_INTERACTION.to_string(),
        );
        itx_tags.insert(
            tags::CONTRACT.to_string(),
            contract_id.as_str().to_string(),
        );
        itx_tags.insert(tags::INPUT.to_string(), input_raw.to_string());
        let meta = self.confirmed(id.clone(), owner.as_str(), itx_tags, height);
        self.add_transaction(meta);
        id
    }

    /// Add an interaction that is still pending confirmation. Loaders must
    /// never return it.
    pub fn add_pending_interaction(
        &self,
        contract_id: &ContractId,
        owner: &Address,
        input: &Value,
    ) -> TxId {
        let id = self.next_tx_id();
        let itx_tags = tags::interaction_tags(contract_id, input, &[]);
        let meta = TxMetadata {
            id: id.clone(),
            owner: owner.clone(),
            tags: itx_tags,
            block: None,
        };
        self.inner.lock().txs.insert(id.clone(), meta);
        id
    }

    fn check_error(&self) -> Result<()> {
        if let Some(message) = &self.inner.lock().force_error {
            bail!("{}", message);
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn fetch_transaction(&self, id: &TxId) -> Result<Option<TxMetadata>> {
        self.check_error()?;
        Ok(self.inner.lock().txs.get(id).cloned())
    }

    async fn fetch_data(&self, id: &TxId) -> Result<Option<Vec<u8>>> {
        self.check_error()?;
        Ok(self.inner.lock().data.get(id).cloned())
    }

    async fn query_interactions(
        &self,
        contract_id: &ContractId,
        from_height: u64,
        to_height: u64,
        cursor: Option<String>,
        page_size: u32,
    ) -> Result<InteractionPage> {
        self.check_error()?;
        let inner = self.inner.lock();

        // Stable order across pages: confirmed height, then id.
        let mut matches: Vec<&TxMetadata> = inner
            .txs
            .values()
            .filter(|meta| {
                meta.block
                    .as_ref()
                    .map(|b| b.height >= from_height && b.height <= to_height)
                    .unwrap_or(false)
                    && tags::is_interaction_for(&meta.tags, contract_id)
            })
            .collect();
        matches.sort_by(|a, b| {
            let ha = a.block.as_ref().map(|b| b.height).unwrap_or(0);
            let hb = b.block.as_ref().map(|b| b.height).unwrap_or(0);
            ha.cmp(&hb).then_with(|| a.id.cmp(&b.id))
        });

        let start = match cursor {
            None => 0,
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| anyhow!("bad mock cursor: {}", c))?,
        };
        let end = (start + page_size.max(1) as usize).min(matches.len());
        let items: Vec<TxMetadata> = matches
            .get(start..end)
            .unwrap_or(&[])
            .iter()
            .map(|m| (*m).clone())
            .collect();
        let next_cursor = if end < matches.len() {
            Some(end.to_string())
        } else {
            None
        };

        Ok(InteractionPage { items, next_cursor })
    }

    async fn submit_transaction(&self, draft: TransactionDraft) -> Result<TxId> {
        self.check_error()?;
        let id = self.next_tx_id();
        self.inner.lock().submitted.push(draft);
        Ok(id)
    }

    async fn current_height(&self) -> Result<u64> {
        self.check_error()?;
        Ok(self.inner.lock().height)
    }
}
