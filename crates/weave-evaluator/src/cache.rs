//! Checkpoint cache: in-memory per-contract height maps, optionally
//! mirrored to a filesystem store.
//!
//! Retention is bounded per contract: when an insert pushes a contract
//! past its budget, the lowest checkpoints are pruned, so the newest
//! entries (and in particular the highest) always survive. Inserts are
//! idempotent by construction since replay is deterministic.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;
use tracing::{debug, warn};

use weave_types::ids::ContractId;
use weave_types::CacheEntry;

use crate::store::FsCheckpointStore;

/// Default number of checkpoints kept per contract.
pub const DEFAULT_MAX_CHECKPOINTS: usize = 8;

pub struct StateCache {
    entries: RwLock<HashMap<ContractId, BTreeMap<u64, CacheEntry>>>,
    /// Contracts whose disk entries have been folded in. Marked even on
    /// a failed disk read so one bad directory is not re-read per lookup.
    loaded: RwLock<HashSet<ContractId>>,
    store: Option<FsCheckpointStore>,
    max_per_contract: usize,
}

impl StateCache {
    /// Cache with no disk mirror.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            loaded: RwLock::new(HashSet::new()),
            store: None,
            max_per_contract: DEFAULT_MAX_CHECKPOINTS,
        }
    }

    /// Cache mirrored to a filesystem store, loaded lazily per contract.
    pub fn with_store(store: FsCheckpointStore) -> Self {
        Self {
            store: Some(store),
            ..Self::in_memory()
        }
    }

    pub fn with_retention(mut self, max_per_contract: usize) -> Self {
        self.max_per_contract = max_per_contract.max(1);
        self
    }

    fn ensure_loaded(&self, contract_id: &ContractId) {
        let Some(store) = &self.store else {
            return;
        };
        if self.loaded.read().contains(contract_id) {
            return;
        }
        self.loaded.write().insert(contract_id.clone());
        match store.load_contract(contract_id) {
            Ok(from_disk) if !from_disk.is_empty() => {
                debug!(
                    contract = %contract_id,
                    count = from_disk.len(),
                    "loaded checkpoints from disk"
                );
                let mut entries = self.entries.write();
                let heights = entries.entry(contract_id.clone()).or_default();
                for entry in from_disk {
                    heights.entry(entry.block_height).or_insert(entry);
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(contract = %contract_id, error = %err, "checkpoint disk load failed");
            }
        }
    }

    /// Highest checkpoint at or below `height`, if any.
    pub fn latest_at_or_below(&self, contract_id: &ContractId, height: u64) -> Option<CacheEntry> {
        self.ensure_loaded(contract_id);
        let entries = self.entries.read();
        entries
            .get(contract_id)?
            .range(..=height)
            .next_back()
            .map(|(_, entry)| entry.clone())
    }

    /// Commit a checkpoint, pruning the contract down to its retention
    /// budget. The in-memory insert is the commit point; disk writes are
    /// best-effort mirrors and only logged on failure.
    pub fn insert(&self, contract_id: &ContractId, entry: CacheEntry) {
        self.ensure_loaded(contract_id);
        let mut pruned: Vec<u64> = Vec::new();
        {
            let mut entries = self.entries.write();
            let heights = entries.entry(contract_id.clone()).or_default();
            heights.insert(entry.block_height, entry.clone());
            while heights.len() > self.max_per_contract {
                let Some((&lowest, _)) = heights.iter().next() else {
                    break;
                };
                heights.remove(&lowest);
                pruned.push(lowest);
            }
        }
        if let Some(store) = &self.store {
            if let Err(err) = store.save(contract_id, &entry) {
                warn!(contract = %contract_id, error = %err, "checkpoint disk write failed");
            }
            for height in pruned {
                if let Err(err) = store.remove(contract_id, height) {
                    warn!(contract = %contract_id, height, error = %err, "checkpoint prune failed");
                }
            }
        }
    }

    /// Number of checkpoints currently held for a contract.
    pub fn checkpoint_count(&self, contract_id: &ContractId) -> usize {
        self.ensure_loaded(contract_id);
        self.entries
            .read()
            .get(contract_id)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Checkpoint heights currently held for a contract, ascending.
    pub fn checkpoint_heights(&self, contract_id: &ContractId) -> Vec<u64> {
        self.ensure_loaded(contract_id);
        self.entries
            .read()
            .get(contract_id)
            .map(|heights| heights.keys().copied().collect())
            .unwrap_or_default()
    }
}
