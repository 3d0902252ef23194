//! Per-contract evaluation gate.
//!
//! Concurrent requests for the same contract would otherwise replay the
//! same interactions in parallel and race their checkpoint writes. The
//! gate serializes root evaluations per contract id; different contracts
//! proceed fully in parallel.
//!
//! Only root evaluations take a gate. Nested foreign reads evaluate
//! directly, so a gate is never awaited from inside another gate and two
//! roots reading each other's contracts cannot deadlock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use weave_types::ids::ContractId;

#[derive(Default)]
pub struct ContractLocks {
    inner: Mutex<HashMap<ContractId, Arc<AsyncMutex<()>>>>,
}

impl ContractLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The async gate for one contract, created on first use. The map
    /// grows with the number of distinct contracts seen, which is the
    /// same bound the checkpoint cache already has.
    pub fn gate(&self, contract_id: &ContractId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.inner.lock();
        locks
            .entry(contract_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}
