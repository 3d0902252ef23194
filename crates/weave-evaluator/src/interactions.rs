//! Interaction loading.
//!
//! Drains the gateway's cursor pages for a height range and turns confirmed,
//! correctly-tagged transaction records into [`Interaction`]s. Pagination is
//! invisible to callers: the returned vector is the complete confirmed set
//! for the range. Records whose `Input` tag is not valid JSON are wire-level
//! garbage and are skipped with a warning; shape problems inside valid JSON
//! are the handler's concern, not the loader's.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use weave_gateway::{drain_interactions, LedgerClient, TxMetadata, MAX_PAGE_SIZE};
use weave_types::ids::{ContractId, SortKey};
use weave_types::tags;
use weave_types::{EvalError, Interaction};

pub struct InteractionsLoader {
    client: Arc<dyn LedgerClient>,
}

impl InteractionsLoader {
    pub fn new(client: Arc<dyn LedgerClient>) -> Self {
        Self { client }
    }

    /// Resolve an optional height bound to a concrete height, once.
    /// `None` means the current chain head at call time.
    pub async fn resolve_height(&self, to_height: Option<u64>) -> Result<u64, EvalError> {
        match to_height {
            Some(height) => Ok(height),
            None => self
                .client
                .current_height()
                .await
                .map_err(|err| EvalError::LoaderUnavailable {
                    operation: "height resolution".to_string(),
                    reason: err.to_string(),
                }),
        }
    }

    /// Load every confirmed interaction against `contract_id` with height in
    /// `[from_height, to_height]`. An empty range is `Ok(vec![])`.
    pub async fn load(
        &self,
        contract_id: &ContractId,
        from_height: u64,
        to_height: u64,
    ) -> Result<Vec<Interaction>, EvalError> {
        if from_height > to_height {
            return Ok(Vec::new());
        }

        let records = drain_interactions(
            self.client.as_ref(),
            contract_id,
            from_height,
            to_height,
            MAX_PAGE_SIZE,
        )
        .await
        .map_err(|err| EvalError::LoaderUnavailable {
            operation: "interaction query".to_string(),
            reason: err.to_string(),
        })?;

        let mut interactions = Vec::with_capacity(records.len());
        for record in records {
            if let Some(interaction) = to_interaction(contract_id, record) {
                interactions.push(interaction);
            }
        }
        debug!(
            contract = %contract_id,
            from_height,
            to_height,
            count = interactions.len(),
            "loaded interactions"
        );
        Ok(interactions)
    }
}

/// Convert one gateway record, or drop it when it is not a usable
/// interaction against this contract.
fn to_interaction(contract_id: &ContractId, record: TxMetadata) -> Option<Interaction> {
    // The query is tag-filtered server-side; re-check so a sloppy gateway
    // cannot smuggle unrelated transactions into the fold.
    if !tags::is_interaction_for(&record.tags, contract_id) {
        warn!(contract = %contract_id, tx = %record.id, "dropping mis-tagged query result");
        return None;
    }
    let block = match &record.block {
        Some(block) => block.clone(),
        None => {
            warn!(contract = %contract_id, tx = %record.id, "dropping unconfirmed interaction");
            return None;
        }
    };
    let raw_input = match tags::tag(&record.tags, tags::INPUT) {
        Some(raw) => raw,
        None => {
            warn!(contract = %contract_id, tx = %record.id, "dropping interaction with no input tag");
            return None;
        }
    };
    let input: Value = match serde_json::from_str(raw_input) {
        Ok(input) => input,
        Err(err) => {
            warn!(
                contract = %contract_id,
                tx = %record.id,
                error = %err,
                "dropping interaction with unparseable input"
            );
            return None;
        }
    };

    let sort_key = SortKey::derive(&block.indep_hash, &record.id);
    Some(Interaction {
        id: record.id,
        owner: record.owner,
        contract_id: contract_id.clone(),
        block_height: block.height,
        sort_key,
        input,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weave_gateway::MockLedger;
    use weave_types::Address;

    fn loader(ledger: Arc<MockLedger>) -> InteractionsLoader {
        InteractionsLoader::new(ledger)
    }

    #[tokio::test]
    async fn loads_confirmed_interactions_in_range() {
        let ledger = Arc::new(MockLedger::new());
        let contract = ledger.deploy_script_contract("token", &json!({}));
        let alice = Address::new("alice");
        for height in [3, 5, 9] {
            ledger.add_interaction(&contract, &alice, height, &json!({"n": height}));
        }

        let loader = loader(Arc::clone(&ledger));
        let loaded = loader.load(&contract, 4, 9).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().all(|i| i.block_height >= 4));
        assert!(loaded
            .iter()
            .all(|i| i.sort_key == SortKey::derive(&MockLedger::block_hash(i.block_height), &i.id)));
    }

    #[tokio::test]
    async fn empty_range_is_ok_not_an_error() {
        let ledger = Arc::new(MockLedger::new());
        let contract = ledger.deploy_script_contract("token", &json!({}));
        let loader = loader(Arc::clone(&ledger));
        assert!(loader.load(&contract, 0, 100).await.unwrap().is_empty());
        assert!(loader.load(&contract, 10, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unparseable_input_is_skipped() {
        let ledger = Arc::new(MockLedger::new());
        let contract = ledger.deploy_script_contract("token", &json!({}));
        let alice = Address::new("alice");
        ledger.add_interaction(&contract, &alice, 3, &json!({"ok": true}));
        ledger.add_raw_interaction(&contract, &alice, 4, "{not json");

        let loader = loader(Arc::clone(&ledger));
        let loaded = loader.load(&contract, 0, 100).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].input, json!({"ok": true}));
    }

    #[tokio::test]
    async fn pending_interactions_are_excluded() {
        let ledger = Arc::new(MockLedger::new());
        let contract = ledger.deploy_script_contract("token", &json!({}));
        let alice = Address::new("alice");
        ledger.add_interaction(&contract, &alice, 3, &json!({"n": 1}));
        ledger.add_pending_interaction(&contract, &alice, &json!({"n": 2}));

        let loader = loader(Arc::clone(&ledger));
        assert_eq!(loader.load(&contract, 0, 100).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn transport_failure_is_loader_unavailable() {
        let ledger = Arc::new(MockLedger::new());
        let contract = ledger.deploy_script_contract("token", &json!({}));
        ledger.set_force_error(Some("gateway down"));

        let loader = loader(Arc::clone(&ledger));
        let err = loader.load(&contract, 0, 100).await.unwrap_err();
        assert!(matches!(err, EvalError::LoaderUnavailable { .. }));
    }

    #[tokio::test]
    async fn unbounded_height_resolves_to_chain_head_once() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_height(77);
        let loader = loader(Arc::clone(&ledger));
        assert_eq!(loader.resolve_height(None).await.unwrap(), 77);
        assert_eq!(loader.resolve_height(Some(12)).await.unwrap(), 12);
    }
}
