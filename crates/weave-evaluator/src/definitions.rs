//! Contract definition loading.
//!
//! Definitions are immutable, so the loader fetches each one once and keeps
//! it for the process lifetime. Resolution walks the tag vocabulary: the
//! definition transaction names a source transaction, the source transaction
//! declares its type (and language, for WASM), and the initial state comes
//! inline, by reference, or from the definition's own data payload.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use weave_gateway::{LedgerClient, TxMetadata};
use weave_types::ids::ContractId;
use weave_types::tags::{self, TagMap};
use weave_types::{ContractDefinition, EvalError, SourceType, TxId};

pub struct DefinitionLoader {
    client: Arc<dyn LedgerClient>,
    cache: RwLock<HashMap<ContractId, Arc<ContractDefinition>>>,
}

impl DefinitionLoader {
    pub fn new(client: Arc<dyn LedgerClient>) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a contract's definition, from cache when already loaded.
    pub async fn load(&self, contract_id: &ContractId) -> Result<Arc<ContractDefinition>, EvalError> {
        if let Some(definition) = self.cache.read().get(contract_id) {
            return Ok(Arc::clone(definition));
        }

        let definition = Arc::new(self.fetch(contract_id).await?);
        debug!(
            contract = %contract_id,
            source = definition.source.label(),
            deploy_height = definition.deploy_height,
            "loaded contract definition"
        );
        self.cache
            .write()
            .entry(contract_id.clone())
            .or_insert_with(|| Arc::clone(&definition));
        Ok(definition)
    }

    async fn fetch(&self, contract_id: &ContractId) -> Result<ContractDefinition, EvalError> {
        let meta = self
            .fetch_tx(&contract_id.tx_id(), "definition fetch")
            .await?
            .ok_or_else(|| EvalError::DefinitionNotFound {
                contract_id: contract_id.clone(),
            })?;

        if !tags::is_contract_definition(&meta.tags) {
            return Err(self.malformed(
                contract_id,
                "transaction is not tagged as a contract definition",
            ));
        }
        let block = meta.block.as_ref().ok_or_else(|| {
            self.malformed(contract_id, "definition transaction is not confirmed")
        })?;

        let src_tx_id = tags::tag(&meta.tags, tags::CONTRACT_SRC)
            .map(TxId::new)
            .ok_or_else(|| self.malformed(contract_id, "definition names no source transaction"))?;

        let src_meta = self
            .fetch_tx(&src_tx_id, "source fetch")
            .await?
            .ok_or_else(|| {
                self.malformed(
                    contract_id,
                    format!("source transaction {} does not resolve", src_tx_id),
                )
            })?;
        let src_data = self
            .fetch_payload(&src_tx_id, "source data fetch")
            .await?
            .ok_or_else(|| {
                self.malformed(
                    contract_id,
                    format!("source transaction {} has no data payload", src_tx_id),
                )
            })?;

        let source = self.resolve_source(contract_id, &src_meta.tags, src_data)?;
        let init_state = self.resolve_init_state(contract_id, &meta).await?;

        Ok(ContractDefinition {
            contract_id: contract_id.clone(),
            src_tx_id,
            source,
            init_state,
            owner: meta.owner.clone(),
            deploy_height: block.height,
            content_type: tags::tag(&src_meta.tags, tags::CONTENT_TYPE).map(String::from),
        })
    }

    fn resolve_source(
        &self,
        contract_id: &ContractId,
        src_tags: &TagMap,
        src_data: Vec<u8>,
    ) -> Result<SourceType, EvalError> {
        match tags::tag(src_tags, tags::CONTRACT_TYPE) {
            Some(tags::CONTRACT_TYPE_SCRIPT) => {
                let manifest: Value = serde_json::from_slice(&src_data).map_err(|err| {
                    self.malformed(contract_id, format!("script manifest is not JSON: {}", err))
                })?;
                let handler = manifest
                    .get("handler")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        self.malformed(contract_id, "script manifest names no handler")
                    })?;
                Ok(SourceType::Script {
                    handler: handler.to_string(),
                })
            }
            Some(tags::CONTRACT_TYPE_WASM) => {
                let lang = tags::tag(src_tags, tags::WASM_LANG).ok_or_else(|| {
                    self.malformed(contract_id, "wasm source declares no language")
                })?;
                Ok(SourceType::Wasm {
                    lang: lang.to_string(),
                    bytecode: src_data,
                })
            }
            Some(other) => Err(self.malformed(
                contract_id,
                format!("unrecognized contract type \"{}\"", other),
            )),
            None => Err(self.malformed(contract_id, "source transaction declares no contract type")),
        }
    }

    /// Initial state: inline tag, referenced transaction, or the definition
    /// transaction's own data payload, in that precedence order.
    async fn resolve_init_state(
        &self,
        contract_id: &ContractId,
        meta: &TxMetadata,
    ) -> Result<Value, EvalError> {
        if let Some(inline) = tags::tag(&meta.tags, tags::INIT_STATE) {
            return serde_json::from_str(inline).map_err(|err| {
                self.malformed(contract_id, format!("inline initial state is not JSON: {}", err))
            });
        }
        let state_tx = match tags::tag(&meta.tags, tags::INIT_STATE_TX) {
            Some(referenced) => TxId::new(referenced),
            None => meta.id.clone(),
        };
        let bytes = self
            .fetch_payload(&state_tx, "initial state fetch")
            .await?
            .ok_or_else(|| {
                self.malformed(
                    contract_id,
                    format!("initial state transaction {} has no data", state_tx),
                )
            })?;
        serde_json::from_slice(&bytes).map_err(|err| {
            self.malformed(contract_id, format!("initial state is not JSON: {}", err))
        })
    }

    async fn fetch_tx(
        &self,
        id: &TxId,
        operation: &str,
    ) -> Result<Option<TxMetadata>, EvalError> {
        self.client
            .fetch_transaction(id)
            .await
            .map_err(|err| EvalError::LoaderUnavailable {
                operation: operation.to_string(),
                reason: err.to_string(),
            })
    }

    async fn fetch_payload(&self, id: &TxId, operation: &str) -> Result<Option<Vec<u8>>, EvalError> {
        self.client
            .fetch_data(id)
            .await
            .map_err(|err| EvalError::LoaderUnavailable {
                operation: operation.to_string(),
                reason: err.to_string(),
            })
    }

    fn malformed(&self, contract_id: &ContractId, reason: impl Into<String>) -> EvalError {
        EvalError::DefinitionMalformed {
            contract_id: contract_id.clone(),
            reason: reason.into(),
        }
    }
}
