//! The `Weave` client: composition root for the evaluation pipeline.
//!
//! Wires a ledger gateway, a handler registry, and a checkpoint cache into
//! one facade with the three operations callers use: `read_contract`,
//! `view_state`, and `write_interaction`. Caches live exactly as long as
//! the client instance that owns them.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;

use weave_evaluator::{EvalMetricsSnapshot, FsCheckpointStore, StateCache, StateEvaluator};
use weave_gateway::{HttpGateway, LedgerClient, TransactionDraft};
use weave_handlers::{ExecutorFactory, HandlerRegistry};
use weave_types::ids::{Address, ContractId, TxId};
use weave_types::tags;
use weave_types::{EvalError, EvaluationOptions, EvaluationState, InteractionResult};

/// Directory under the home directory used when persistence is requested
/// without an explicit path.
pub const DEFAULT_CACHE_DIR: &str = ".weave-replay";

/// Builder for [`Weave`].
pub struct WeaveBuilder {
    gateway: Option<Arc<dyn LedgerClient>>,
    registry: HandlerRegistry,
    cache_dir: Option<PathBuf>,
    persistent: bool,
    max_checkpoints: Option<usize>,
    checkpoint_interval: Option<usize>,
    options: EvaluationOptions,
}

impl WeaveBuilder {
    fn new() -> Self {
        Self {
            gateway: None,
            registry: HandlerRegistry::with_defaults(),
            cache_dir: None,
            persistent: false,
            max_checkpoints: None,
            checkpoint_interval: None,
            options: EvaluationOptions::default(),
        }
    }

    /// Use a specific ledger client instead of the env-configured HTTP
    /// gateway. Tests pass the mock ledger here.
    pub fn with_gateway(mut self, gateway: Arc<dyn LedgerClient>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Replace the builtin handler registry.
    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Mirror checkpoints to disk under `dir`.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self.persistent = true;
        self
    }

    /// Mirror checkpoints to disk under the default per-user directory.
    pub fn with_persistent_cache(mut self) -> Self {
        self.persistent = true;
        self
    }

    /// Checkpoints retained per contract.
    pub fn with_max_checkpoints(mut self, max: usize) -> Self {
        self.max_checkpoints = Some(max);
        self
    }

    /// Interactions folded between intermediate checkpoint commits.
    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = Some(interval);
        self
    }

    /// Default evaluation options for every call on the built client.
    pub fn with_options(mut self, options: EvaluationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<Weave> {
        let gateway = self
            .gateway
            .unwrap_or_else(|| Arc::new(HttpGateway::from_env()));

        let mut cache = if self.persistent {
            let dir = match self.cache_dir {
                Some(dir) => dir,
                None => dirs::home_dir()
                    .ok_or_else(|| anyhow!("no home directory for the default cache"))?
                    .join(DEFAULT_CACHE_DIR),
            };
            StateCache::with_store(FsCheckpointStore::new(dir)?)
        } else {
            StateCache::in_memory()
        };
        if let Some(max) = self.max_checkpoints {
            cache = cache.with_retention(max);
        }

        let factory = ExecutorFactory::new(self.registry);
        let interval = self
            .checkpoint_interval
            .unwrap_or(weave_evaluator::DEFAULT_CHECKPOINT_INTERVAL);
        let evaluator = StateEvaluator::with_config(Arc::clone(&gateway), factory, cache, interval);

        Ok(Weave {
            gateway,
            evaluator,
            options: RwLock::new(self.options),
        })
    }
}

/// Client for reading and writing contracts on the weave.
pub struct Weave {
    gateway: Arc<dyn LedgerClient>,
    evaluator: StateEvaluator,
    options: RwLock<EvaluationOptions>,
}

impl Weave {
    pub fn builder() -> WeaveBuilder {
        WeaveBuilder::new()
    }

    /// Replace the default evaluation options for subsequent calls.
    /// In-flight evaluations keep the options they started with.
    pub fn set_evaluation_options(&self, options: EvaluationOptions) {
        *self.options.write() = options;
    }

    pub fn evaluation_options(&self) -> EvaluationOptions {
        self.options.read().clone()
    }

    /// Evaluate a contract's state as of `height` (`None` = chain head).
    pub async fn read_contract(
        &self,
        contract_id: &ContractId,
        height: Option<u64>,
    ) -> Result<EvaluationState, EvalError> {
        let options = self.evaluation_options();
        self.evaluator.eval(contract_id, height, &options).await
    }

    /// Evaluate several contracts concurrently. Contracts are independent,
    /// so the reads proceed fully in parallel; each id gets its own result.
    pub async fn read_contracts(
        &self,
        contract_ids: &[ContractId],
        height: Option<u64>,
    ) -> Vec<(ContractId, Result<EvaluationState, EvalError>)> {
        let reads = contract_ids.iter().map(|id| async move {
            let state = self.read_contract(id, height).await;
            (id.clone(), state)
        });
        join_all(reads).await
    }

    /// Dry-run one synthetic interaction on top of the evaluated state.
    ///
    /// Contract-level failures come back as the result's outcome, never as
    /// `Err`; nothing the dry-run does is persisted.
    pub async fn view_state(
        &self,
        contract_id: &ContractId,
        input: Value,
        height: Option<u64>,
        caller: Option<Address>,
    ) -> Result<InteractionResult, EvalError> {
        let options = self.evaluation_options();
        let caller = caller.unwrap_or_else(|| Address::new("viewer"));
        self.evaluator
            .dry_run(contract_id, caller, input, height, &options)
            .await
    }

    /// Submit an interaction against a contract. Tag assembly happens here;
    /// signing, funding, and confirmation are the gateway's concern.
    pub async fn write_interaction(&self, contract_id: &ContractId, input: &Value) -> Result<TxId> {
        self.write_interaction_with(contract_id, input, &[]).await
    }

    /// Submit an interaction that declares writes against foreign contracts.
    /// Declarations require `internal_writes` in the client's options.
    pub async fn write_interaction_with(
        &self,
        contract_id: &ContractId,
        input: &Value,
        declared_writes: &[ContractId],
    ) -> Result<TxId> {
        if !declared_writes.is_empty() && !self.evaluation_options().internal_writes {
            return Err(anyhow!(
                "declared writes require the internal_writes evaluation option"
            ));
        }
        let draft = TransactionDraft {
            tags: tags::interaction_tags(contract_id, input, declared_writes),
            data: Vec::new(),
        };
        let id = self.gateway.submit_transaction(draft).await?;
        tracing::debug!(contract = %contract_id, tx = %id, "interaction submitted");
        Ok(id)
    }

    /// Counters for the evaluations this client has run.
    pub fn metrics(&self) -> EvalMetricsSnapshot {
        self.evaluator.metrics().snapshot()
    }

    /// The evaluator, for callers that need cache introspection.
    pub fn evaluator(&self) -> &StateEvaluator {
        &self.evaluator
    }
}
