//! The evaluation state machine.
//!
//! `eval` folds a contract's ordered interactions into state: resolve the
//! definition, resume from the highest usable checkpoint, load and sort the
//! remaining range, apply each interaction through the handler, and commit
//! checkpoints. A run moves `Idle -> Loading -> Replaying -> Completed`
//! (or `Failed`), tracked for logs and metrics.
//!
//! Root evaluations are single-flight per contract. Nested evaluations
//! (foreign reads) bypass the gate and never persist checkpoints; they are
//! pure derived folds whose depth and cycle limits are enforced by the
//! call context before they start.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use weave_gateway::LedgerClient;
use weave_handlers::{CallContext, ExecutorFactory, ForeignReader};
use weave_types::ids::{Address, ContractId, SortKey, TxId};
use weave_types::{
    CacheEntry, EvalError, EvaluationOptions, EvaluationState, Interaction, InteractionResult,
    Outcome,
};

use crate::cache::StateCache;
use crate::definitions::DefinitionLoader;
use crate::interactions::InteractionsLoader;
use crate::metrics::EvalMetrics;
use crate::single_flight::ContractLocks;
use crate::sorter::sort_interactions;

/// Interactions folded between intermediate checkpoint commits.
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 100;

/// Lifecycle of one evaluation run, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Loading,
    Replaying,
    Completed,
    Failed,
}

fn eval_debug_enabled() -> bool {
    matches!(
        std::env::var("WEAVE_DEBUG_EVAL")
            .ok()
            .as_deref()
            .map(|v| v.to_ascii_lowercase())
            .as_deref(),
        Some("1") | Some("true") | Some("yes") | Some("on")
    )
}

struct Inner {
    definitions: DefinitionLoader,
    interactions: InteractionsLoader,
    factory: ExecutorFactory,
    cache: StateCache,
    locks: ContractLocks,
    metrics: EvalMetrics,
    checkpoint_interval: usize,
}

/// Cheaply clonable handle to one evaluation pipeline. Clones share the
/// caches, locks, and metrics; the foreign-read path holds one internally.
#[derive(Clone)]
pub struct StateEvaluator {
    inner: Arc<Inner>,
}

impl StateEvaluator {
    pub fn new(client: Arc<dyn LedgerClient>, factory: ExecutorFactory, cache: StateCache) -> Self {
        Self::with_config(client, factory, cache, DEFAULT_CHECKPOINT_INTERVAL)
    }

    pub fn with_config(
        client: Arc<dyn LedgerClient>,
        factory: ExecutorFactory,
        cache: StateCache,
        checkpoint_interval: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                definitions: DefinitionLoader::new(Arc::clone(&client)),
                interactions: InteractionsLoader::new(client),
                factory,
                cache,
                locks: ContractLocks::new(),
                metrics: EvalMetrics::default(),
                checkpoint_interval: checkpoint_interval.max(1),
            }),
        }
    }

    pub fn metrics(&self) -> &EvalMetrics {
        &self.inner.metrics
    }

    pub fn cache(&self) -> &StateCache {
        &self.inner.cache
    }

    pub fn definitions(&self) -> &DefinitionLoader {
        &self.inner.definitions
    }

    /// Evaluate a contract's state as of `to_height` (`None` = chain head).
    ///
    /// Takes the contract's single-flight gate: a second concurrent call for
    /// the same contract awaits the leader, then resumes from the checkpoint
    /// the leader committed instead of replaying the same range again.
    pub async fn eval(
        &self,
        contract_id: &ContractId,
        to_height: Option<u64>,
        options: &EvaluationOptions,
    ) -> Result<EvaluationState, EvalError> {
        let gate = self.inner.locks.gate(contract_id);
        let _held = gate.lock().await;

        self.inner.metrics.record_evaluation_started();
        match self
            .eval_unlocked(contract_id, to_height, options, &[], true)
            .await
        {
            Ok(state) => {
                self.inner.metrics.record_evaluation_completed();
                Ok(state)
            }
            Err(err) => {
                self.inner.metrics.record_evaluation_failed();
                warn!(contract = %contract_id, phase = ?Phase::Failed, error = %err, "evaluation failed");
                Err(err)
            }
        }
    }

    /// Dry-run a single synthetic interaction on top of the evaluated state.
    ///
    /// The real pipeline runs first (and may commit checkpoints for the real
    /// history); the synthetic interaction itself is ephemeral and its result
    /// is never persisted. The synthetic id is derived from the caller and
    /// input, so a dry-run is itself reproducible.
    pub async fn dry_run(
        &self,
        contract_id: &ContractId,
        caller: Address,
        input: serde_json::Value,
        to_height: Option<u64>,
        options: &EvaluationOptions,
    ) -> Result<InteractionResult, EvalError> {
        let evaluated = self.eval(contract_id, to_height, options).await?;
        let definition = self.inner.definitions.load(contract_id).await?;
        let handler = self.inner.factory.create(&definition, options)?;

        let height = evaluated.last_evaluated_height;
        let rendered = input.to_string();
        let id = TxId::derive_from(&[
            b"dry-run",
            contract_id.as_str().as_bytes(),
            caller.as_str().as_bytes(),
            rendered.as_bytes(),
            &height.to_be_bytes(),
        ]);
        let synthetic = Interaction {
            sort_key: SortKey::derive("dry-run", &id),
            id,
            owner: caller,
            contract_id: contract_id.clone(),
            block_height: height,
            input,
        };

        let mut ctx = CallContext::new(
            height,
            vec![contract_id.clone()],
            options.clone(),
            self.reader(),
        );
        Ok(handler
            .handle(evaluated.state.clone(), &synthetic, &mut ctx)
            .await)
    }

    fn reader(&self) -> Arc<dyn ForeignReader> {
        Arc::new(EvaluatorReader {
            evaluator: self.clone(),
        })
    }

    /// The fold itself, gate already held (or deliberately skipped for
    /// nested reads). `persist = false` keeps the cache untouched.
    async fn eval_unlocked(
        &self,
        contract_id: &ContractId,
        to_height: Option<u64>,
        options: &EvaluationOptions,
        caller_path: &[ContractId],
        persist: bool,
    ) -> Result<EvaluationState, EvalError> {
        let run = Uuid::new_v4();
        debug!(
            run = %run,
            contract = %contract_id,
            phase = ?Phase::Idle,
            depth = caller_path.len(),
            "evaluation requested"
        );

        debug!(run = %run, contract = %contract_id, phase = ?Phase::Loading, "resolving definition");
        let definition = self.inner.definitions.load(contract_id).await?;
        let to_height = self.inner.interactions.resolve_height(to_height).await?;

        let resumed = if options.use_cache {
            self.inner.cache.latest_at_or_below(contract_id, to_height)
        } else {
            None
        };
        let (mut acc, from_height, mut last_key) = match resumed {
            Some(entry) => {
                self.inner.metrics.record_cache_hit();
                if entry.block_height == to_height {
                    debug!(
                        run = %run,
                        contract = %contract_id,
                        phase = ?Phase::Completed,
                        height = to_height,
                        "served from checkpoint"
                    );
                    return Ok(entry.state);
                }
                (entry.state, entry.block_height + 1, entry.sort_key)
            }
            None => {
                self.inner.metrics.record_cache_miss();
                (
                    EvaluationState::initial(definition.init_state.clone()),
                    0,
                    None,
                )
            }
        };

        let pending = self
            .inner
            .interactions
            .load(contract_id, from_height, to_height)
            .await?;
        let sorted = sort_interactions(contract_id, pending)?;
        let handler = self.inner.factory.create(&definition, options)?;

        debug!(
            run = %run,
            contract = %contract_id,
            phase = ?Phase::Replaying,
            from_height,
            to_height,
            count = sorted.len(),
            "replaying interactions"
        );

        let reader = self.reader();
        let mut path = caller_path.to_vec();
        path.push(contract_id.clone());

        let mut since_checkpoint = 0usize;
        for (index, interaction) in sorted.iter().enumerate() {
            let mut ctx = CallContext::new(
                interaction.block_height,
                path.clone(),
                options.clone(),
                Arc::clone(&reader),
            );
            let result = handler
                .handle(acc.state.clone(), interaction, &mut ctx)
                .await;
            self.inner
                .metrics
                .record_interaction(result.is_ok(), result.gas_used);

            if eval_debug_enabled() {
                eprintln!(
                    "[eval] run={} contract={} tx={} height={} outcome={:?} gas={}",
                    run,
                    contract_id,
                    interaction.id,
                    interaction.block_height,
                    result.outcome,
                    result.gas_used
                );
            }

            acc.validity.insert(interaction.id.clone(), result.is_ok());
            match result.outcome {
                Outcome::Ok => acc.state = result.state,
                Outcome::ContractError | Outcome::Exception => {
                    if let Some(message) = result.error_message {
                        acc.error_messages.insert(interaction.id.clone(), message);
                    }
                }
            }
            acc.last_evaluated_height = interaction.block_height;
            last_key = Some(interaction.sort_key);
            since_checkpoint += 1;

            // Intermediate checkpoints only land on a height boundary:
            // a checkpoint at height h must cover every interaction at h.
            let height_done = sorted
                .get(index + 1)
                .map(|next| next.block_height > interaction.block_height)
                .unwrap_or(false);
            if persist && height_done && since_checkpoint >= self.inner.checkpoint_interval {
                self.inner.cache.insert(
                    contract_id,
                    CacheEntry::new(interaction.block_height, last_key, acc.clone()),
                );
                self.inner.metrics.record_checkpoint();
                since_checkpoint = 0;
            }
        }

        acc.last_evaluated_height = to_height;
        if persist {
            // The covering checkpoint is committed only after the fold fully
            // completed; a cancellation mid-fold leaves the cache at the
            // previous checkpoint.
            self.inner
                .cache
                .insert(contract_id, CacheEntry::new(to_height, last_key, acc.clone()));
            self.inner.metrics.record_checkpoint();
        }

        debug!(
            run = %run,
            contract = %contract_id,
            phase = ?Phase::Completed,
            height = to_height,
            interactions = sorted.len(),
            "evaluation complete"
        );
        Ok(acc)
    }
}

/// Foreign-read seam: a nested, non-persisting evaluation of the target
/// contract at the caller's replay height. Depth and cycle refusals already
/// happened in the call context, so nothing here can re-enter a held gate.
struct EvaluatorReader {
    evaluator: StateEvaluator,
}

#[async_trait]
impl ForeignReader for EvaluatorReader {
    async fn read_state(
        &self,
        target: &ContractId,
        height: u64,
        options: &EvaluationOptions,
        caller_path: &[ContractId],
    ) -> Result<EvaluationState, EvalError> {
        self.evaluator.inner.metrics.record_foreign_read();
        debug!(contract = %target, height, depth = caller_path.len(), "foreign read");
        self.evaluator
            .eval_unlocked(target, Some(height), options, caller_path, false)
            .await
    }
}
