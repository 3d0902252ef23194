//! Compiled-in contract handlers.
//!
//! Script-sourced definitions name a handler from this registry instead of
//! shipping bytecode. The builtins run in-process with the same context,
//! gas meter, and outcome classification as sandboxed WASM calls.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use weave_types::ids::ContractId;
use weave_types::{Interaction, InteractionResult};

use crate::api::{finish, CallContext, HandlerApi, HandlerOutcome};
use crate::gas;

/// A named, compiled-in contract implementation.
#[async_trait]
pub trait BuiltinContract: Send + Sync {
    /// Registry name, matched against definition manifests.
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        state: Value,
        interaction: &Interaction,
        ctx: &mut CallContext,
    ) -> HandlerOutcome;
}

/// Name-to-handler table consulted for script-sourced definitions.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn BuiltinContract>>,
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry preloaded with the stock handlers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(TokenContract));
        registry.register(Arc::new(MirrorContract));
        registry
    }

    pub fn register(&mut self, contract: Arc<dyn BuiltinContract>) {
        self.handlers.insert(contract.name().to_string(), contract);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BuiltinContract>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Adapter that runs a builtin under the standard call discipline:
/// invocation and input charges up front, a state-weight charge on
/// success, and host-side classification at the end.
pub struct BuiltinHandler {
    contract: Arc<dyn BuiltinContract>,
}

impl BuiltinHandler {
    pub(crate) fn new(contract: Arc<dyn BuiltinContract>) -> Self {
        Self { contract }
    }
}

#[async_trait]
impl HandlerApi for BuiltinHandler {
    async fn handle(
        &self,
        prior_state: Value,
        interaction: &Interaction,
        ctx: &mut CallContext,
    ) -> InteractionResult {
        let entry_cost = gas::INVOCATION_COST
            .saturating_add(gas::INPUT_UNIT_COST * gas::value_weight(&interaction.input));
        if let Err(exhausted) = ctx.gas_mut().charge(entry_cost) {
            return finish(
                prior_state,
                HandlerOutcome::Exception {
                    message: exhausted.to_string(),
                },
                ctx,
            );
        }

        let outcome = self
            .contract
            .handle(prior_state.clone(), interaction, ctx)
            .await;

        let outcome = match outcome {
            HandlerOutcome::Ok { state, result } => {
                let state_cost = gas::STATE_UNIT_COST * gas::value_weight(&state);
                match ctx.gas_mut().charge(state_cost) {
                    Ok(()) => HandlerOutcome::Ok { state, result },
                    Err(exhausted) => HandlerOutcome::Exception {
                        message: exhausted.to_string(),
                    },
                }
            }
            other => other,
        };
        finish(prior_state, outcome, ctx)
    }
}

fn input_function(input: &Value) -> Result<&str, HandlerOutcome> {
    input
        .get("function")
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerOutcome::Exception {
            message: "malformed interaction input: missing \"function\"".to_string(),
        })
}

/// Fixed-supply token ledger.
///
/// State shape: `{"ticker": ..., "balances": {address: amount}}`.
/// Balances live in the state object directly so unknown sibling fields
/// survive a transfer untouched.
pub struct TokenContract;

impl TokenContract {
    pub const NAME: &'static str = "token";
}

#[async_trait]
impl BuiltinContract for TokenContract {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn handle(
        &self,
        mut state: Value,
        interaction: &Interaction,
        _ctx: &mut CallContext,
    ) -> HandlerOutcome {
        let function = match input_function(&interaction.input) {
            Ok(name) => name.to_string(),
            Err(outcome) => return outcome,
        };
        match function.as_str() {
            "transfer" => {
                let target = match interaction.input.get("target").and_then(Value::as_str) {
                    Some(target) => target.to_string(),
                    None => {
                        return HandlerOutcome::Exception {
                            message: "malformed interaction input: transfer needs a \"target\""
                                .to_string(),
                        }
                    }
                };
                let qty = match interaction.input.get("qty").and_then(Value::as_u64) {
                    Some(qty) => qty,
                    None => {
                        return HandlerOutcome::Exception {
                            message:
                                "malformed interaction input: \"qty\" must be a non-negative integer"
                                    .to_string(),
                        }
                    }
                };
                if qty == 0 {
                    return HandlerOutcome::ContractError {
                        message: "transfer quantity must be positive".to_string(),
                    };
                }
                let caller = interaction.owner.as_str().to_string();
                let balances = match state.get_mut("balances").and_then(Value::as_object_mut) {
                    Some(balances) => balances,
                    None => {
                        return HandlerOutcome::Exception {
                            message: "token state has no \"balances\" object".to_string(),
                        }
                    }
                };
                let caller_balance = balances.get(&caller).and_then(Value::as_u64).unwrap_or(0);
                if caller_balance < qty {
                    return HandlerOutcome::ContractError {
                        message: format!(
                            "insufficient funds: balance {} is below transfer of {}",
                            caller_balance, qty
                        ),
                    };
                }
                let target_balance = balances.get(&target).and_then(Value::as_u64).unwrap_or(0);
                let credited = match target_balance.checked_add(qty) {
                    Some(credited) => credited,
                    None => {
                        return HandlerOutcome::ContractError {
                            message: "transfer overflows the target balance".to_string(),
                        }
                    }
                };
                balances.insert(caller, json!(caller_balance - qty));
                balances.insert(target, json!(credited));
                HandlerOutcome::Ok {
                    state,
                    result: None,
                }
            }
            "balance" => {
                let target = interaction
                    .input
                    .get("target")
                    .and_then(Value::as_str)
                    .unwrap_or_else(|| interaction.owner.as_str())
                    .to_string();
                let balance = state
                    .get("balances")
                    .and_then(|balances| balances.get(&target))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                let ticker = state.get("ticker").cloned().unwrap_or(Value::Null);
                HandlerOutcome::Ok {
                    state,
                    result: Some(json!({
                        "target": target,
                        "balance": balance,
                        "ticker": ticker,
                    })),
                }
            }
            other => HandlerOutcome::ContractError {
                message: format!("unknown function: {}", other),
            },
        }
    }
}

/// Snapshots another contract's state through the foreign-read seam.
///
/// The one builtin that exercises nested evaluation: `sync` pulls the
/// source contract's state at this call's height and stores it verbatim.
pub struct MirrorContract;

impl MirrorContract {
    pub const NAME: &'static str = "mirror";
}

#[async_trait]
impl BuiltinContract for MirrorContract {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn handle(
        &self,
        state: Value,
        interaction: &Interaction,
        ctx: &mut CallContext,
    ) -> HandlerOutcome {
        let function = match input_function(&interaction.input) {
            Ok(name) => name.to_string(),
            Err(outcome) => return outcome,
        };
        match function.as_str() {
            "sync" => {
                let source = match interaction.input.get("source").and_then(Value::as_str) {
                    Some(source) => ContractId::new(source),
                    None => {
                        return HandlerOutcome::Exception {
                            message: "malformed interaction input: sync needs a \"source\""
                                .to_string(),
                        }
                    }
                };
                if let Err(exhausted) = ctx.gas_mut().charge(gas::FOREIGN_READ_COST) {
                    return HandlerOutcome::Exception {
                        message: exhausted.to_string(),
                    };
                }
                match ctx.read_foreign(&source).await {
                    Ok(snapshot) => HandlerOutcome::Ok {
                        state: json!({
                            "source": source.as_str(),
                            "synced_at_height": ctx.current_height(),
                            "snapshot": snapshot,
                        }),
                        result: None,
                    },
                    Err(err) => HandlerOutcome::Exception {
                        message: err.to_string(),
                    },
                }
            }
            other => HandlerOutcome::ContractError {
                message: format!("unknown function: {}", other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ForeignReader, NoForeignReader};
    use weave_types::ids::{Address, SortKey, TxId};
    use weave_types::{EvalError, EvaluationOptions, EvaluationState, Outcome};

    fn interaction(owner: &str, input: Value) -> Interaction {
        Interaction {
            id: TxId::new("itx-1"),
            owner: Address::new(owner),
            contract_id: ContractId::new("contract-1"),
            block_height: 50,
            sort_key: SortKey::derive("block-hash", &TxId::new("itx-1")),
            input,
        }
    }

    fn ctx_with(options: EvaluationOptions) -> CallContext {
        CallContext::new(
            50,
            vec![ContractId::new("contract-1")],
            options,
            Arc::new(NoForeignReader),
        )
    }

    fn token() -> BuiltinHandler {
        BuiltinHandler::new(Arc::new(TokenContract))
    }

    #[tokio::test]
    async fn transfer_moves_funds_and_keeps_siblings() {
        let state = json!({"ticker": "WVT", "balances": {"alice": 100, "bob": 5}});
        let itx = interaction("alice", json!({"function": "transfer", "target": "bob", "qty": 30}));
        let mut ctx = ctx_with(EvaluationOptions::default());
        let result = token().handle(state, &itx, &mut ctx).await;
        assert_eq!(result.outcome, Outcome::Ok);
        assert_eq!(result.state["balances"]["alice"], json!(70));
        assert_eq!(result.state["balances"]["bob"], json!(35));
        assert_eq!(result.state["ticker"], json!("WVT"));
        assert!(result.gas_used > 0);
    }

    #[tokio::test]
    async fn insufficient_funds_is_a_contract_error() {
        let state = json!({"balances": {"alice": 10}});
        let itx = interaction("alice", json!({"function": "transfer", "target": "bob", "qty": 30}));
        let mut ctx = ctx_with(EvaluationOptions::default());
        let result = token().handle(state.clone(), &itx, &mut ctx).await;
        assert_eq!(result.outcome, Outcome::ContractError);
        assert_eq!(result.state, state);
        assert!(result
            .error_message
            .as_deref()
            .unwrap()
            .contains("insufficient funds"));
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected_by_contract_logic() {
        let state = json!({"balances": {"alice": 10}});
        let itx = interaction("alice", json!({"function": "transfer", "target": "bob", "qty": 0}));
        let mut ctx = ctx_with(EvaluationOptions::default());
        let result = token().handle(state, &itx, &mut ctx).await;
        assert_eq!(result.outcome, Outcome::ContractError);
    }

    #[tokio::test]
    async fn malformed_input_shape_is_an_exception() {
        let state = json!({"balances": {"alice": 10}});
        let itx = interaction(
            "alice",
            json!({"function": "transfer", "target": "bob", "qty": "thirty"}),
        );
        let mut ctx = ctx_with(EvaluationOptions::default());
        let result = token().handle(state.clone(), &itx, &mut ctx).await;
        assert_eq!(result.outcome, Outcome::Exception);
        assert_eq!(result.state, state);
    }

    #[tokio::test]
    async fn unknown_function_is_a_contract_error() {
        let itx = interaction("alice", json!({"function": "burn"}));
        let mut ctx = ctx_with(EvaluationOptions::default());
        let result = token()
            .handle(json!({"balances": {}}), &itx, &mut ctx)
            .await;
        assert_eq!(result.outcome, Outcome::ContractError);
        assert!(result
            .error_message
            .as_deref()
            .unwrap()
            .contains("unknown function"));
    }

    #[tokio::test]
    async fn balance_query_returns_a_result_without_touching_state() {
        let state = json!({"ticker": "WVT", "balances": {"alice": 100}});
        let itx = interaction("alice", json!({"function": "balance"}));
        let mut ctx = ctx_with(EvaluationOptions::default());
        let result = token().handle(state.clone(), &itx, &mut ctx).await;
        assert_eq!(result.outcome, Outcome::Ok);
        assert_eq!(result.state, state);
        let report = result.result.unwrap();
        assert_eq!(report["balance"], json!(100));
        assert_eq!(report["ticker"], json!("WVT"));
    }

    #[tokio::test]
    async fn tight_gas_budget_surfaces_as_an_exception() {
        let state = json!({"balances": {"alice": 100}});
        let itx = interaction("alice", json!({"function": "transfer", "target": "bob", "qty": 1}));
        let options = EvaluationOptions::default().with_gas_limit(Some(10));
        let mut ctx = ctx_with(options);
        let result = token().handle(state.clone(), &itx, &mut ctx).await;
        assert_eq!(result.outcome, Outcome::Exception);
        assert_eq!(result.state, state);
        let message = result.error_message.unwrap();
        assert!(message.contains("gas limit exceeded"));
        assert!(message.contains("of 10"));
    }

    struct FixedReader(Value);

    #[async_trait]
    impl ForeignReader for FixedReader {
        async fn read_state(
            &self,
            _target: &ContractId,
            height: u64,
            _options: &EvaluationOptions,
            _caller_path: &[ContractId],
        ) -> Result<EvaluationState, EvalError> {
            let mut snapshot = EvaluationState::initial(self.0.clone());
            snapshot.last_evaluated_height = height;
            Ok(snapshot)
        }
    }

    #[tokio::test]
    async fn mirror_sync_snapshots_the_source_state() {
        let itx = interaction("alice", json!({"function": "sync", "source": "token-contract"}));
        let mut ctx = CallContext::new(
            50,
            vec![ContractId::new("mirror-contract")],
            EvaluationOptions::default(),
            Arc::new(FixedReader(json!({"balances": {"alice": 7}}))),
        );
        let handler = BuiltinHandler::new(Arc::new(MirrorContract));
        let result = handler.handle(json!({}), &itx, &mut ctx).await;
        assert_eq!(result.outcome, Outcome::Ok);
        assert_eq!(result.state["source"], json!("token-contract"));
        assert_eq!(result.state["synced_at_height"], json!(50));
        assert_eq!(result.state["snapshot"]["balances"]["alice"], json!(7));
    }

    #[tokio::test]
    async fn mirror_sync_of_itself_is_a_depth_exception() {
        let itx = interaction(
            "alice",
            json!({"function": "sync", "source": "mirror-contract"}),
        );
        let mut ctx = CallContext::new(
            50,
            vec![ContractId::new("mirror-contract")],
            EvaluationOptions::default(),
            Arc::new(FixedReader(json!({}))),
        );
        let handler = BuiltinHandler::new(Arc::new(MirrorContract));
        let result = handler.handle(json!({}), &itx, &mut ctx).await;
        assert_eq!(result.outcome, Outcome::Exception);
        assert!(result
            .error_message
            .as_deref()
            .unwrap()
            .contains("re-enters"));
    }
}
