//! The handler seam: what a sandboxed contract call looks like from the
//! evaluator's side, and the per-call context threaded through it.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;

use weave_types::ids::ContractId;
use weave_types::{
    EvalError, EvaluationOptions, EvaluationState, InnerWrite, Interaction, InteractionResult,
};

use crate::gas::GasMeter;

/// Largest integer that survives a JSON round-trip on every host.
pub const MAX_SAFE_INT: u64 = 9_007_199_254_740_991;

/// One sandboxed contract call: prior state in, classified result out.
///
/// Implementations never abort the enclosing replay. Everything that can
/// go wrong inside a call is folded into the returned result's outcome.
#[async_trait]
pub trait HandlerApi: Send + Sync {
    async fn handle(
        &self,
        prior_state: Value,
        interaction: &Interaction,
        ctx: &mut CallContext,
    ) -> InteractionResult;
}

/// Resolves a foreign contract's state at a height, on behalf of a call
/// already in flight. Implemented by the evaluator; handlers only see it
/// through [`CallContext::read_foreign`].
#[async_trait]
pub trait ForeignReader: Send + Sync {
    async fn read_state(
        &self,
        target: &ContractId,
        height: u64,
        options: &EvaluationOptions,
        caller_path: &[ContractId],
    ) -> Result<EvaluationState, EvalError>;
}

/// Reader that refuses every request. For contexts where foreign reads
/// make no sense (isolated handler tests, pure view calls).
pub struct NoForeignReader;

#[async_trait]
impl ForeignReader for NoForeignReader {
    async fn read_state(
        &self,
        _target: &ContractId,
        _height: u64,
        _options: &EvaluationOptions,
        _caller_path: &[ContractId],
    ) -> Result<EvaluationState, EvalError> {
        Err(EvalError::LoaderUnavailable {
            operation: "foreign read".to_string(),
            reason: "no foreign reader attached to this context".to_string(),
        })
    }
}

/// What a handler's code produced, before host-side classification.
///
/// [`finish`] turns this into an [`InteractionResult`], applying the
/// checks the handler itself cannot be trusted with (depth refusals,
/// unsafe integers).
#[derive(Debug)]
pub enum HandlerOutcome {
    Ok { state: Value, result: Option<Value> },
    ContractError { message: String },
    Exception { message: String },
}

/// Per-call context: height, call path, gas, and the foreign-read seam.
///
/// One context per interaction. The call path always ends with the
/// contract currently executing; the root evaluation contributes the
/// first element.
pub struct CallContext {
    current_height: u64,
    call_path: Vec<ContractId>,
    options: EvaluationOptions,
    gas: GasMeter,
    foreign: Arc<dyn ForeignReader>,
    inner_writes: Vec<InnerWrite>,
    /// Set when a depth or cycle refusal fired inside this call. Forces
    /// the final classification regardless of what the handler returns.
    fatal: Option<String>,
}

impl CallContext {
    pub fn new(
        current_height: u64,
        call_path: Vec<ContractId>,
        options: EvaluationOptions,
        foreign: Arc<dyn ForeignReader>,
    ) -> Self {
        let gas = GasMeter::new(options.gas_limit);
        Self {
            current_height,
            call_path,
            options,
            gas,
            foreign,
            inner_writes: Vec::new(),
            fatal: None,
        }
    }

    pub fn current_height(&self) -> u64 {
        self.current_height
    }

    pub fn options(&self) -> &EvaluationOptions {
        &self.options
    }

    pub fn call_path(&self) -> &[ContractId] {
        &self.call_path
    }

    pub fn gas(&self) -> &GasMeter {
        &self.gas
    }

    pub fn gas_mut(&mut self) -> &mut GasMeter {
        &mut self.gas
    }

    /// Read the state of another contract as of this call's height.
    ///
    /// Refusals happen here, before any lock or loader is touched: a
    /// target already on the call path would deadlock against its own
    /// evaluation gate, and a hop past `max_call_depth` is out of budget.
    /// Both mark the context fatal so the interaction classifies as an
    /// exception even if the handler swallows the error.
    pub async fn read_foreign(&mut self, target: &ContractId) -> Result<Value, EvalError> {
        let attempted = self.call_path.len() as u32;
        if self.call_path.contains(target) {
            let err = EvalError::CallDepthExceeded {
                contract_id: target.clone(),
                depth: attempted,
                max_depth: self.options.max_call_depth,
                cycle: true,
            };
            self.fatal = Some(err.to_string());
            return Err(err);
        }
        if attempted > self.options.max_call_depth {
            let err = EvalError::CallDepthExceeded {
                contract_id: target.clone(),
                depth: attempted,
                max_depth: self.options.max_call_depth,
                cycle: false,
            };
            self.fatal = Some(err.to_string());
            return Err(err);
        }
        let evaluated = self
            .foreign
            .read_state(target, self.current_height, &self.options, &self.call_path)
            .await?;
        Ok(evaluated.state)
    }

    /// Declare a write against a foreign contract. Surfaced in the
    /// interaction result for external indexing; never applied here.
    pub fn record_write(&mut self, target: ContractId, input: Value) -> anyhow::Result<()> {
        if !self.options.internal_writes {
            return Err(anyhow!("internal writes are disabled for this evaluation"));
        }
        self.inner_writes.push(InnerWrite { target, input });
        Ok(())
    }

    fn take_inner_writes(&mut self) -> Vec<InnerWrite> {
        std::mem::take(&mut self.inner_writes)
    }

    fn take_fatal(&mut self) -> Option<String> {
        self.fatal.take()
    }
}

/// Classify a handler's outcome into the final interaction result.
///
/// A fatal mark on the context wins over whatever the handler returned;
/// a state carrying integers past the safe range is rejected unless the
/// evaluation opted into big integers.
pub fn finish(
    prior_state: Value,
    outcome: HandlerOutcome,
    ctx: &mut CallContext,
) -> InteractionResult {
    let gas_used = ctx.gas().used();
    if let Some(message) = ctx.take_fatal() {
        return InteractionResult::exception(prior_state, message, gas_used);
    }
    match outcome {
        HandlerOutcome::Ok { state, result } => {
            if !ctx.options().allow_big_int {
                if let Some(offender) = find_unsafe_int(&state) {
                    return InteractionResult::exception(
                        prior_state,
                        format!(
                            "state contains integer {} outside the safe range; \
                             enable allow_big_int to accept it",
                            offender
                        ),
                        gas_used,
                    );
                }
            }
            let mut applied = InteractionResult::ok(state, result, gas_used);
            applied.inner_writes = ctx.take_inner_writes();
            applied
        }
        HandlerOutcome::ContractError { message } => {
            InteractionResult::contract_error(prior_state, message, gas_used)
        }
        HandlerOutcome::Exception { message } => {
            InteractionResult::exception(prior_state, message, gas_used)
        }
    }
}

/// First integer in `value` outside the IEEE-754 safe range, if any.
fn find_unsafe_int(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i.unsigned_abs() > MAX_SAFE_INT {
                    return Some(i.to_string());
                }
            } else if let Some(u) = n.as_u64() {
                if u > MAX_SAFE_INT {
                    return Some(u.to_string());
                }
            }
            None
        }
        Value::Array(items) => items.iter().find_map(find_unsafe_int),
        Value::Object(fields) => fields.values().find_map(find_unsafe_int),
        _ => None,
    }
}
