//! Sandboxed WASM contract execution.
//!
//! Each call compiles the module with instruction-level gas metering and
//! runs it on a blocking thread with a fresh store and linear memory, so
//! no state leaks between interactions and the instruction count for a
//! given input is identical on every host.
//!
//! Guest ABI (module "env" imports are provided by the host):
//!
//! - exports: `memory`, `alloc(len) -> ptr`,
//!   `handle(state_ptr, state_len, input_ptr, input_len) -> status`
//!   where status 0 is ok, 1 is a contract error, anything else (or a
//!   trap) is an exception
//! - imports: `result_write(ptr, len)` publishes the outcome envelope,
//!   `foreign_read_len(ptr, len) -> len` requests a foreign contract's
//!   state by id and returns the response length (or -1),
//!   `foreign_read_copy(dst) -> len` copies the pending response into a
//!   guest-allocated buffer, `log(ptr, len)` emits a debug line
//!
//! The outcome envelope is JSON: `{"state": ..., "result": ...}` on
//! status 0, `{"error": "..."}` on status 1.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use wasmer::{
    imports, CompilerConfig, Function, FunctionEnv, FunctionEnvMut, Instance, Memory, Module,
    Store, TypedFunction,
};
use wasmer_compiler_cranelift::Cranelift;
use wasmer_middlewares::metering::{get_remaining_points, set_remaining_points, MeteringPoints};
use wasmer_middlewares::Metering;

use weave_types::ids::ContractId;
use weave_types::{Interaction, InteractionResult, DEFAULT_GAS_LIMIT};

use crate::api::{finish, CallContext, HandlerApi, HandlerOutcome};
use crate::gas::{self, GasExhausted};

// Provide __rust_probestack stub for wasmer-vm 4.x compatibility with
// Rust 1.85+ where this symbol was removed from compiler_builtins.
// Safe: the kernel provides guard pages for stack overflow on modern systems.
#[cfg(all(
    any(target_arch = "x86_64", target_arch = "aarch64"),
    any(target_os = "linux", target_os = "macos")
))]
#[no_mangle]
pub extern "C" fn __rust_probestack() {}

/// Leading bytes of every WebAssembly module.
pub const WASM_MAGIC: &[u8; 4] = b"\0asm";

/// Upper bound on accepted module size.
pub const MAX_MODULE_BYTES: usize = 4 * 1024 * 1024;

/// Cheap structural validation, run when a definition is loaded. Deeper
/// problems surface at execution time as per-interaction exceptions.
pub fn validate_module_bytes(bytes: &[u8]) -> Result<(), String> {
    if bytes.len() < WASM_MAGIC.len() || !bytes.starts_with(WASM_MAGIC) {
        return Err("bytecode is not a WebAssembly module (bad magic)".to_string());
    }
    if bytes.len() > MAX_MODULE_BYTES {
        return Err(format!(
            "module is {} bytes, over the {} byte cap",
            bytes.len(),
            MAX_MODULE_BYTES
        ));
    }
    Ok(())
}

/// Executes one contract's WASM source.
///
/// The metering budget is fixed when the handler is created, from the
/// evaluation options: `gas_limit: None` still meters WASM at
/// [`DEFAULT_GAS_LIMIT`]. Only builtin handlers can run unbounded;
/// untrusted bytecode cannot.
pub struct WasmHandler {
    lang: String,
    bytecode: Arc<Vec<u8>>,
    budget: u64,
}

impl WasmHandler {
    pub fn new(
        lang: impl Into<String>,
        bytecode: Vec<u8>,
        gas_limit: Option<u64>,
    ) -> Result<Self, String> {
        validate_module_bytes(&bytecode)?;
        Ok(Self {
            lang: lang.into(),
            bytecode: Arc::new(bytecode),
            budget: gas_limit.unwrap_or(DEFAULT_GAS_LIMIT),
        })
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }
}

#[async_trait]
impl HandlerApi for WasmHandler {
    async fn handle(
        &self,
        prior_state: Value,
        interaction: &Interaction,
        ctx: &mut CallContext,
    ) -> InteractionResult {
        debug!(
            lang = %self.lang,
            module_bytes = self.bytecode.len(),
            budget = self.budget,
            "executing wasm handler"
        );

        let state_bytes = match serde_json::to_vec(&prior_state) {
            Ok(bytes) => bytes,
            Err(err) => {
                return finish(
                    prior_state,
                    HandlerOutcome::Exception {
                        message: format!("prior state does not serialize: {}", err),
                    },
                    ctx,
                )
            }
        };
        let input_bytes = match serde_json::to_vec(&interaction.input) {
            Ok(bytes) => bytes,
            Err(err) => {
                return finish(
                    prior_state,
                    HandlerOutcome::Exception {
                        message: format!("interaction input does not serialize: {}", err),
                    },
                    ctx,
                )
            }
        };

        // The guest runs on a blocking thread; foreign reads come back
        // over this channel so the async side can evaluate them without
        // the guest holding a runtime thread.
        let (req_tx, mut req_rx) = tokio::sync::mpsc::channel::<ForeignRequest>(1);
        let call = GuestCall {
            bytecode: Arc::clone(&self.bytecode),
            budget: self.budget,
            state_bytes,
            input_bytes,
            req_tx,
        };
        let mut guest = tokio::task::spawn_blocking(move || call.run());

        let joined = loop {
            tokio::select! {
                finished = &mut guest => break finished,
                Some(request) = req_rx.recv() => {
                    let response = match ctx.read_foreign(&request.target).await {
                        Ok(value) => serde_json::to_vec(&value).map_err(|err| err.to_string()),
                        Err(err) => Err(err.to_string()),
                    };
                    let _ = request.reply.send(response);
                }
            }
        };

        match joined {
            Ok((outcome, points_used)) => {
                ctx.gas_mut().absorb(points_used);
                finish(prior_state, outcome, ctx)
            }
            Err(err) => finish(
                prior_state,
                HandlerOutcome::Exception {
                    message: format!("sandbox thread failed: {}", err),
                },
                ctx,
            ),
        }
    }
}

/// A foreign-state request escaping the sandbox. The guest thread blocks
/// on `reply` while the async side evaluates the target.
struct ForeignRequest {
    target: ContractId,
    reply: std::sync::mpsc::Sender<Result<Vec<u8>, String>>,
}

/// Host-side state shared with the guest's imported functions.
struct GuestEnv {
    memory: Option<Memory>,
    instance: Option<Instance>,
    req_tx: tokio::sync::mpsc::Sender<ForeignRequest>,
    result_buf: Option<Vec<u8>>,
    pending_foreign: Option<Vec<u8>>,
    foreign_error: Option<String>,
}

impl GuestEnv {
    fn new(req_tx: tokio::sync::mpsc::Sender<ForeignRequest>) -> Self {
        Self {
            memory: None,
            instance: None,
            req_tx,
            result_buf: None,
            pending_foreign: None,
            foreign_error: None,
        }
    }
}

/// Everything one guest execution needs, moved onto the blocking thread.
struct GuestCall {
    bytecode: Arc<Vec<u8>>,
    budget: u64,
    state_bytes: Vec<u8>,
    input_bytes: Vec<u8>,
    req_tx: tokio::sync::mpsc::Sender<ForeignRequest>,
}

impl GuestCall {
    /// Compile, instantiate, and run the module. Every failure mode maps
    /// to a handler outcome; nothing here aborts the enclosing replay.
    fn run(self) -> (HandlerOutcome, u64) {
        let cost = |_operator: &wasmer::wasmparser::Operator| -> u64 { 1 };
        let metering = Arc::new(Metering::new(self.budget, cost));
        let mut compiler = Cranelift::default();
        compiler.push_middleware(metering);
        let mut store = Store::new(compiler);

        let module = match Module::new(&store, self.bytecode.as_slice()) {
            Ok(module) => module,
            Err(err) => {
                return (
                    exception(format!("contract module does not compile: {}", err)),
                    0,
                )
            }
        };

        let env = FunctionEnv::new(&mut store, GuestEnv::new(self.req_tx.clone()));
        let import_object = imports! {
            "env" => {
                "result_write" => Function::new_typed_with_env(&mut store, &env, host_result_write),
                "foreign_read_len" => Function::new_typed_with_env(&mut store, &env, host_foreign_read_len),
                "foreign_read_copy" => Function::new_typed_with_env(&mut store, &env, host_foreign_read_copy),
                "log" => Function::new_typed_with_env(&mut store, &env, host_log),
            }
        };
        let instance = match Instance::new(&mut store, &module, &import_object) {
            Ok(instance) => instance,
            Err(err) => {
                return (
                    exception(format!("module does not instantiate: {}", err)),
                    0,
                )
            }
        };

        let memory = match instance.exports.get_memory("memory") {
            Ok(memory) => memory.clone(),
            Err(err) => {
                return (
                    exception(format!("module exports no linear memory: {}", err)),
                    0,
                )
            }
        };
        {
            let data = env.as_mut(&mut store);
            data.memory = Some(memory.clone());
            data.instance = Some(instance.clone());
        }

        let alloc: TypedFunction<i32, i32> =
            match instance.exports.get_typed_function(&store, "alloc") {
                Ok(func) => func,
                Err(err) => return (exception(format!("module exports no alloc: {}", err)), 0),
            };
        let entry: TypedFunction<(i32, i32, i32, i32), i32> =
            match instance.exports.get_typed_function(&store, "handle") {
                Ok(func) => func,
                Err(err) => return (exception(format!("module exports no handle: {}", err)), 0),
            };

        let (state_ptr, state_len) =
            match write_guest(&mut store, &memory, &alloc, &self.state_bytes) {
                Ok(at) => at,
                Err(message) => return self.guest_fault(&mut store, &instance, message),
            };
        let (input_ptr, input_len) =
            match write_guest(&mut store, &memory, &alloc, &self.input_bytes) {
                Ok(at) => at,
                Err(message) => return self.guest_fault(&mut store, &instance, message),
            };

        let status = entry.call(&mut store, state_ptr, state_len, input_ptr, input_len);

        let points_used = match get_remaining_points(&mut store, &instance) {
            MeteringPoints::Remaining(remaining) => self.budget.saturating_sub(remaining),
            MeteringPoints::Exhausted => {
                let message = GasExhausted {
                    used: self.budget,
                    limit: self.budget,
                }
                .to_string();
                return (exception(message), self.budget);
            }
        };

        let data = env.as_mut(&mut store);
        let foreign_error = data.foreign_error.take();
        let result_buf = data.result_buf.take();

        let outcome = match status {
            Ok(0) => match result_buf {
                Some(bytes) => parse_result_envelope(&bytes),
                None => exception("handler returned ok but published no result".to_string()),
            },
            Ok(1) => HandlerOutcome::ContractError {
                message: parse_error_envelope(result_buf.as_deref()),
            },
            Ok(code) => exception(format!("handler returned unrecognized status {}", code)),
            Err(trap) => {
                if let Some(reason) = foreign_error {
                    exception(format!("foreign read failed: {}", reason))
                } else {
                    exception(format!("contract call trapped: {}", trap))
                }
            }
        };
        (outcome, points_used)
    }

    /// Guest-side fault before `handle` ran. Distinguish running out of
    /// gas in the allocator from a genuine ABI fault.
    fn guest_fault(
        &self,
        store: &mut Store,
        instance: &Instance,
        message: String,
    ) -> (HandlerOutcome, u64) {
        match get_remaining_points(store, instance) {
            MeteringPoints::Exhausted => {
                let message = GasExhausted {
                    used: self.budget,
                    limit: self.budget,
                }
                .to_string();
                (exception(message), self.budget)
            }
            MeteringPoints::Remaining(remaining) => (
                exception(message),
                self.budget.saturating_sub(remaining),
            ),
        }
    }
}

fn exception(message: String) -> HandlerOutcome {
    HandlerOutcome::Exception { message }
}

#[derive(Deserialize)]
struct ResultEnvelope {
    state: Value,
    #[serde(default)]
    result: Option<Value>,
}

fn parse_result_envelope(bytes: &[u8]) -> HandlerOutcome {
    match serde_json::from_slice::<ResultEnvelope>(bytes) {
        Ok(envelope) => HandlerOutcome::Ok {
            state: envelope.state,
            result: envelope.result,
        },
        Err(err) => exception(format!("handler result does not parse: {}", err)),
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: String,
}

fn parse_error_envelope(bytes: Option<&[u8]>) -> String {
    let Some(bytes) = bytes else {
        return "contract error".to_string();
    };
    match serde_json::from_slice::<ErrorEnvelope>(bytes) {
        Ok(envelope) => envelope.error,
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Allocate a guest buffer and copy `bytes` into it.
fn write_guest(
    store: &mut Store,
    memory: &Memory,
    alloc: &TypedFunction<i32, i32>,
    bytes: &[u8],
) -> Result<(i32, i32), String> {
    let len = i32::try_from(bytes.len())
        .map_err(|_| "payload too large for guest memory".to_string())?;
    let ptr = alloc
        .call(store, len)
        .map_err(|err| format!("guest allocator failed: {}", err))?;
    if ptr <= 0 {
        return Err("guest allocator returned a null pointer".to_string());
    }
    let view = memory.view(store);
    view.write(ptr as u64, bytes)
        .map_err(|err| format!("guest memory write failed: {}", err))?;
    Ok((ptr, len))
}

fn host_result_write(mut env: FunctionEnvMut<GuestEnv>, ptr: i32, len: i32) {
    let (data, store) = env.data_and_store_mut();
    let Some(memory) = data.memory.clone() else {
        return;
    };
    let mut buf = vec![0u8; len.max(0) as usize];
    let view = memory.view(&store);
    if view.read(ptr as u64, &mut buf).is_ok() {
        data.result_buf = Some(buf);
    }
}

/// Request a foreign contract's state. Charges a flat metering cost,
/// forwards the request to the async side, and blocks for the response.
/// Returns the response length, or -1 with the failure recorded in the
/// environment.
fn host_foreign_read_len(mut env: FunctionEnvMut<GuestEnv>, ptr: i32, len: i32) -> i32 {
    let (data, mut store) = env.data_and_store_mut();
    let Some(memory) = data.memory.clone() else {
        return -1;
    };
    let Some(instance) = data.instance.clone() else {
        return -1;
    };

    let mut buf = vec![0u8; len.max(0) as usize];
    {
        let view = memory.view(&store);
        if view.read(ptr as u64, &mut buf).is_err() {
            data.foreign_error = Some("foreign read target out of bounds".to_string());
            return -1;
        }
    }
    let target = match std::str::from_utf8(&buf) {
        Ok(id) => ContractId::new(id),
        Err(_) => {
            data.foreign_error = Some("foreign read target is not utf-8".to_string());
            return -1;
        }
    };

    let remaining = match get_remaining_points(&mut store, &instance) {
        MeteringPoints::Remaining(remaining) => remaining,
        MeteringPoints::Exhausted => return -1,
    };
    if remaining < gas::FOREIGN_READ_COST {
        // Pin the meter so the next guest instruction traps as exhausted.
        set_remaining_points(&mut store, &instance, 0);
        data.foreign_error = Some("foreign read refused: out of gas".to_string());
        return -1;
    }
    set_remaining_points(&mut store, &instance, remaining - gas::FOREIGN_READ_COST);

    let (reply_tx, reply_rx) = std::sync::mpsc::channel();
    let request = ForeignRequest {
        target,
        reply: reply_tx,
    };
    if data.req_tx.blocking_send(request).is_err() {
        data.foreign_error = Some("evaluation context went away during foreign read".to_string());
        return -1;
    }
    match reply_rx.recv() {
        Ok(Ok(bytes)) => {
            let len = bytes.len() as i32;
            data.pending_foreign = Some(bytes);
            len
        }
        Ok(Err(message)) => {
            data.foreign_error = Some(message);
            -1
        }
        Err(_) => {
            data.foreign_error = Some("no response to foreign read".to_string());
            -1
        }
    }
}

/// Copy the pending foreign-read response into a guest buffer.
fn host_foreign_read_copy(mut env: FunctionEnvMut<GuestEnv>, dst: i32) -> i32 {
    let (data, store) = env.data_and_store_mut();
    let Some(bytes) = data.pending_foreign.take() else {
        return -1;
    };
    let Some(memory) = data.memory.clone() else {
        return -1;
    };
    let view = memory.view(&store);
    if view.write(dst as u64, &bytes).is_err() {
        return -1;
    }
    bytes.len() as i32
}

fn host_log(mut env: FunctionEnvMut<GuestEnv>, ptr: i32, len: i32) {
    let (data, store) = env.data_and_store_mut();
    let Some(memory) = data.memory.clone() else {
        return;
    };
    let mut buf = vec![0u8; len.max(0) as usize];
    let view = memory.view(&store);
    if view.read(ptr as u64, &mut buf).is_ok() {
        debug!(line = %String::from_utf8_lossy(&buf), "contract log");
    }
}
