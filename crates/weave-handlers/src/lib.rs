//! Contract execution backends.
//!
//! Everything that runs contract logic lives here, behind the
//! [`HandlerApi`] seam: the WASM sandbox with instruction metering, the
//! builtin registry for script-sourced definitions, and the per-call
//! context that enforces gas and foreign-read discipline uniformly
//! across both.

pub mod api;
pub mod builtin;
pub mod factory;
pub mod gas;
pub mod wasm;

pub use api::{
    finish, CallContext, ForeignReader, HandlerApi, HandlerOutcome, NoForeignReader, MAX_SAFE_INT,
};
pub use builtin::{BuiltinContract, HandlerRegistry, MirrorContract, TokenContract};
pub use factory::ExecutorFactory;
pub use gas::{GasExhausted, GasMeter};
pub use wasm::{validate_module_bytes, WasmHandler, MAX_MODULE_BYTES};
