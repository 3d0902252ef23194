//! Deterministic gas accounting.
//!
//! WASM handlers are metered per instruction by the compiler middleware;
//! the meter here covers builtin handlers and host-side charges (foreign
//! reads), using fixed structural costs so every node charges identically
//! for the same interaction.

use serde_json::Value;

/// Flat charge for entering a builtin handler.
pub const INVOCATION_COST: u64 = 1_000;

/// Per-unit charge on the structural weight of an interaction input.
pub const INPUT_UNIT_COST: u64 = 2;

/// Per-unit charge on the structural weight of a returned state.
pub const STATE_UNIT_COST: u64 = 1;

/// Charge for one foreign-read hop, on top of whatever the nested
/// evaluation itself costs.
pub const FOREIGN_READ_COST: u64 = 25_000;

/// Raised when a charge would push usage past the configured limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasExhausted {
    pub used: u64,
    pub limit: u64,
}

impl std::fmt::Display for GasExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gas limit exceeded: used {} of {}", self.used, self.limit)
    }
}

impl std::error::Error for GasExhausted {}

/// Monotonic gas counter for one interaction.
///
/// `limit: None` means unbounded; usage is still tracked for reporting.
#[derive(Debug, Clone)]
pub struct GasMeter {
    limit: Option<u64>,
    used: u64,
}

impl GasMeter {
    pub fn new(limit: Option<u64>) -> Self {
        Self { limit, used: 0 }
    }

    /// Add `amount` to the tally, failing if it crosses the limit.
    /// On failure the meter is pinned at the limit so the reported usage
    /// never exceeds what the caller budgeted.
    pub fn charge(&mut self, amount: u64) -> Result<(), GasExhausted> {
        let next = self.used.saturating_add(amount);
        if let Some(limit) = self.limit {
            if next > limit {
                self.used = limit;
                return Err(GasExhausted { used: next, limit });
            }
        }
        self.used = next;
        Ok(())
    }

    /// Fold in usage metered elsewhere (the WASM instruction counter)
    /// without failing; exhaustion is handled by the metering side.
    pub fn absorb(&mut self, amount: u64) {
        self.used = self.used.saturating_add(amount);
        if let Some(limit) = self.limit {
            self.used = self.used.min(limit);
        }
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn remaining(&self) -> Option<u64> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }
}

/// Structural weight of a JSON value, used to scale input and state
/// charges. Purely shape-based: no hashing, no float formatting, so the
/// weight of a value is identical on every host.
pub fn value_weight(value: &Value) -> u64 {
    match value {
        Value::Null | Value::Bool(_) => 1,
        Value::Number(_) => 8,
        Value::String(s) => 1 + s.len() as u64,
        Value::Array(items) => 1 + items.iter().map(value_weight).sum::<u64>(),
        Value::Object(fields) => {
            1 + fields
                .iter()
                .map(|(key, v)| key.len() as u64 + value_weight(v))
                .sum::<u64>()
        }
    }
}
