//! Handler construction, dispatched on a definition's source type.

use std::sync::Arc;

use weave_types::{ContractDefinition, EvalError, EvaluationOptions, SourceType};

use crate::api::HandlerApi;
use crate::builtin::{BuiltinHandler, HandlerRegistry};
use crate::wasm::WasmHandler;

/// Builds the right [`HandlerApi`] backend for a loaded definition.
pub struct ExecutorFactory {
    registry: Arc<HandlerRegistry>,
}

impl ExecutorFactory {
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// One handler per evaluation run. A definition that cannot produce
    /// a handler is malformed, which is fatal to the run.
    pub fn create(
        &self,
        definition: &ContractDefinition,
        options: &EvaluationOptions,
    ) -> Result<Box<dyn HandlerApi>, EvalError> {
        match &definition.source {
            SourceType::Script { handler } => match self.registry.get(handler) {
                Some(contract) => Ok(Box::new(BuiltinHandler::new(contract))),
                None => Err(EvalError::DefinitionMalformed {
                    contract_id: definition.contract_id.clone(),
                    reason: format!(
                        "manifest names unknown handler \"{}\" (known: {})",
                        handler,
                        self.registry.names().join(", ")
                    ),
                }),
            },
            SourceType::Wasm { lang, bytecode } => {
                WasmHandler::new(lang.clone(), bytecode.clone(), options.gas_limit)
                    .map(|handler| Box::new(handler) as Box<dyn HandlerApi>)
                    .map_err(|reason| EvalError::DefinitionMalformed {
                        contract_id: definition.contract_id.clone(),
                        reason,
                    })
            }
        }
    }
}

impl Default for ExecutorFactory {
    fn default() -> Self {
        Self::new(HandlerRegistry::with_defaults())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weave_types::ids::{Address, ContractId, TxId};

    fn definition(source: SourceType) -> ContractDefinition {
        ContractDefinition {
            contract_id: ContractId::new("contract-1"),
            src_tx_id: TxId::new("src-1"),
            source,
            init_state: json!({}),
            owner: Address::new("deployer"),
            deploy_height: 1,
            content_type: None,
        }
    }

    #[test]
    fn known_script_handlers_resolve() {
        let factory = ExecutorFactory::default();
        let ok = definition(SourceType::Script {
            handler: "token".to_string(),
        });
        assert!(factory.create(&ok, &EvaluationOptions::default()).is_ok());
    }

    #[test]
    fn unknown_script_handler_is_malformed() {
        let factory = ExecutorFactory::default();
        let bad = definition(SourceType::Script {
            handler: "no-such-handler".to_string(),
        });
        match factory.create(&bad, &EvaluationOptions::default()) {
            Err(EvalError::DefinitionMalformed { reason, .. }) => {
                assert!(reason.contains("no-such-handler"));
                assert!(reason.contains("token"));
            }
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn invalid_wasm_bytecode_is_malformed() {
        let factory = ExecutorFactory::default();
        let bad = definition(SourceType::Wasm {
            lang: "rust".to_string(),
            bytecode: b"definitely not wasm".to_vec(),
        });
        assert!(matches!(
            factory.create(&bad, &EvaluationOptions::default()),
            Err(EvalError::DefinitionMalformed { .. })
        ));
    }
}
