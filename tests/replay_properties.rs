//! End-to-end properties of the replay pipeline, driven through the
//! `Weave` facade against the in-memory mock ledger.

use std::sync::Arc;

use serde_json::{json, Value};

use weave_replay::weave_gateway::{LedgerClient, MockLedger};
use weave_replay::weave_types::ids::SortKey;
use weave_replay::{Address, ContractId, EvalError, EvaluationOptions, Outcome, TxId, Weave};

fn client(ledger: &Arc<MockLedger>) -> Weave {
    Weave::builder()
        .with_gateway(Arc::clone(ledger) as Arc<dyn LedgerClient>)
        .build()
        .expect("in-memory client builds")
}

fn transfer(target: &str, qty: u64) -> Value {
    json!({"function": "transfer", "target": target, "qty": qty})
}

#[tokio::test]
async fn replay_is_deterministic_across_cold_and_warm_caches() {
    let ledger = Arc::new(MockLedger::new());
    let contract = ledger.deploy_script_contract("token", &json!({"balances": {"alice": 100}}));
    let alice = Address::new("alice");
    for height in [2, 4, 6, 8] {
        ledger.add_interaction(&contract, &alice, height, &transfer("bob", 7));
    }

    // Warm: checkpoint at 4, then extend to 8.
    let warm = client(&ledger);
    warm.read_contract(&contract, Some(4)).await.unwrap();
    let resumed = warm.read_contract(&contract, Some(8)).await.unwrap();

    // Cold: a fresh client straight to 8.
    let cold = client(&ledger);
    let direct = cold.read_contract(&contract, Some(8)).await.unwrap();

    assert_eq!(resumed.state, direct.state);
    assert_eq!(resumed.validity, direct.validity);
    assert_eq!(resumed.error_messages, direct.error_messages);
    assert_eq!(resumed.last_evaluated_height, 8);
}

#[tokio::test]
async fn interactions_replay_in_height_then_sort_key_order() {
    let ledger = Arc::new(MockLedger::new());
    // Heights [5, 5, 3, 7]. Ordering is observable through fund flow: the
    // transfer at 3 funds bob, exactly one of bob's two competing spends at
    // height 5 can succeed, and it must be the sort-key-earlier one.
    let contract = ledger.deploy_script_contract("token", &json!({"balances": {"alice": 10}}));
    let alice = Address::new("alice");
    let bob = Address::new("bob");

    let spend_carol = ledger.add_interaction(&contract, &bob, 5, &transfer("carol", 10));
    let spend_dave = ledger.add_interaction(&contract, &bob, 5, &transfer("dave", 10));
    let fund_bob = ledger.add_interaction(&contract, &alice, 3, &transfer("bob", 10));
    ledger.add_interaction(&contract, &bob, 7, &transfer("alice", 0)); // invalid, order padding

    let weave = client(&ledger);
    let state = weave.read_contract(&contract, None).await.unwrap();

    assert_eq!(state.validity.get(&fund_bob), Some(&true));
    let key = |id: &TxId| SortKey::derive(&MockLedger::block_hash(5), id);
    let (winner, loser) = if key(&spend_carol) < key(&spend_dave) {
        (spend_carol, spend_dave)
    } else {
        (spend_dave, spend_carol)
    };
    assert_eq!(state.validity.get(&winner), Some(&true));
    assert_eq!(state.validity.get(&loser), Some(&false));
    assert!(state
        .error_messages
        .get(&loser)
        .unwrap()
        .contains("insufficient funds"));
}

#[tokio::test]
async fn incremental_evaluation_matches_from_scratch() {
    let ledger = Arc::new(MockLedger::new());
    let contract = ledger.deploy_script_contract("token", &json!({"balances": {"alice": 100}}));
    let alice = Address::new("alice");
    for height in 2..=10u64 {
        ledger.add_interaction(&contract, &alice, height, &transfer("bob", 2));
    }

    let stepped = client(&ledger);
    stepped.read_contract(&contract, Some(5)).await.unwrap();
    let extended = stepped.read_contract(&contract, Some(10)).await.unwrap();

    let scratch = client(&ledger);
    let full = scratch.read_contract(&contract, Some(10)).await.unwrap();

    assert_eq!(extended.state, full.state);
    assert_eq!(extended.validity, full.validity);
    // The stepped client resumed rather than replaying history twice.
    assert_eq!(stepped.metrics().interactions_replayed, 9);
}

#[tokio::test]
async fn invalid_interactions_are_isolated_not_fatal() {
    let ledger = Arc::new(MockLedger::new());
    let contract = ledger.deploy_script_contract("token", &json!({"balances": {"alice": 100}}));
    let alice = Address::new("alice");
    ledger.add_interaction(&contract, &alice, 2, &transfer("bob", 30));
    let invalid = ledger.add_interaction(&contract, &alice, 3, &transfer("bob", 0));
    ledger.add_interaction(&contract, &alice, 4, &transfer("bob", 20));

    let weave = client(&ledger);
    let state = weave.read_contract(&contract, None).await.unwrap();

    assert_eq!(state.state["balances"]["alice"], json!(50));
    assert_eq!(state.state["balances"]["bob"], json!(50));
    assert_eq!(state.validity.get(&invalid), Some(&false));
    assert!(state.error_messages.contains_key(&invalid));
    assert_eq!(state.validity.values().filter(|valid| **valid).count(), 2);
}

#[tokio::test]
async fn gas_ceiling_reports_used_and_limit_and_rolls_back() {
    let ledger = Arc::new(MockLedger::new());
    let contract = ledger.deploy_script_contract("token", &json!({"balances": {"alice": 100}}));
    let tx = ledger.add_interaction(
        &contract,
        &Address::new("alice"),
        2,
        &transfer("bob", 10),
    );

    let weave = client(&ledger);
    weave.set_evaluation_options(EvaluationOptions::default().with_gas_limit(Some(10)));
    let state = weave.read_contract(&contract, None).await.unwrap();

    assert_eq!(state.validity.get(&tx), Some(&false));
    let message = state.error_messages.get(&tx).unwrap();
    assert!(message.contains("gas limit exceeded"));
    assert!(message.contains("of 10"));
    // Rolled back: state is still the initial state.
    assert_eq!(state.state["balances"]["alice"], json!(100));
    assert!(state.state["balances"].get("bob").is_none());
}

#[tokio::test]
async fn foreign_read_past_the_depth_limit_is_an_exception() {
    let ledger = Arc::new(MockLedger::new());
    let token = ledger.deploy_script_contract("token", &json!({"balances": {"alice": 1}}));
    let mirror = ledger.deploy_script_contract("mirror", &json!({}));
    let tx = ledger.add_interaction(
        &mirror,
        &Address::new("alice"),
        3,
        &json!({"function": "sync", "source": token.as_str()}),
    );

    let weave = client(&ledger);
    weave.set_evaluation_options(EvaluationOptions::default().with_max_call_depth(0));
    let state = weave.read_contract(&mirror, None).await.unwrap();

    assert_eq!(state.validity.get(&tx), Some(&false));
    let message = state.error_messages.get(&tx).unwrap();
    assert!(message.contains("call depth exceeded"));
    assert_eq!(state.state, json!({}));
}

#[tokio::test]
async fn self_referential_foreign_read_is_refused_as_a_cycle() {
    let ledger = Arc::new(MockLedger::new());
    let mirror = ledger.deploy_script_contract("mirror", &json!({}));
    let tx = ledger.add_interaction(
        &mirror,
        &Address::new("alice"),
        3,
        &json!({"function": "sync", "source": mirror.as_str()}),
    );

    let weave = client(&ledger);
    let state = weave.read_contract(&mirror, None).await.unwrap();
    assert_eq!(state.validity.get(&tx), Some(&false));
    assert!(state.error_messages.get(&tx).unwrap().contains("re-enters"));
}

#[tokio::test]
async fn mutually_recursive_contracts_terminate() {
    let ledger = Arc::new(MockLedger::new());
    let mirror_a = ledger.deploy_script_contract("mirror", &json!({}));
    let mirror_b = ledger.deploy_script_contract("mirror", &json!({}));
    let alice = Address::new("alice");
    ledger.add_interaction(
        &mirror_a,
        &alice,
        3,
        &json!({"function": "sync", "source": mirror_b.as_str()}),
    );
    ledger.add_interaction(
        &mirror_b,
        &alice,
        2,
        &json!({"function": "sync", "source": mirror_a.as_str()}),
    );

    let weave = client(&ledger);
    weave.set_evaluation_options(EvaluationOptions::default().with_max_call_depth(2));

    // A reads B, whose own history reads A: the inner hop is refused as a
    // cycle and the whole evaluation completes instead of recursing forever.
    let state = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        weave.read_contract(&mirror_a, None),
    )
    .await
    .expect("evaluation must terminate")
    .unwrap();

    // B's sync of A failed inside the nested read, so A snapshots B's
    // initial state.
    assert_eq!(state.state["snapshot"], json!({}));
    assert_eq!(state.state["source"], json!(mirror_b.as_str()));
}

#[tokio::test]
async fn view_state_is_pure_and_returns_results() {
    let ledger = Arc::new(MockLedger::new());
    let contract = ledger.deploy_script_contract(
        "token",
        &json!({"ticker": "WVT", "balances": {"alice": 100}}),
    );
    ledger.add_interaction(&contract, &Address::new("alice"), 2, &transfer("bob", 25));

    let weave = client(&ledger);
    let before = weave.read_contract(&contract, None).await.unwrap();

    for _ in 0..5 {
        let view = weave
            .view_state(
                &contract,
                json!({"function": "balance", "target": "bob"}),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(view.outcome, Outcome::Ok);
        assert_eq!(view.result.unwrap()["balance"], json!(25));

        // A mutating dry-run reports its effect without persisting it.
        let write = weave
            .view_state(&contract, transfer("carol", 10), None, Some(Address::new("alice")))
            .await
            .unwrap();
        assert_eq!(write.outcome, Outcome::Ok);
        assert_eq!(write.state["balances"]["carol"], json!(10));
    }

    let after = weave.read_contract(&contract, None).await.unwrap();
    assert_eq!(before, after);
    assert!(after.state["balances"].get("carol").is_none());
}

#[tokio::test]
async fn transport_failure_is_fatal_and_recoverable_by_retry() {
    let ledger = Arc::new(MockLedger::new());
    let contract = ledger.deploy_script_contract("token", &json!({"balances": {}}));
    ledger.set_force_error(Some("gateway down"));

    let weave = client(&ledger);
    let err = weave.read_contract(&contract, None).await.unwrap_err();
    assert!(matches!(err, EvalError::LoaderUnavailable { .. }));

    ledger.set_force_error(None);
    assert!(weave.read_contract(&contract, None).await.is_ok());
}

#[tokio::test]
async fn unknown_contract_is_definition_not_found() {
    let ledger = Arc::new(MockLedger::new());
    let weave = client(&ledger);
    let err = weave
        .read_contract(&ContractId::new("never-deployed"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EvalError::DefinitionNotFound { .. }));
}

#[tokio::test]
async fn invalid_wasm_bytecode_fails_fatally_at_create_time() {
    let ledger = Arc::new(MockLedger::new());
    let contract = ledger.deploy_wasm_contract("rust", b"not a module", &json!({}));

    let weave = client(&ledger);
    let err = weave.read_contract(&contract, None).await.unwrap_err();
    match err {
        EvalError::DefinitionMalformed { reason, .. } => {
            assert!(reason.contains("magic"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn pending_interactions_never_enter_the_fold() {
    let ledger = Arc::new(MockLedger::new());
    let contract = ledger.deploy_script_contract("token", &json!({"balances": {"alice": 100}}));
    let alice = Address::new("alice");
    ledger.add_interaction(&contract, &alice, 2, &transfer("bob", 10));
    let pending = ledger.add_pending_interaction(&contract, &alice, &transfer("bob", 90));

    let weave = client(&ledger);
    let state = weave.read_contract(&contract, None).await.unwrap();
    assert_eq!(state.state["balances"]["bob"], json!(10));
    assert!(!state.validity.contains_key(&pending));
}

#[tokio::test]
async fn point_in_time_reads_ignore_later_history() {
    let ledger = Arc::new(MockLedger::new());
    let contract = ledger.deploy_script_contract("token", &json!({"balances": {"alice": 100}}));
    let alice = Address::new("alice");
    ledger.add_interaction(&contract, &alice, 3, &transfer("bob", 10));
    ledger.add_interaction(&contract, &alice, 7, &transfer("bob", 10));

    let weave = client(&ledger);
    let at_5 = weave.read_contract(&contract, Some(5)).await.unwrap();
    assert_eq!(at_5.state["balances"]["bob"], json!(10));
    assert_eq!(at_5.last_evaluated_height, 5);
    assert_eq!(at_5.validity.len(), 1);
}
