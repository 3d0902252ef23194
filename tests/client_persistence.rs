//! Checkpoint persistence, retention, and concurrency behavior of the
//! `Weave` client.

use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use weave_replay::weave_gateway::{LedgerClient, MockLedger};
use weave_replay::{Address, EvaluationOptions, Weave};

fn transfer(target: &str, qty: u64) -> Value {
    json!({"function": "transfer", "target": target, "qty": qty})
}

#[tokio::test]
async fn checkpoints_survive_a_client_restart() {
    let ledger = Arc::new(MockLedger::new());
    let contract = ledger.deploy_script_contract("token", &json!({"balances": {"alice": 100}}));
    let alice = Address::new("alice");
    for height in [2, 3, 4] {
        ledger.add_interaction(&contract, &alice, height, &transfer("bob", 5));
    }
    let cache_dir = TempDir::new().unwrap();

    let first = Weave::builder()
        .with_gateway(Arc::clone(&ledger) as Arc<dyn LedgerClient>)
        .with_cache_dir(cache_dir.path())
        .build()
        .unwrap();
    let evaluated = first.read_contract(&contract, Some(4)).await.unwrap();
    assert_eq!(first.metrics().interactions_replayed, 3);
    drop(first);

    let second = Weave::builder()
        .with_gateway(Arc::clone(&ledger) as Arc<dyn LedgerClient>)
        .with_cache_dir(cache_dir.path())
        .build()
        .unwrap();
    let reloaded = second.read_contract(&contract, Some(4)).await.unwrap();

    assert_eq!(reloaded, evaluated);
    let metrics = second.metrics();
    assert_eq!(metrics.interactions_replayed, 0);
    assert_eq!(metrics.cache_hits, 1);
}

#[tokio::test]
async fn retention_keeps_the_newest_checkpoints() {
    let ledger = Arc::new(MockLedger::new());
    let contract = ledger.deploy_script_contract("token", &json!({"balances": {"alice": 100}}));
    let alice = Address::new("alice");
    for height in [2, 3, 4, 5] {
        ledger.add_interaction(&contract, &alice, height, &transfer("bob", 1));
    }

    let weave = Weave::builder()
        .with_gateway(Arc::clone(&ledger) as Arc<dyn LedgerClient>)
        .with_checkpoint_interval(1)
        .with_max_checkpoints(2)
        .build()
        .unwrap();
    weave.read_contract(&contract, None).await.unwrap();

    let heights = weave.evaluator().cache().checkpoint_heights(&contract);
    assert_eq!(heights, vec![4, 5]);
    // Resume from the surviving checkpoint still works.
    ledger.add_interaction(&contract, &alice, 8, &transfer("bob", 1));
    let extended = weave.read_contract(&contract, None).await.unwrap();
    assert_eq!(extended.state["balances"]["bob"], json!(5));
    assert_eq!(weave.metrics().interactions_replayed, 5);
}

#[tokio::test]
async fn concurrent_reads_of_one_contract_fold_once() {
    let ledger = Arc::new(MockLedger::new());
    let contract = ledger.deploy_script_contract("token", &json!({"balances": {"alice": 100}}));
    let alice = Address::new("alice");
    for height in [2, 3, 4] {
        ledger.add_interaction(&contract, &alice, height, &transfer("bob", 10));
    }

    let weave = Weave::builder()
        .with_gateway(Arc::clone(&ledger) as Arc<dyn LedgerClient>)
        .build()
        .unwrap();

    let (first, second) = tokio::join!(
        weave.read_contract(&contract, Some(4)),
        weave.read_contract(&contract, Some(4)),
    );
    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first, second);

    // The follower was served from the leader's checkpoint: the three
    // interactions were folded exactly once across both calls.
    let metrics = weave.metrics();
    assert_eq!(metrics.evaluations_started, 2);
    assert_eq!(metrics.interactions_replayed, 3);
    assert_eq!(metrics.cache_hits, 1);
}

#[tokio::test]
async fn different_contracts_evaluate_in_parallel() {
    let ledger = Arc::new(MockLedger::new());
    let alice = Address::new("alice");
    let contracts: Vec<_> = (0..4)
        .map(|n| {
            let contract =
                ledger.deploy_script_contract("token", &json!({"balances": {"alice": 100}}));
            ledger.add_interaction(&contract, &alice, 3, &transfer("bob", 10 + n));
            contract
        })
        .collect();

    let weave = Weave::builder()
        .with_gateway(Arc::clone(&ledger) as Arc<dyn LedgerClient>)
        .build()
        .unwrap();

    let results = weave.read_contracts(&contracts, None).await;
    assert_eq!(results.len(), 4);
    for (n, (id, state)) in results.iter().enumerate() {
        assert_eq!(id, &contracts[n]);
        let state = state.as_ref().unwrap();
        assert_eq!(state.state["balances"]["bob"], json!(10 + n as u64));
    }
}

#[tokio::test]
async fn cache_disabled_reads_do_not_perturb_checkpoints() {
    let ledger = Arc::new(MockLedger::new());
    let contract = ledger.deploy_script_contract("token", &json!({"balances": {"alice": 100}}));
    ledger.add_interaction(&contract, &Address::new("alice"), 3, &transfer("bob", 10));

    let weave = Weave::builder()
        .with_gateway(Arc::clone(&ledger) as Arc<dyn LedgerClient>)
        .build()
        .unwrap();

    let cached = weave.read_contract(&contract, Some(3)).await.unwrap();
    weave.set_evaluation_options(EvaluationOptions::default().with_cache(false));
    let uncached = weave.read_contract(&contract, Some(3)).await.unwrap();
    assert_eq!(cached, uncached);
}
