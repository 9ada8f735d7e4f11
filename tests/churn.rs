//! Concurrent dialing while the source membership and the policy set
//! churn underneath. The store invariants must hold at the end and no
//! dial may hang or panic.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use booster::core::source::{Balancer, BlockPolicy, Dialer, Network, Source, SourceStore};
use booster::DialError;

use common::MemorySource;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dials_survive_membership_and_policy_churn() {
    let store = Arc::new(SourceStore::new());
    store.put([
        MemorySource::new("base0") as Arc<dyn Source>,
        MemorySource::new("base1") as Arc<dyn Source>,
    ]);
    let balancer = Arc::new(Balancer::new(store.clone()));
    let dialer = Arc::new(Dialer::new(balancer));

    // Membership churn: one source flapping in and out.
    let flapper = {
        let store = store.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                store.put([MemorySource::new("flappy") as Arc<dyn Source>]);
                tokio::time::sleep(Duration::from_millis(5)).await;
                store.del(&["flappy"]);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    // Policy churn: base1 flapping under a block policy.
    let blocker = {
        let store = store.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                store.add_policy(Arc::new(BlockPolicy::new("churn", "base1")));
                tokio::time::sleep(Duration::from_millis(5)).await;
                store.del_policy("block_base1");
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    let mut dials = Vec::new();
    for i in 0..100 {
        let dialer = dialer.clone();
        dials.push(tokio::spawn(async move {
            let target = format!("target{}.example:80", i % 7);
            dialer.dial(Network::Tcp, &target).await
        }));
    }

    for task in dials {
        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("dial must not hang")
            .expect("dial task must not panic");
        match outcome {
            Ok(_conn) => {}
            Err(DialError::NoSources) => {}
            Err(other) => panic!("unexpected dial error: {other}"),
        }
    }

    flapper.await.unwrap();
    blocker.await.unwrap();

    // Invariants after the dust settles: accepted and blocked partition
    // the membership, and with no policy left nothing stays blocked.
    let snapshot = store.get_sources_snapshot();
    let accepted: HashSet<&str> = snapshot
        .iter()
        .filter(|s| !s.blocked)
        .map(|s| s.name.as_str())
        .collect();
    let blocked: HashSet<&str> = snapshot
        .iter()
        .filter(|s| s.blocked)
        .map(|s| s.name.as_str())
        .collect();
    assert!(accepted.is_disjoint(&blocked));
    assert!(store.get_policies_snapshot().is_empty());
    assert!(blocked.is_empty());
    assert!(accepted.contains("base0"));
    assert!(accepted.contains("base1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn selection_is_linearizable_across_policy_flips() {
    let store = Arc::new(SourceStore::new());
    store.put([
        MemorySource::new("a") as Arc<dyn Source>,
        MemorySource::new("b") as Arc<dyn Source>,
    ]);
    let balancer = Arc::new(Balancer::new(store.clone()));

    let flipper = {
        let store = store.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                store.add_policy(Arc::new(BlockPolicy::new("flip", "a")));
                store.del_policy("block_a");
                tokio::task::yield_now().await;
            }
        })
    };

    // Every selection observes either the blocked or the unblocked state:
    // "a" may or may not appear, "b" always stays eligible, and no
    // selection errors while at least one source is accepted.
    let getter = {
        let balancer = balancer.clone();
        tokio::spawn(async move {
            for _ in 0..500 {
                match balancer.get("t:80") {
                    Ok(source) => {
                        let name = source.name();
                        assert!(name == "a" || name == "b");
                    }
                    Err(err) => panic!("selection failed mid-flip: {err}"),
                }
                tokio::task::yield_now().await;
            }
        })
    };

    flipper.await.unwrap();
    getter.await.unwrap();
}
