//! End-to-end scenario tests, one per entry in SPEC_FULL.md §8's S1–S6:
//! direct payment, two-hop, multi-path split, insufficient capacity,
//! triangle clearing, and an integrity violation. Each test drives the
//! engines directly against a fresh `SledStorage` — there is no RPC
//! surface to go through, the way `chronx-node/tests/smoke.rs` drives
//! its node over JSON-RPC, since this binary exposes no transport.

use std::sync::Arc;

use hub_clearing::ClearingEngine;
use hub_core::envelope::{PaymentConstraints, PaymentRequestPayload, TrustLineUpdatePayload};
use hub_core::model::{Participant, TrustLine, TrustLinePolicy};
use hub_core::types::{Amount, EquivalentCode, ParticipantStatus, Pid, TrustLineStatus};
use hub_core::{ClearingConfig, HubConfig};
use hub_events::{Correlation, EventBus, StorageEventBus};
use hub_graph::GraphIndex;
use hub_integrity::IntegrityChecker;
use hub_payment::PaymentEngine;
use hub_registry::TrustLineEngine;
use hub_storage::{SledStorage, StorageContract};

fn pid(b: u8) -> Pid {
    Pid::from_public_key_bytes(&[b; 32])
}

fn equiv() -> EquivalentCode {
    EquivalentCode::parse("UAH").unwrap()
}

fn correlation(tag: &str) -> Correlation {
    Correlation { run_id: None, scenario_id: Some(tag.to_string()), request_id: format!("{tag}-req") }
}

async fn participant(storage: &dyn StorageContract, p: Pid) {
    storage
        .put_participant(&Participant {
            pid: p,
            public_key: *p.as_bytes(),
            status: ParticipantStatus::Active,
            verification_level: 1,
            profile: serde_json::json!({}),
            created_at: chrono::Utc::now(),
        })
        .await
        .unwrap();
}

/// Extends credit from `creditor` to `debtor` up to `limit`, wiring both
/// storage (read by the integrity checker) and the graph cache (read by
/// the router) the way `hub-node`'s startup rebuild does for every line
/// already on disk.
async fn extend_trust(storage: &dyn StorageContract, graph: &GraphIndex, creditor: Pid, debtor: Pid, limit: &str) {
    let line = TrustLine {
        from: creditor,
        to: debtor,
        equivalent: equiv(),
        limit: limit.parse().unwrap(),
        policy: TrustLinePolicy { auto_clearing: true, can_be_intermediate: true, blocked: Default::default(), daily_limit: None },
        status: TrustLineStatus::Active,
        updated_at: chrono::Utc::now(),
    };
    storage.put_trust_line(&line).await.unwrap();
    graph.upsert_trust_line(&line).await;
}

struct Harness {
    storage: Arc<dyn StorageContract>,
    graph: Arc<GraphIndex>,
    payment: PaymentEngine,
    clearing: ClearingEngine,
    integrity: IntegrityChecker,
    trust_lines: TrustLineEngine,
}

fn harness(name: &str, admin_pid: Pid) -> Harness {
    let dir = std::env::temp_dir().join(format!("hub_node_scenario_{name}"));
    let _ = std::fs::remove_dir_all(&dir);
    let storage: Arc<dyn StorageContract> = Arc::new(SledStorage::open(&dir).expect("open sled store"));
    let graph = Arc::new(GraphIndex::new());
    let events: Arc<dyn EventBus> = Arc::new(StorageEventBus::new(Arc::clone(&storage)));

    let mut config = HubConfig {
        routing: Default::default(),
        payment: Default::default(),
        clearing: Default::default(),
        integrity: Default::default(),
        max_clock_drift_seconds: hub_core::DEFAULT_MAX_CLOCK_DRIFT_SECS,
        admin_pid,
    };
    config.clearing = ClearingConfig { min_clearing_amount: "0".parse().unwrap(), ..config.clearing };

    let payment = PaymentEngine::new(Arc::clone(&storage), Arc::clone(&graph), Arc::clone(&events), config.clone());
    let clearing = ClearingEngine::new(Arc::clone(&storage), Arc::clone(&graph), Arc::clone(&events), config.clearing.clone());
    let integrity = IntegrityChecker::new(Arc::clone(&storage), Arc::clone(&events));
    let trust_lines = TrustLineEngine::new(Arc::clone(&storage), Arc::clone(&graph), Arc::clone(&events));

    Harness { storage, graph, payment, clearing, integrity, trust_lines }
}

fn payment_request(from: Pid, to: Pid, amount: &str) -> PaymentRequestPayload {
    PaymentRequestPayload {
        from,
        to,
        equivalent: equiv(),
        amount: amount.parse().unwrap(),
        description: String::new(),
        constraints: PaymentConstraints::default(),
        idempotency_key: None,
        timestamp: chrono::Utc::now(),
    }
}

/// S1: a direct payment over one trust line commits in full.
#[tokio::test]
async fn s1_direct_payment_commits() {
    let (alice, bob) = (pid(1), pid(2));
    let admin = pid(99);
    let h = harness("s1", admin);
    participant(h.storage.as_ref(), alice).await;
    participant(h.storage.as_ref(), bob).await;
    extend_trust(h.storage.as_ref(), &h.graph, bob, alice, "100").await;

    let outcome = h
        .payment
        .execute_payment(payment_request(alice, bob, "30"), alice, correlation("s1"))
        .await
        .expect("payment should commit");

    assert_eq!(outcome.state, hub_core::model::TransactionState::Committed);
    let debt = h.storage.get_debt(&equiv(), &alice, &bob).await.unwrap().unwrap();
    assert_eq!(debt.amount, "30".parse::<Amount>().unwrap());
}

/// S2: a payment with no direct line routes through one intermediary.
#[tokio::test]
async fn s2_two_hop_payment_commits() {
    let (alice, carol, bob) = (pid(3), pid(4), pid(5));
    let admin = pid(99);
    let h = harness("s2", admin);
    for p in [alice, carol, bob] {
        participant(h.storage.as_ref(), p).await;
    }
    extend_trust(h.storage.as_ref(), &h.graph, carol, alice, "100").await;
    extend_trust(h.storage.as_ref(), &h.graph, bob, carol, "100").await;

    let outcome = h
        .payment
        .execute_payment(payment_request(alice, bob, "40"), alice, correlation("s2"))
        .await
        .expect("two-hop payment should commit");

    assert_eq!(outcome.state, hub_core::model::TransactionState::Committed);
    assert_eq!(outcome.routes.len(), 1);
    assert_eq!(outcome.routes[0].hops, vec![alice, carol, bob]);
    assert_eq!(h.storage.get_debt(&equiv(), &alice, &carol).await.unwrap().unwrap().amount, "40".parse::<Amount>().unwrap());
    assert_eq!(h.storage.get_debt(&equiv(), &carol, &bob).await.unwrap().unwrap().amount, "40".parse::<Amount>().unwrap());
}

/// S3: a payment too large for any single path splits across two.
#[tokio::test]
async fn s3_multi_path_split_commits() {
    let (alice, carol, dana, bob) = (pid(6), pid(7), pid(8), pid(9));
    let admin = pid(99);
    let h = harness("s3", admin);
    for p in [alice, carol, dana, bob] {
        participant(h.storage.as_ref(), p).await;
    }
    extend_trust(h.storage.as_ref(), &h.graph, carol, alice, "30").await;
    extend_trust(h.storage.as_ref(), &h.graph, bob, carol, "30").await;
    extend_trust(h.storage.as_ref(), &h.graph, dana, alice, "30").await;
    extend_trust(h.storage.as_ref(), &h.graph, bob, dana, "30").await;

    let outcome = h
        .payment
        .execute_payment(payment_request(alice, bob, "50"), alice, correlation("s3"))
        .await
        .expect("split payment should commit");

    assert_eq!(outcome.state, hub_core::model::TransactionState::Committed);
    assert_eq!(outcome.routes.len(), 2);
    let total: Amount = outcome.routes.iter().map(|r| r.amount).sum();
    assert_eq!(total, "50".parse::<Amount>().unwrap());
}

/// S4: requested amount exceeds every path's combined capacity — the
/// payment aborts instead of partially committing.
#[tokio::test]
async fn s4_insufficient_capacity_aborts() {
    let (alice, bob) = (pid(10), pid(11));
    let admin = pid(99);
    let h = harness("s4", admin);
    participant(h.storage.as_ref(), alice).await;
    participant(h.storage.as_ref(), bob).await;
    extend_trust(h.storage.as_ref(), &h.graph, bob, alice, "10").await;

    let err = h
        .payment
        .execute_payment(payment_request(alice, bob, "500"), alice, correlation("s4"))
        .await
        .expect_err("payment should abort on insufficient capacity");

    assert!(matches!(err, hub_core::error::HubError::InsufficientCapacity { .. }));
    assert!(h.storage.get_debt(&equiv(), &alice, &bob).await.unwrap().is_none(), "no partial debt should be left behind");
}

/// S5: a triangle of mutual debt nets to zero once the trigger fires.
#[tokio::test]
async fn s5_triangle_clearing_nets_to_zero() {
    let (alice, bob, carol) = (pid(12), pid(13), pid(14));
    let admin = pid(99);
    let h = harness("s5", admin);
    for p in [alice, bob, carol] {
        participant(h.storage.as_ref(), p).await;
    }
    extend_trust(h.storage.as_ref(), &h.graph, bob, alice, "100").await;
    extend_trust(h.storage.as_ref(), &h.graph, carol, bob, "100").await;
    extend_trust(h.storage.as_ref(), &h.graph, alice, carol, "100").await;

    h.payment.execute_payment(payment_request(alice, bob, "20"), alice, correlation("s5a")).await.unwrap();
    h.payment.execute_payment(payment_request(bob, carol, "20"), bob, correlation("s5b")).await.unwrap();
    // Closes the triangle: carol now owes alice too, so alice -> bob ->
    // carol -> alice is a fully positive cycle ready to net to zero.
    h.payment.execute_payment(payment_request(carol, alice, "20"), carol, correlation("s5c")).await.unwrap();

    let outcomes = h
        .clearing
        .on_debt_changed(&equiv(), carol, alice, &correlation("s5d"))
        .await
        .expect("clearing pass should run");

    assert!(!outcomes.is_empty(), "a closing triangle should be detected");
    assert!(h.storage.get_debt(&equiv(), &alice, &bob).await.unwrap().is_none());
    assert!(h.storage.get_debt(&equiv(), &bob, &carol).await.unwrap().is_none());
    assert!(h.storage.get_debt(&equiv(), &carol, &alice).await.unwrap().is_none());
}

/// S6: an operator trying to shrink a trust line below the debt it
/// already bounds gets rejected at the operation itself — the equivalent
/// is never locked for a request the core correctly refused.
#[tokio::test]
async fn s6_limit_lowering_operation_rejected_without_locking() {
    let (alice, bob) = (pid(15), pid(16));
    let admin = pid(99);
    let h = harness("s6", admin);
    participant(h.storage.as_ref(), alice).await;
    participant(h.storage.as_ref(), bob).await;
    extend_trust(h.storage.as_ref(), &h.graph, bob, alice, "100").await;

    h.payment.execute_payment(payment_request(alice, bob, "50"), alice, correlation("s6a")).await.unwrap();

    let lower = TrustLineUpdatePayload {
        from: bob,
        to: alice,
        equivalent: equiv(),
        limit: Some("10".parse().unwrap()),
        auto_clearing: None,
        can_be_intermediate: None,
        blocked: None,
        daily_limit: None,
        timestamp: chrono::Utc::now(),
    };
    let err = h
        .trust_lines
        .update(lower, bob, correlation("s6b"))
        .await
        .expect_err("lowering the limit below outstanding debt should be rejected");

    assert!(matches!(err, hub_core::error::HubError::TrustLimitExceeded { .. }));
    assert!(!h.storage.is_integrity_locked(&equiv()).await.unwrap(), "a rejected operation must not lock the equivalent");
    let line = h.storage.get_trust_line(&equiv(), &bob, &alice).await.unwrap().unwrap();
    assert_eq!(line.limit, "100".parse::<Amount>().unwrap(), "rejected update must leave the line untouched");

    h.integrity.check_trust_limits(&equiv(), &correlation("s6c")).await.expect("the untouched line still satisfies the check");
}

/// S6b: a row injected directly into storage, bypassing the core
/// entirely, is what the integrity checker's lock is actually for.
#[tokio::test]
async fn s6b_injected_corrupt_row_locks_equivalent() {
    let (alice, bob) = (pid(17), pid(18));
    let admin = pid(99);
    let h = harness("s6b", admin);
    participant(h.storage.as_ref(), alice).await;
    participant(h.storage.as_ref(), bob).await;
    extend_trust(h.storage.as_ref(), &h.graph, bob, alice, "100").await;

    h.payment.execute_payment(payment_request(alice, bob, "50"), alice, correlation("s6b-a")).await.unwrap();

    // Out-of-band corruption: a row written straight through the raw
    // storage upsert, bypassing `TrustLineEngine`'s invariant check
    // entirely — the scenario spec.md §8's S6 actually describes.
    extend_trust(h.storage.as_ref(), &h.graph, bob, alice, "10").await;

    let err = h
        .integrity
        .check_trust_limits(&equiv(), &correlation("s6b-b"))
        .await
        .expect_err("debt exceeding the corrupted limit should trip the check");

    assert!(matches!(err, hub_core::error::HubError::IntegrityViolation(_)));
    assert!(h.storage.is_integrity_locked(&equiv()).await.unwrap());
}
