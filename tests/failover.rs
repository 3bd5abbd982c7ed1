//! Failover integration tests: several managers sharing one store

use chrono::Utc;
use fleetcoord::common::FailoverConfig;
use fleetcoord::failover::{
    conduct_election, EventType, FailoverManager, FailoverNode, FailoverSignal, FailoverState,
    NodeIdentity, NodeRole,
};
use fleetcoord::store::{keys, CoordinationStore, MemoryStore};
use std::sync::{Arc, Mutex};

type Signals = Arc<Mutex<Vec<FailoverSignal>>>;

fn manager(store: &Arc<MemoryStore>, id: &str) -> FailoverManager {
    FailoverManager::new(
        store.clone(),
        FailoverConfig::default(),
        NodeIdentity::new(id, "127.0.0.1", 9000).with_cluster_name("test"),
    )
}

async fn record_signals(manager: &FailoverManager) -> Signals {
    let seen: Signals = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    manager
        .register_failover_callback(move |signal| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(signal);
                Ok(())
            }
        })
        .await;
    seen
}

fn node(id: &str, priority: i32, health: f64, failures: u32) -> FailoverNode {
    let mut node = FailoverNode::new(id, NodeRole::Secondary, "10.0.0.1", 9000).with_priority(priority);
    node.health_score = health;
    node.failure_count = failures;
    node
}

#[test]
fn test_election_is_order_independent() {
    let config = FailoverConfig::default();
    let nodes = vec![
        node("a", 5, 90.0, 0),
        node("b", 10, 60.0, 3),
        node("c", 10, 80.0, 1),
        node("d", 10, 80.0, 0),
        node("e", 20, 10.0, 0),
    ];

    let mut winners = Vec::new();
    for rotation in 0..nodes.len() {
        let mut order = nodes.clone();
        order.rotate_left(rotation);
        if rotation % 2 == 1 {
            order.reverse();
        }
        let winner = conduct_election(
            &order,
            Utc::now(),
            config.node_liveness(),
            config.healthy_score_threshold,
        )
        .unwrap();
        winners.push(winner.id);
    }

    // "e" is below the health threshold; "d" beats "c" on failure count
    assert!(winners.iter().all(|w| w == "d"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_primary_under_race() {
    let store = Arc::new(MemoryStore::new());
    let managers: Vec<FailoverManager> = (0..8).map(|i| manager(&store, &format!("n{}", i))).collect();

    let handles: Vec<_> = managers
        .iter()
        .cloned()
        .map(|m| tokio::spawn(async move { m.try_become_primary().await }))
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let mut primaries = 0;
    for m in &managers {
        if m.current_node().await.is_primary() {
            primaries += 1;
        }
    }
    assert_eq!(primaries, 1);
}

#[tokio::test]
async fn test_losing_primary_race_leaves_a_secondary() {
    let store = Arc::new(MemoryStore::new());
    let x = manager(&store, "x");
    let y = manager(&store, "y");
    let y_seen = record_signals(&y).await;

    x.start(NodeRole::Primary, 10).await.unwrap();
    y.start(NodeRole::Primary, 5).await.unwrap();

    let me = y.current_node().await;
    assert_eq!(me.role, NodeRole::Secondary);
    assert_eq!(me.state, FailoverState::Standby);
    assert!(y_seen.lock().unwrap().is_empty());

    // the published record agrees, so the primary can hand over to it
    x.refresh().await.unwrap();
    let status = x.cluster_status().await;
    let secondaries: Vec<_> = status.secondary_nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(secondaries, vec!["y"]);

    assert!(x.trigger_failover("maintenance").await);
    y.heartbeat().await.unwrap();
    assert!(y.current_node().await.is_primary());
    assert_eq!(*y_seen.lock().unwrap(), vec![FailoverSignal::PromotedToPrimary]);

    y.stop().await;
    x.stop().await;
}

#[tokio::test]
async fn test_manual_failover_bookkeeping() {
    let store = Arc::new(MemoryStore::new());
    let x = manager(&store, "x");
    let y = manager(&store, "y");
    let z = manager(&store, "z");
    let x_seen = record_signals(&x).await;
    let y_seen = record_signals(&y).await;
    let z_seen = record_signals(&z).await;

    x.start(NodeRole::Primary, 10).await.unwrap();
    y.start(NodeRole::Secondary, 5).await.unwrap();
    z.start(NodeRole::Secondary, 1).await.unwrap();

    assert!(x.trigger_failover("maintenance").await);

    y.heartbeat().await.unwrap();
    z.heartbeat().await.unwrap();

    assert_eq!(
        *x_seen.lock().unwrap(),
        vec![FailoverSignal::PromotedToPrimary, FailoverSignal::DemotedToSecondary]
    );
    assert_eq!(*y_seen.lock().unwrap(), vec![FailoverSignal::PromotedToPrimary]);
    assert!(z_seen.lock().unwrap().is_empty());

    let failovers: Vec<_> = x
        .events()
        .await
        .into_iter()
        .filter(|e| e.event_type == EventType::Failover)
        .collect();
    assert_eq!(failovers.len(), 1);
    assert_eq!(failovers[0].from_node.as_deref(), Some("x"));
    assert_eq!(failovers[0].to_node.as_deref(), Some("y"));
    assert_eq!(failovers[0].reason, "maintenance");
    assert!(store
        .get(&keys::ha_event(&failovers[0].id))
        .await
        .unwrap()
        .is_some());

    // the notice was consumed
    assert!(store.get(&keys::ha_promotion("y")).await.unwrap().is_none());

    z.stop().await;
    y.stop().await;
    x.stop().await;
}

#[tokio::test]
async fn test_cluster_status_after_failover() {
    let store = Arc::new(MemoryStore::new());
    let x = manager(&store, "x");
    let y = manager(&store, "y");
    x.start(NodeRole::Primary, 10).await.unwrap();
    y.start(NodeRole::Secondary, 5).await.unwrap();

    assert!(x.trigger_failover("maintenance").await);
    let status = x.cluster_status().await;

    assert_eq!(status.cluster_id, "test-cluster");
    assert_eq!(status.total_nodes, 2);
    let primary = status.primary_node.clone().unwrap();
    assert_eq!(primary.id, "y");
    assert_eq!(primary.state, FailoverState::Active);

    let me = status.node("x").unwrap();
    assert_eq!(me.role, NodeRole::Secondary);
    assert_eq!(me.state, FailoverState::Standby);
    assert_eq!(status.current_node.as_ref().unwrap().id, "x");

    let failovers: Vec<_> = status
        .recent_events
        .iter()
        .filter(|e| e.event_type == EventType::Failover)
        .collect();
    assert_eq!(failovers.len(), 1);

    y.stop().await;
    x.stop().await;
}

#[tokio::test]
async fn test_stopping_primary_hands_over() {
    let store = Arc::new(MemoryStore::new());
    let x = manager(&store, "x");
    let y = manager(&store, "y");
    let y_seen = record_signals(&y).await;
    x.start(NodeRole::Primary, 10).await.unwrap();
    y.start(NodeRole::Secondary, 5).await.unwrap();

    x.stop().await;
    assert!(store.get(&keys::ha_node("x")).await.unwrap().is_none());

    y.refresh().await.unwrap();
    assert!(y.current_node().await.is_primary());
    assert_eq!(y.primary_node().await.unwrap().id, "y");
    assert_eq!(*y_seen.lock().unwrap(), vec![FailoverSignal::PromotedToPrimary]);

    y.stop().await;
}

#[tokio::test]
async fn test_election_after_primary_disappears() {
    let store = Arc::new(MemoryStore::new());
    let x = manager(&store, "x");
    assert!(x.try_become_primary().await);

    let y = manager(&store, "y");
    let y_seen = record_signals(&y).await;
    y.start(NodeRole::Secondary, 5).await.unwrap();
    assert!(!y.should_start_election().await);

    // the primary's record expires without a hand-off
    store.delete(&keys::ha_node("x")).await.unwrap();
    y.refresh().await.unwrap();
    assert!(y.should_start_election().await);

    let winner = y.start_election().await.unwrap().unwrap();
    assert_eq!(winner.id, "y");
    assert!(y.current_node().await.is_primary());
    assert_eq!(*y_seen.lock().unwrap(), vec![FailoverSignal::PromotedToPrimary]);
    assert!(store.get(keys::ELECTION_LOCK).await.unwrap().is_none());

    let elections = y
        .events()
        .await
        .into_iter()
        .filter(|e| e.event_type == EventType::Election)
        .count();
    assert_eq!(elections, 1);

    y.stop().await;
}
