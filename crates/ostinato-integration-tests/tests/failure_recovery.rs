//! Integration test: successor failure and ring repair.
//!
//! A three-node ring loses one member; the predecessor's next
//! stabilization tick promotes its cached fallback successor, re-announces
//! its predecessor link, and propagates the repaired arc so routing
//! converges again.

use ostinato_integration_tests::TestRing;

const M: u8 = 8;
const K: usize = 3;

#[tokio::test]
async fn successor_death_is_healed_by_stabilization() {
    let ring = TestRing::new();
    let a = ring.spawn_node(10, M, K);
    let b = ring.spawn_node(100, M, K);
    let c = ring.spawn_node(200, M, K);

    let seed = a.self_ref().await.addr();
    b.request_join(seed).await.expect("join b");
    c.request_join(seed).await.expect("join c");

    // A quiet tick first: B learns C's successor (A) as its fallback.
    b.stabilize_tick().await;

    ring.mesh().kill(&c.self_ref().await);

    // The repairing tick: ping C fails, the fallback is promoted.
    b.stabilize_tick().await;

    assert_eq!(b.successor().await.node_id, 10, "B promoted its fallback");
    assert_eq!(
        a.predecessor().await.node_id,
        100,
        "B re-announced itself upstream"
    );

    // The repair announcement put both survivors into the same epoch.
    assert_eq!(a.ring_signature().await, b.ring_signature().await);

    // Keys that used to belong to C now resolve to A at every entry point.
    for node in [&a, &b] {
        assert_eq!(node.find_successor(150).await.expect("lookup").node_id, 10);
    }

    // Predecessor death is not detected symmetrically: B still names the
    // dead node until someone joins between them.
    assert_eq!(b.predecessor().await.node_id, 200);
}

#[tokio::test]
async fn two_node_ring_collapses_back_to_solitary() {
    let ring = TestRing::new();
    let a = ring.spawn_node(10, M, K);
    let b = ring.spawn_node(100, M, K);

    let seed = a.self_ref().await.addr();
    b.request_join(seed).await.expect("join b");

    // A's fallback becomes B's successor, which is A itself.
    a.stabilize_tick().await;

    ring.mesh().kill(&b.self_ref().await);
    a.stabilize_tick().await;

    // The survivor is a correct ring of one again.
    assert_eq!(a.successor().await.node_id, 10);
    assert_eq!(a.predecessor().await.node_id, 10);
    assert_eq!(a.find_successor(150).await.expect("lookup").node_id, 10);
    let replicants = a.get_replicants(3, None).await;
    assert_eq!(replicants.len(), 1);
}
