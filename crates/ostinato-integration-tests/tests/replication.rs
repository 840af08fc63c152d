//! Integration test: successor replication of blobs.
//!
//! A blob stored on its owner spreads to the next K-1 successors on the
//! following stabilization sweep; nodes outside the replica set never see
//! it, and blobs a node does not own are left for their owner to handle.

use ostinato_integration_tests::TestRing;

const M: u8 = 8;

#[tokio::test]
async fn owned_blob_reaches_the_replica_set() {
    let ring = TestRing::new();
    let a = ring.spawn_node(10, M, 2);
    let b = ring.spawn_node(100, M, 2);
    let c = ring.spawn_node(200, M, 2);

    let seed = a.self_ref().await.addr();
    b.request_join(seed).await.expect("join b");
    c.request_join(seed).await.expect("join c");

    // Blob id 0x32 = 50 on the ring: owned by B, since 50 is in (10, 100].
    b.store_blob("32", b"a chorus, repeated").await.expect("store");

    b.stabilize_tick().await;

    // K = 2: the owner plus its first successor hold the blob.
    assert!(b.store().contains("32"));
    assert!(c.store().contains("32"), "successor received the backup");
    assert!(!a.store().contains("32"), "third node stays outside the set");

    let copy = std::fs::read(c.store().path("32").expect("path")).expect("read");
    assert_eq!(copy, b"a chorus, repeated");

    // A second sweep finds the replica in place and pushes nothing new.
    b.stabilize_tick().await;
    assert_eq!(c.store().ids().expect("ids"), vec!["32".to_string()]);
}

#[tokio::test]
async fn misplaced_blob_is_not_swept() {
    let ring = TestRing::new();
    let a = ring.spawn_node(10, M, 2);
    let b = ring.spawn_node(100, M, 2);
    let c = ring.spawn_node(200, M, 2);

    let seed = a.self_ref().await.addr();
    b.request_join(seed).await.expect("join b");
    c.request_join(seed).await.expect("join c");

    // Blob id 0xc8 = 200 belongs to C, but churn left it on B. B's sweep
    // only repairs blobs it owns; the stray copy stays put.
    b.store_blob("c8", b"stray").await.expect("store");

    b.stabilize_tick().await;

    assert!(b.store().contains("c8"));
    assert!(!c.store().contains("c8"));
    assert!(!a.store().contains("c8"));
}

#[tokio::test]
async fn non_hex_files_are_ignored_by_the_sweep() {
    let ring = TestRing::new();
    let a = ring.spawn_node(10, M, 2);
    let b = ring.spawn_node(100, M, 2);

    let seed = a.self_ref().await.addr();
    b.request_join(seed).await.expect("join b");

    // A file whose name cannot be a blob id never travels.
    std::fs::write(b.store().dir().join("README"), b"not a blob").expect("write");
    b.stabilize_tick().await;

    assert!(!a.store().contains("README"));
    assert!(a.store().ids().expect("ids").is_empty());
}
