//! Protocol-level tests: several live peers on localhost TCP, driven
//! through the public `Paxos` surface.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use kvpaxos::{Config, Paxos};

static PORT: AtomicUsize = AtomicUsize::new(21000);

/// Carves out a fresh port range and builds one config per replica.
fn group(count: usize) -> Vec<Config> {
    let _ = env_logger::builder().is_test(true).try_init();
    let base = PORT.fetch_add(count, Ordering::Relaxed);
    let peers: Vec<String> = (0..count)
        .map(|index| format!("127.0.0.1:{}", base + index))
        .collect();
    (0..count)
        .map(|me| Config::new(peers.clone(), me).with_timeout(Duration::from_millis(200)))
        .collect()
}

async fn bind_all(configs: &[Config]) -> Vec<Paxos<String>> {
    let mut peers = Vec::with_capacity(configs.len());
    for config in configs {
        peers.push(Paxos::bind(config).await.expect("failed to bind peer"));
    }
    peers
}

async fn wait_decided(peer: &Paxos<String>, seq: i64) -> String {
    for _ in 0..200 {
        if let Some(value) = peer.status(seq) {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("slot {} never decided", seq);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_proposer_reaches_all_peers() {
    let peers = bind_all(&group(3)).await;
    peers[0].start(0, "hello".to_owned());
    for peer in &peers {
        assert_eq!(wait_decided(peer, 0).await, "hello");
    }
    assert!(peers.iter().all(|peer| peer.max() >= 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_proposers_agree() {
    let peers = bind_all(&group(3)).await;
    let proposed: Vec<String> = (0..3).map(|index| format!("value-{}", index)).collect();
    for (peer, value) in peers.iter().zip(&proposed) {
        peer.start(0, value.clone());
    }

    let decided = wait_decided(&peers[0], 0).await;
    for peer in &peers {
        assert_eq!(wait_decided(peer, 0).await, decided);
    }
    // Validity: the winner was actually proposed by someone.
    assert!(proposed.contains(&decided));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slots_are_independent() {
    let peers = bind_all(&group(3)).await;
    for seq in 0..5 {
        let proposer = &peers[seq as usize % 3];
        proposer.start(seq, format!("slot-{}", seq));
    }
    for seq in 0..5 {
        let expected = format!("slot-{}", seq);
        for peer in &peers {
            assert_eq!(wait_decided(peer, seq).await, expected);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn start_is_idempotent_per_slot() {
    let peers = bind_all(&group(3)).await;
    peers[1].start(0, "first".to_owned());
    let decided = wait_decided(&peers[1], 0).await;
    // Restarting the slot, even with another value, changes nothing.
    peers[1].start(0, "second".to_owned());
    peers[2].start(0, "third".to_owned());
    tokio::time::sleep(Duration::from_millis(200)).await;
    for peer in &peers {
        assert_eq!(wait_decided(peer, 0).await, decided);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn watermark_reclaims_only_after_all_peers_are_done() {
    let peers = bind_all(&group(3)).await;
    peers[0].start(0, "zero".to_owned());
    for peer in &peers {
        wait_decided(peer, 0).await;
    }

    // Nobody has reported done yet.
    assert!(peers.iter().all(|peer| peer.min() == 0));

    peers[0].done(0);
    // One report is not enough: the slot must survive.
    assert_eq!(peers[0].min(), 0);
    assert!(peers[0].status(0).is_some());

    peers[1].done(0);
    peers[2].done(0);

    // Watermarks travel piggybacked on protocol traffic; deciding the
    // next slot carries them back to the proposer.
    peers[0].start(1, "one".to_owned());
    wait_decided(&peers[0], 1).await;

    assert_eq!(peers[0].min(), 1);
    assert!(peers[0].status(0).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn majority_decides_without_third_peer() {
    let configs = group(3);
    let peers = bind_all(&configs).await;
    peers[2].kill();
    assert!(peers[2].status(0).is_none());

    peers[0].start(0, "quorum".to_owned());
    assert_eq!(wait_decided(&peers[0], 0).await, "quorum");
    assert_eq!(wait_decided(&peers[1], 0).await, "quorum");

    // A dead peer neither learns nor proposes.
    peers[2].start(1, "ghost".to_owned());
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(peers[2].status(0).is_none());
    assert!(peers[0].status(1).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreliable_delivery_still_converges() {
    let peers = bind_all(&group(3)).await;
    for peer in &peers {
        peer.set_unreliable(true);
    }
    for seq in 0..3 {
        peers[0].start(seq, format!("lossy-{}", seq));
    }
    for seq in 0..3 {
        let expected = format!("lossy-{}", seq);
        for peer in &peers {
            assert_eq!(wait_decided(peer, seq).await, expected);
        }
    }
}
