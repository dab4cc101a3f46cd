use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};

use supply_ledger::api::configure_routes;
use supply_ledger::blockchain::{Chain, MiningState, Payload};
use supply_ledger::network::{
    HttpConnector, LocalNetwork, NetworkNode, PeerConnector, Reconciliation,
};

fn local_node(network: &Arc<LocalNetwork>, address: &str) -> Arc<NetworkNode> {
    let node = Arc::new(NetworkNode::new(address, Chain::new().unwrap(), network.clone()));
    network.register(&node);
    node
}

/// Gossip is delivered in the background; waits until `check` holds
async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held");
}

fn mine_onto(chain: &Chain, payload: &str) {
    let mut block = chain
        .create_candidate_with_difficulty(vec![Payload::from(payload)], 1)
        .unwrap();
    block.mine().unwrap();
    chain.append(block).unwrap();
}

/// Two nodes sharing a genesis block, each one block ahead on its own fork
fn forked_pair(network: &Arc<LocalNetwork>) -> (Arc<NetworkNode>, Arc<NetworkNode>) {
    let genesis = Chain::new().unwrap().blocks();

    let left = Chain::new().unwrap();
    left.replace_all(genesis.clone()).unwrap();
    mine_onto(&left, "from-a");

    let right = Chain::new().unwrap();
    right.replace_all(genesis).unwrap();
    mine_onto(&right, "from-b");

    let a = Arc::new(NetworkNode::new("node-a", left, network.clone()));
    let b = Arc::new(NetworkNode::new("node-b", right, network.clone()));
    network.register(&a);
    network.register(&b);
    (a, b)
}

/// Waits until every node has at least `length` blocks and none is mining
async fn settle(nodes: &[&Arc<NetworkNode>], length: usize) {
    for _ in 0..1000 {
        let done = nodes.iter().all(|node| {
            node.chain_length() >= length && node.mining_status().state != MiningState::Working
        });
        if done {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("nodes did not settle at length {}", length);
}

#[tokio::test]
async fn test_peers_form_a_mesh_and_share_one_chain() {
    let network = LocalNetwork::new();
    let a = local_node(&network, "node-a");
    let b = local_node(&network, "node-b");
    let c = local_node(&network, "node-c");

    assert!(b.add_peer("node-a").await.unwrap());
    assert!(c.add_peer("node-a").await.unwrap());

    assert_eq!(a.peers(), vec!["node-b".to_string(), "node-c".to_string()]);
    eventually(|| b.peers() == vec!["node-a".to_string(), "node-c".to_string()]).await;
    eventually(|| c.peers() == vec!["node-a".to_string(), "node-b".to_string()]).await;

    assert_eq!(a.chain(), b.chain());
    assert_eq!(b.chain(), c.chain());
}

#[tokio::test]
async fn test_transaction_gossip_reaches_every_node() {
    let network = LocalNetwork::new();
    let a = local_node(&network, "node-a");
    let b = local_node(&network, "node-b");
    let c = local_node(&network, "node-c");
    b.add_peer("node-a").await.unwrap();
    c.add_peer("node-b").await.unwrap();

    assert!(c.submit_transaction(Payload::from("abcd")).await);
    eventually(|| {
        [&a, &b, &c]
            .iter()
            .all(|node| node.pending_transactions() == vec![Payload::from("abcd")])
    })
    .await;

    assert!(!a.submit_transaction(Payload::from("abcd")).await);
}

#[tokio::test]
async fn test_mining_race_commits_once_everywhere() {
    let network = LocalNetwork::new();
    let a = local_node(&network, "node-a");
    let b = local_node(&network, "node-b");
    let c = local_node(&network, "node-c");
    b.add_peer("node-a").await.unwrap();
    c.add_peer("node-a").await.unwrap();

    a.submit_transaction(Payload::from("abcd")).await;
    assert!(a.start_mining("node-a", 3).await.unwrap());
    settle(&[&a, &b, &c], 2).await;

    // simultaneous winners leave equal-length forks; reconciliation picks one
    a.reconcile("node-b").await.unwrap();
    a.reconcile("node-c").await.unwrap();
    b.reconcile("node-c").await.unwrap();

    let expected = a.chain();
    assert_eq!(expected.len(), 2);
    for node in [&a, &b, &c] {
        assert_eq!(node.chain(), expected);
        assert!(node.is_chain_valid());
        assert!(node.pending_transactions().is_empty());
        assert!(node.registered_transactions().contains(&Payload::from("abcd")));
    }
}

#[tokio::test]
async fn test_unreachable_node_leaves_every_peer_set() {
    let network = LocalNetwork::new();
    let a = local_node(&network, "node-a");
    let b = local_node(&network, "node-b");
    let c = local_node(&network, "node-c");
    b.add_peer("node-a").await.unwrap();
    c.add_peer("node-a").await.unwrap();

    network.disconnect("node-c");
    a.submit_transaction(Payload::from("abcd")).await;

    eventually(|| a.peers() == vec!["node-b".to_string()]).await;
    eventually(|| b.peers() == vec!["node-a".to_string()]).await;
    assert_eq!(b.pending_transactions(), vec![Payload::from("abcd")]);
}

#[tokio::test]
async fn test_equal_length_forks_converge_in_either_order() {
    for b_first in [true, false] {
        let network = LocalNetwork::new();
        let (a, b) = forked_pair(&network);
        assert_eq!(a.chain_length(), b.chain_length());
        assert_ne!(a.chain(), b.chain());

        // newer tail wins; an exact timestamp tie goes to the smaller hash
        let a_tail = a.last_block().unwrap();
        let b_tail = b.last_block().unwrap();
        let a_wins = match a_tail.timestamp().cmp(&b_tail.timestamp()) {
            std::cmp::Ordering::Equal => a_tail.hash() < b_tail.hash(),
            order => order.is_gt(),
        };
        let winner = if a_wins { a.chain() } else { b.chain() };

        if b_first {
            b.reconcile("node-a").await.unwrap();
            assert_eq!(a.reconcile("node-b").await.unwrap(), Reconciliation::InSync);
        } else {
            a.reconcile("node-b").await.unwrap();
            assert_eq!(b.reconcile("node-a").await.unwrap(), Reconciliation::InSync);
        }

        let hashes = |node: &Arc<NetworkNode>| -> Vec<_> {
            node.chain().iter().map(|block| block.hash().copied()).collect()
        };
        assert_eq!(hashes(&a), hashes(&b));
        assert_eq!(a.chain(), winner);
        assert!(a.is_chain_valid() && b.is_chain_valid());
    }
}

#[tokio::test]
async fn test_reconcile_through_peer_client() {
    let network = LocalNetwork::new();
    let a = local_node(&network, "node-a");
    let b = local_node(&network, "node-b");

    a.submit_transaction(Payload::from("only-a")).await;
    a.start_mining("node-a", 2).await.unwrap();
    settle(&[&a], 2).await;

    let client = network.connect("node-b");
    assert_eq!(client.reconcile("node-a").await.unwrap(), Reconciliation::Adopted);
    assert_eq!(b.chain(), a.chain());
}

fn start_http_node() -> (Arc<NetworkNode>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());

    let connector = HttpConnector::new(Duration::from_secs(5)).unwrap();
    let node = Arc::new(NetworkNode::new(
        address.clone(),
        Chain::new().unwrap(),
        Arc::new(connector),
    ));

    let data = web::Data::from(Arc::clone(&node));
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .app_data(web::JsonConfig::default().limit(16 * 1024 * 1024))
            .configure(configure_routes)
    })
    .workers(2)
    .listen(listener)
    .unwrap()
    .run();
    actix_web::rt::spawn(server);

    (node, address)
}

#[actix_web::test]
async fn test_nodes_sync_over_http() {
    let (a, a_address) = start_http_node();
    let (b, b_address) = start_http_node();

    assert!(a.add_peer(&b_address).await.unwrap());
    assert_eq!(a.peers(), vec![b_address.clone()]);
    assert_eq!(b.peers(), vec![a_address.clone()]);
    assert_eq!(a.chain(), b.chain());

    assert!(a.submit_transaction(Payload::from("abcd")).await);
    eventually(|| b.pending_transactions() == vec![Payload::from("abcd")]).await;

    assert!(a.start_mining(&a_address, 2).await.unwrap());
    settle(&[&a, &b], 2).await;
    a.reconcile(&b_address).await.unwrap();

    assert_eq!(a.chain(), b.chain());
    assert!(b.pending_transactions().is_empty());
    assert!(b.registered_transactions().contains(&Payload::from("abcd")));
}
