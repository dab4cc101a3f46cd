use actix_web::{web, HttpResponse, Responder};
use log::warn;

use super::schema::{
    AckResponse, AddressResponse, ChainResponse, LengthResponse, PeerRequest, ReconcileResponse,
    StartMiningRequest, StopMiningRequest, TransactionRequest,
};
use crate::blockchain::{Block, MAX_DIFFICULTY};
use crate::network::NetworkNode;

/// Shared node state
pub type NodeData = web::Data<NetworkNode>;

fn ack(changed: bool) -> HttpResponse {
    HttpResponse::Ok().json(AckResponse { changed })
}

fn bad_request(context: &str, err: impl std::fmt::Display) -> HttpResponse {
    warn!("{}: {}", context, err);
    HttpResponse::BadRequest().json(serde_json::json!({
        "error": format!("{}: {}", context, err)
    }))
}

/// Get the node's address
#[utoipa::path(
    get,
    path = "/api/v1/address",
    responses(
        (status = 200, description = "Node address", body = AddressResponse)
    )
)]
pub async fn get_address(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(AddressResponse {
        address: node.address().to_string(),
    })
}

/// Connect to a peer
///
/// Exchanges mempools and reconciles chains with the peer
#[utoipa::path(
    post,
    path = "/api/v1/peers",
    request_body = PeerRequest,
    responses(
        (status = 200, description = "Peer processed", body = AckResponse),
        (status = 400, description = "Peer could not be added")
    )
)]
pub async fn add_peer(node: NodeData, request: web::Json<PeerRequest>) -> impl Responder {
    match node.into_inner().add_peer(&request.address).await {
        Ok(changed) => ack(changed),
        Err(err) => bad_request("Failed to add peer", err),
    }
}

/// List known peers
#[utoipa::path(
    get,
    path = "/api/v1/peers",
    responses(
        (status = 200, description = "Known peer addresses", body = Vec<String>)
    )
)]
pub async fn list_peers(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.peers())
}

/// Submit a transaction
///
/// Adds the payload to the mempool and gossips it to every peer
#[utoipa::path(
    post,
    path = "/api/v1/transactions",
    request_body = TransactionRequest,
    responses(
        (status = 200, description = "Transaction processed", body = AckResponse),
        (status = 400, description = "Invalid transaction data")
    )
)]
pub async fn submit_transaction(
    node: NodeData,
    request: web::Json<TransactionRequest>,
) -> impl Responder {
    let TransactionRequest { payload } = request.into_inner();
    if payload.as_bytes().is_empty() {
        return bad_request("Invalid transaction", "payload is empty");
    }
    ack(node.into_inner().submit_transaction(payload).await)
}

/// List pending transactions
#[utoipa::path(
    get,
    path = "/api/v1/transactions",
    responses(
        (status = 200, description = "Pending transactions in arrival order", body = Vec<crate::blockchain::Payload>)
    )
)]
pub async fn list_transactions(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.pending_transactions())
}

/// List transactions committed by the chain
#[utoipa::path(
    get,
    path = "/api/v1/transactions/registered",
    responses(
        (status = 200, description = "Registered transactions, oldest first", body = Vec<crate::blockchain::Payload>)
    )
)]
pub async fn list_registered_transactions(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.registered_transactions())
}

/// Start mining
///
/// Mines every pending transaction into a new block, on this node and on
/// every peer
#[utoipa::path(
    post,
    path = "/api/v1/mining/start",
    request_body = StartMiningRequest,
    responses(
        (status = 200, description = "Mining request processed", body = AckResponse),
        (status = 400, description = "Invalid mining request")
    )
)]
pub async fn start_mining(node: NodeData, request: web::Json<StartMiningRequest>) -> impl Responder {
    let node = node.into_inner();
    let StartMiningRequest { message, difficulty } = request.into_inner();
    if difficulty > MAX_DIFFICULTY {
        return bad_request(
            "Invalid mining request",
            format!("difficulty {} exceeds {}", difficulty, MAX_DIFFICULTY),
        );
    }
    let message = message.unwrap_or_else(|| node.address().to_string());

    match node.start_mining(&message, difficulty).await {
        Ok(changed) => ack(changed),
        Err(err) => bad_request("Failed to start mining", err),
    }
}

/// Stop mining
#[utoipa::path(
    post,
    path = "/api/v1/mining/stop",
    request_body = StopMiningRequest,
    responses(
        (status = 200, description = "Stop request processed", body = AckResponse)
    )
)]
pub async fn stop_mining(node: NodeData, request: web::Json<StopMiningRequest>) -> impl Responder {
    ack(node.into_inner().stop_mining(request.nonce).await)
}

/// Get the mining status
#[utoipa::path(
    get,
    path = "/api/v1/mining/status",
    responses(
        (status = 200, description = "Current mining status", body = crate::blockchain::MiningStatus)
    )
)]
pub async fn mining_status(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.mining_status())
}

/// Accept a mined block
#[utoipa::path(
    post,
    path = "/api/v1/blocks",
    request_body = Block,
    responses(
        (status = 200, description = "Block processed", body = AckResponse),
        (status = 400, description = "Block does not extend the chain")
    )
)]
pub async fn accept_block(node: NodeData, block: web::Json<Block>) -> impl Responder {
    match node.into_inner().accept_block(block.into_inner()).await {
        Ok(changed) => ack(changed),
        Err(err) => bad_request("Failed to accept block", err),
    }
}

/// Get a block by index
#[utoipa::path(
    get,
    path = "/api/v1/blocks/{index}",
    params(
        ("index" = u64, Path, description = "Index of the block")
    ),
    responses(
        (status = 200, description = "Block found", body = Block),
        (status = 404, description = "No block at this index")
    )
)]
pub async fn get_block(node: NodeData, index: web::Path<u64>) -> impl Responder {
    let index = index.into_inner();
    match node.block(index) {
        Some(block) => HttpResponse::Ok().json(block),
        None => HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("Block {} not found", index)
        })),
    }
}

/// Get the chain length
#[utoipa::path(
    get,
    path = "/api/v1/chain/length",
    responses(
        (status = 200, description = "Number of blocks", body = LengthResponse)
    )
)]
pub async fn chain_length(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(LengthResponse {
        length: node.chain_length(),
    })
}

/// Get the last block
#[utoipa::path(
    get,
    path = "/api/v1/chain/last",
    responses(
        (status = 200, description = "Tail of the chain", body = Block),
        (status = 500, description = "Chain is empty")
    )
)]
pub async fn last_block(node: NodeData) -> impl Responder {
    match node.last_block() {
        Ok(block) => HttpResponse::Ok().json(block),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Failed to read last block: {}", err)
        })),
    }
}

/// Get the full chain
///
/// Returns the entire chain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Chain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(node: NodeData) -> impl Responder {
    let chain = node.chain();
    let is_valid = node.is_chain_valid();

    HttpResponse::Ok().json(ChainResponse {
        length: chain.len(),
        chain,
        is_valid,
    })
}

/// Replace the chain
///
/// The replacement must be a valid chain from genesis
#[utoipa::path(
    put,
    path = "/api/v1/chain",
    request_body = Vec<Block>,
    responses(
        (status = 200, description = "Replacement processed", body = AckResponse),
        (status = 400, description = "Replacement is not a valid chain")
    )
)]
pub async fn replace_chain(node: NodeData, blocks: web::Json<Vec<Block>>) -> impl Responder {
    match node.replace_chain(blocks.into_inner()) {
        Ok(changed) => ack(changed),
        Err(err) => bad_request("Failed to replace chain", err),
    }
}

/// Reconcile chains with a peer
#[utoipa::path(
    post,
    path = "/api/v1/reconcile",
    request_body = PeerRequest,
    responses(
        (status = 200, description = "Chains reconciled", body = ReconcileResponse),
        (status = 400, description = "Reconciliation failed")
    )
)]
pub async fn reconcile(node: NodeData, request: web::Json<PeerRequest>) -> impl Responder {
    match node.reconcile(&request.address).await {
        Ok(outcome) => HttpResponse::Ok().json(ReconcileResponse { outcome }),
        Err(err) => bad_request("Failed to reconcile", err),
    }
}

/// Check if the chain is valid
///
/// Validates the entire chain
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Chain validation status", body = bool)
    )
)]
pub async fn validate_chain(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.is_chain_valid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::blockchain::{Chain, MiningState, MiningStatus, Payload};
    use crate::network::LocalNetwork;
    use actix_web::{http::StatusCode, test, App};
    use std::sync::Arc;

    fn node_data() -> NodeData {
        let network = LocalNetwork::new();
        let node = Arc::new(NetworkNode::new("http://node-a", Chain::new().unwrap(), network.clone()));
        network.register(&node);
        web::Data::from(node)
    }

    #[actix_web::test]
    async fn test_read_endpoints() {
        let app = test::init_service(App::new().app_data(node_data()).configure(configure_routes)).await;

        let req = test::TestRequest::get().uri("/api/v1/address").to_request();
        let resp: AddressResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.address, "http://node-a");

        let req = test::TestRequest::get().uri("/api/v1/chain").to_request();
        let resp: ChainResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.length, 1);
        assert!(resp.is_valid);

        let req = test::TestRequest::get().uri("/api/v1/chain/length").to_request();
        let resp: LengthResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.length, 1);

        let req = test::TestRequest::get().uri("/api/v1/blocks/0").to_request();
        let block: Block = test::call_and_read_body_json(&app, req).await;
        assert_eq!(block.index(), 0);

        let req = test::TestRequest::get().uri("/api/v1/blocks/9").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri("/api/v1/validate").to_request();
        let valid: bool = test::call_and_read_body_json(&app, req).await;
        assert!(valid);
    }

    #[actix_web::test]
    async fn test_submit_transaction() {
        let app = test::init_service(App::new().app_data(node_data()).configure(configure_routes)).await;

        let body = TransactionRequest {
            payload: Payload::from("abcd"),
        };
        let req = test::TestRequest::post().uri("/api/v1/transactions").set_json(&body).to_request();
        let resp: AckResponse = test::call_and_read_body_json(&app, req).await;
        assert!(resp.changed);

        let req = test::TestRequest::post().uri("/api/v1/transactions").set_json(&body).to_request();
        let resp: AckResponse = test::call_and_read_body_json(&app, req).await;
        assert!(!resp.changed);

        let req = test::TestRequest::get().uri("/api/v1/transactions").to_request();
        let pending: Vec<Payload> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(pending, vec![Payload::from("abcd")]);

        let empty = TransactionRequest {
            payload: Payload::from(""),
        };
        let req = test::TestRequest::post().uri("/api/v1/transactions").set_json(&empty).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_invalid_block_is_bad_request() {
        let app = test::init_service(App::new().app_data(node_data()).configure(configure_routes)).await;

        let unmined = Chain::new().unwrap().create_candidate(vec![Payload::from("x")]).unwrap();
        let req = test::TestRequest::post().uri("/api/v1/blocks").set_json(&unmined).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::put()
            .uri("/api/v1/chain")
            .set_json(Vec::<Block>::new())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_mining_status_starts_idle() {
        let app = test::init_service(App::new().app_data(node_data()).configure(configure_routes)).await;

        let req = test::TestRequest::get().uri("/api/v1/mining/status").to_request();
        let status: MiningStatus = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status.state, MiningState::Idle);

        let body = StartMiningRequest {
            message: None,
            difficulty: 2,
        };
        let req = test::TestRequest::post().uri("/api/v1/mining/start").set_json(&body).to_request();
        let resp: AckResponse = test::call_and_read_body_json(&app, req).await;
        assert!(!resp.changed);
    }

    #[actix_web::test]
    async fn test_unreachable_difficulty_is_bad_request() {
        let data = node_data();
        let node = data.clone().into_inner();
        node.submit_transaction(Payload::from("abcd")).await;
        let app = test::init_service(App::new().app_data(data).configure(configure_routes)).await;

        let body = StartMiningRequest {
            message: None,
            difficulty: MAX_DIFFICULTY + 1,
        };
        let req = test::TestRequest::post().uri("/api/v1/mining/start").set_json(&body).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(node.mining_status().state, MiningState::Idle);
    }
}
