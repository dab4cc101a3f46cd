use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use log::{error, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use supply_ledger::api;
use supply_ledger::blockchain::{self, Chain, MiningCoordinator};
use supply_ledger::config::NodeConfig;
use supply_ledger::network::{self, HttpConnector, LogListener, NetworkNode};

// Open the persisted chain, falling back to an in-memory one
fn initialize_chain(data_dir: &Path) -> io::Result<Chain> {
    if let Err(e) = std::fs::create_dir_all(data_dir) {
        warn!("Failed to create data directory: {}", e);
    }

    match Chain::with_storage(data_dir) {
        Ok(chain) => {
            info!("Loaded chain of {} blocks from {}", chain.len(), data_dir.display());
            Ok(chain)
        }
        Err(err) => {
            warn!("Failed to load chain from storage: {}", err);
            warn!("Creating in-memory chain instead");

            Chain::new().map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_address,
        api::handlers::add_peer,
        api::handlers::list_peers,
        api::handlers::submit_transaction,
        api::handlers::list_transactions,
        api::handlers::list_registered_transactions,
        api::handlers::start_mining,
        api::handlers::stop_mining,
        api::handlers::mining_status,
        api::handlers::accept_block,
        api::handlers::get_block,
        api::handlers::chain_length,
        api::handlers::last_block,
        api::handlers::get_chain,
        api::handlers::replace_chain,
        api::handlers::reconcile,
        api::handlers::validate_chain
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Payload,
            blockchain::MiningState,
            blockchain::MiningStatus,
            network::Reconciliation,
            api::schema::AddressResponse,
            api::schema::PeerRequest,
            api::schema::TransactionRequest,
            api::schema::StartMiningRequest,
            api::schema::StopMiningRequest,
            api::schema::AckResponse,
            api::schema::LengthResponse,
            api::schema::ChainResponse,
            api::schema::ReconcileResponse
        )
    ),
    tags(
        (name = "ledger", description = "Ledger node API endpoints")
    ),
    info(
        title = "Supply Ledger API",
        version = "1.0.0",
        description = "Proof-of-work ledger node for supply-chain custody records",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = NodeConfig::from_env().map_err(|e| {
        error!("Invalid configuration: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;

    let chain = initialize_chain(&config.data_dir)?;

    let connector = HttpConnector::new(config.peer_timeout)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    let listener = Arc::new(LogListener);
    let node = Arc::new(
        NetworkNode::new(config.public_url.clone(), chain, Arc::new(connector))
            .with_listener(listener.clone())
            .with_miner(MiningCoordinator::with_listener(config.mining_workers, listener)),
    );

    info!(
        "Starting node {} with {} mining worker(s)",
        node.address(),
        config.mining_workers
    );

    let node_data = web::Data::from(Arc::clone(&node));
    let server = HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Configure OpenAPI documentation
        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(node_data.clone())
            .app_data(web::JsonConfig::default().limit(16 * 1024 * 1024))
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind((config.host.as_str(), config.port))?
    .run();

    info!("Listening on http://{}:{}", config.host, config.port);

    // Bootstrap peers once the server accepts the callbacks they make
    let peers = config.peers.clone();
    actix_web::rt::spawn(async move {
        actix_web::rt::time::sleep(Duration::from_millis(500)).await;
        for peer in peers {
            match node.add_peer(&peer).await {
                Ok(_) => info!("Bootstrapped from peer {}", peer),
                Err(err) => warn!("Failed to bootstrap from peer {}: {}", peer, err),
            }
        }
    });

    server.await
}
