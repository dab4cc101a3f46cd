use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/address", web::get().to(handlers::get_address))
            .route("/peers", web::get().to(handlers::list_peers))
            .route("/peers", web::post().to(handlers::add_peer))
            .route("/transactions", web::get().to(handlers::list_transactions))
            .route("/transactions", web::post().to(handlers::submit_transaction))
            .route(
                "/transactions/registered",
                web::get().to(handlers::list_registered_transactions),
            )
            .route("/mining/start", web::post().to(handlers::start_mining))
            .route("/mining/stop", web::post().to(handlers::stop_mining))
            .route("/mining/status", web::get().to(handlers::mining_status))
            .route("/blocks", web::post().to(handlers::accept_block))
            .route("/blocks/{index}", web::get().to(handlers::get_block))
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/chain", web::put().to(handlers::replace_chain))
            .route("/chain/length", web::get().to(handlers::chain_length))
            .route("/chain/last", web::get().to(handlers::last_block))
            .route("/reconcile", web::post().to(handlers::reconcile))
            .route("/validate", web::get().to(handlers::validate_chain)),
    );
}
