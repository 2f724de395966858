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
            .route("/status", web::get().to(handlers::get_status))
            .route("/blocks", web::post().to(handlers::append_block))
            .route("/validate", web::get().to(handlers::validate_chain))
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/blocks/{index}", web::get().to(handlers::get_block))
            .route("/blocks/{index}/corrupt", web::post().to(handlers::corrupt_block))
            .route("/repair", web::post().to(handlers::repair_chain))
    );
}
