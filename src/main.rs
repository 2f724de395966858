use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::{error, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod blockchain;
mod config;

use config::Config;

// Build the ledger, from storage when a data directory is configured
//
// A configured store that cannot be opened or read is fatal.
fn initialize_ledger(config: &Config) -> anyhow::Result<blockchain::Ledger> {
    info!("Initializing ledger (genesis difficulty {})", config.mining.genesis_difficulty);

    if let Some(data_dir) = &config.data_dir {
        // Create data directory if it doesn't exist
        std::fs::create_dir_all(data_dir).with_context(|| {
            format!("failed to create data directory {}", data_dir.display())
        })?;

        let ledger = blockchain::Ledger::with_storage(data_dir, config.mining.clone())
            .with_context(|| format!("failed to load ledger from {}", data_dir.display()))?;
        info!("Loaded ledger from storage at {}", data_dir.display());
        return Ok(ledger);
    }

    warn!("LEDGER_DATA_DIR not set, ledger will be kept in memory only");
    blockchain::Ledger::new(config.mining.clone()).context("failed to mine genesis block")
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_status,
        api::handlers::append_block,
        api::handlers::validate_chain,
        api::handlers::get_chain,
        api::handlers::get_block,
        api::handlers::corrupt_block,
        api::handlers::repair_chain
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::StatusReport,
            blockchain::RepairReport,
            blockchain::Violation,
            blockchain::ViolationKind,
            api::schema::ErrorResponse,
            api::handlers::ChainResponse,
            api::handlers::AppendRequest,
            api::handlers::AppendResponse,
            api::handlers::ValidateResponse,
            api::handlers::CorruptRequest,
            api::handlers::CorruptResponse,
            api::handlers::RepairResponse
        )
    ),
    tags(
        (name = "ledger", description = "Proof-of-work ledger API endpoints")
    ),
    info(
        title = "Ledger API",
        version = "1.0.0",
        description = "A tamper-evident proof-of-work ledger",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // The whole integrity model rests on the hash primitive
    if let Err(err) = blockchain::digest::self_test() {
        error!("{}", err);
        return Err(err.into());
    }

    let config = Config::from_env().context("invalid configuration")?;
    let ledger = web::Data::new(initialize_ledger(&config)?);

    info!("Starting HTTP server at http://{}:{}", config.host, config.port);

    // Start HTTP server
    HttpServer::new(move || {
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
            .app_data(ledger.clone())
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}
