// API module
//
// This module maps the ledger operations onto HTTP routes

pub mod handlers;
pub mod routes;
pub mod schema;

// Re-export main components for easier access
pub use routes::configure_routes;
