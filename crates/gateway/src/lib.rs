pub mod config;
pub mod decoder;
pub mod errors;
pub mod handler;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod normalizer;
pub mod routes;
pub mod schema;
pub mod state;
