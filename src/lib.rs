//! Portfolio media service: image ingestion (compress, validate, store,
//! record), project association and the small admin/public API around it.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
