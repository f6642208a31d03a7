pub mod config;
pub mod csv_import;
pub mod engine;
pub mod error;
pub mod http;
pub mod repository;

pub use http::state::AppState;
