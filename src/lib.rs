pub mod accounts;
pub mod categories;
pub mod config;
pub mod error;
pub mod inference;
pub mod jobs;
pub mod orchestrator;
pub mod routes;
pub mod schema;
pub mod stats;
pub mod stream;
pub mod transactions;
pub mod users;
