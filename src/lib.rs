// Library crate for integration tests.
// main.rs has its own mod declarations; this re-exports all modules.

pub mod cache;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod records;
pub mod routes;
pub mod server;
pub mod state;
pub mod tracking;
pub mod upstream;
