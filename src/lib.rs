pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod models;
pub mod observability;
pub mod route;
pub mod state;
pub mod store;
pub mod tracking;
