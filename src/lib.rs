pub mod config;
pub mod error;
pub mod fixtures;
pub mod gateway;
pub mod models;
pub mod routes;
pub mod state;
pub mod voice;
