pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod realtime;
pub mod reports;
pub mod routes;
pub mod schema;
pub mod state;
pub mod storage;
pub mod utils;
