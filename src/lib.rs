// Library exports for Dreamscape
// This allows integration tests and external code to use Dreamscape modules

pub mod analysis;
pub mod articles;
pub mod auth;
pub mod community;
pub mod config;
pub mod db;
pub mod detail;
pub mod engagement;
pub mod error;
pub mod extractors;
pub mod images;
pub mod routes;
pub mod state;
pub mod store;
