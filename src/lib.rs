// Storefront client - library root

pub mod auth;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod http_client;

pub use config::ClientConfig;
pub use error::ClientError;
pub use http_client::StorefrontClient;
