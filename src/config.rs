// Client configuration

use serde::Deserialize;

use crate::endpoints::DEFAULT_PUBLIC_PREFIXES;

/// Configuration for the storefront client
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the backend API
    pub base_url: String,

    /// Path of the credential refresh endpoint, relative to `base_url`
    pub refresh_path: String,

    /// Login entry point of the application
    pub login_path: String,

    /// Registration entry point of the application
    pub register_path: String,

    /// Path prefixes reachable without authentication
    pub public_prefixes: Vec<String>,

    /// Storage key holding the access credential
    pub credential_key: String,

    /// Storage key holding the post-login return path
    pub return_path_key: String,

    /// Connect timeout for ordinary requests, in seconds
    pub connect_timeout: u64,

    /// Request timeout for ordinary requests, in seconds
    pub request_timeout: u64,

    /// Timeout for the dedicated refresh call, in seconds.
    /// A refresh that times out counts as a failed refresh.
    pub refresh_timeout: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            login_path: "/login".to_string(),
            register_path: "/register".to_string(),
            public_prefixes: DEFAULT_PUBLIC_PREFIXES
                .iter()
                .map(|prefix| prefix.to_string())
                .collect(),
            credential_key: "access_token".to_string(),
            return_path_key: "return_path".to_string(),
            connect_timeout: 10,
            request_timeout: 30,
            refresh_timeout: 15,
        }
    }
}

impl ClientConfig {
    /// Absolute URL of the refresh endpoint
    pub fn refresh_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.refresh_path)
    }

    /// Absolute URL for an API path
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}
