// Endpoint classifier
// Fixed allow-list of path prefixes reachable without authentication.
// A 401 on one of these paths is never evidence of a stale credential,
// so the refresh flow must stay out of the way entirely.

/// Path prefixes served without a credential
pub const DEFAULT_PUBLIC_PREFIXES: &[&str] = &[
    "/products",
    "/categories",
    "/search",
    "/reviews/public",
];

/// Stateless matcher over the configured public prefixes
#[derive(Debug, Clone)]
pub struct EndpointClassifier {
    prefixes: Vec<String>,
}

impl EndpointClassifier {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }

    /// True when the path is reachable without authentication.
    /// Query strings are ignored; only the path is matched.
    pub fn is_public(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        self.prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

impl Default for EndpointClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_PUBLIC_PREFIXES
                .iter()
                .map(|prefix| prefix.to_string())
                .collect(),
        )
    }
}
