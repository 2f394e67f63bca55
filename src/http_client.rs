// HTTP request pipeline
//
// Every outgoing call gets the current credential attached before it is
// sent. A failed response is classified once: most cases surface to the
// caller untouched, only a refreshable 401 enters the coordinator, and a
// request is replayed at most once per instance.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, RequestBuilder, Response};

use crate::auth::{
    CredentialStore, KeyValueStore, Navigator, RefreshCoordinator, SessionGuard,
};
use crate::config::ClientConfig;
use crate::endpoints::EndpointClassifier;
use crate::error::{ClientError, Result};

/// One delivery attempt of a request. `retried` marks a request that has
/// already been through a refresh cycle; such a request is never queued
/// again, whatever the backend answers.
struct Attempt {
    request: Request,
    retried: bool,
}

/// What to do with a failed response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Surface the failure to the caller unchanged
    Propagate,
    /// Surface the failure and end the session (401 with nothing stored)
    PropagateAndTeardown,
    /// Enter the refresh coordinator and replay once
    Refresh,
}

/// HTTP client for the storefront API with transparent credential refresh
pub struct StorefrontClient {
    /// Wrapped transport for ordinary calls
    http: Client,

    config: Arc<ClientConfig>,

    /// Path prefix of the base URL, stripped before endpoint
    /// classification so allow-list prefixes match API paths
    base_path: String,
    credentials: CredentialStore,
    classifier: EndpointClassifier,
    coordinator: RefreshCoordinator,
    session: SessionGuard,
}

impl StorefrontClient {
    pub fn new(
        config: ClientConfig,
        kv: Arc<dyn KeyValueStore>,
        navigator: Arc<dyn Navigator>,
    ) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let credentials = CredentialStore::new(kv.clone(), &config.credential_key);
        let classifier = EndpointClassifier::new(config.public_prefixes.clone());

        let base_path = reqwest::Url::parse(&config.base_url)
            .context("Invalid base URL")?
            .path()
            .trim_end_matches('/')
            .to_string();

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        let coordinator = RefreshCoordinator::new(
            config.refresh_url(),
            credentials.clone(),
            Duration::from_secs(config.refresh_timeout),
        )?;

        let session = SessionGuard::new(credentials.clone(), kv, navigator, config.clone());

        Ok(Self {
            http,
            config,
            base_path,
            credentials,
            classifier,
            coordinator,
            session,
        })
    }

    /// Build a request against the configured backend. The returned builder
    /// must be handed back to [`send`](Self::send); executing it directly
    /// bypasses the pipeline.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.config.api_url(path))
    }

    /// GET an API path through the pipeline
    pub async fn get(&self, path: &str) -> Result<Response> {
        let request = self.request(Method::GET, path).build()?;
        self.send(request).await
    }

    /// POST a JSON body to an API path through the pipeline
    pub async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Response> {
        let request = self.request(Method::POST, path).json(body).build()?;
        self.send(request).await
    }

    /// Send a request through the full pipeline. This is the only entry
    /// point callers use; a successful refresh is invisible beyond added
    /// latency on the first failing request of a batch.
    pub async fn send(&self, request: Request) -> Result<Response> {
        let path = self.api_path(request.url().path());
        let mut attempt = Attempt {
            request,
            retried: false,
        };

        loop {
            // Capture a replayable copy before the attempt consumes the
            // request. Streaming bodies cannot be cloned and simply skip
            // the refresh path.
            let replay = attempt.request.try_clone();

            let error = match self.dispatch(attempt.request).await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            match self.classify(&error, &path, attempt.retried) {
                Disposition::Propagate => return Err(error),
                Disposition::PropagateAndTeardown => {
                    self.session.teardown();
                    return Err(error);
                }
                Disposition::Refresh => {
                    let Some(request) = replay else {
                        tracing::warn!(
                            path = %path,
                            "Request body is not replayable, surfacing original failure"
                        );
                        return Err(error);
                    };

                    match self.coordinator.request_refresh().await {
                        Some(_) => {
                            tracing::debug!(
                                path = %path,
                                "Replaying request with refreshed credential"
                            );
                            attempt = Attempt {
                                request,
                                retried: true,
                            };
                        }
                        None => {
                            // The caller sees their own request's failure,
                            // never the refresh call's error
                            self.session.teardown();
                            return Err(error);
                        }
                    }
                }
            }
        }
    }

    /// One attempt: attach the stored credential and execute on the
    /// wrapped transport. Non-success statuses become errors so the
    /// decision table sees every failed response.
    async fn dispatch(&self, mut request: Request) -> Result<Response> {
        if let Some(credential) = self.credentials.get() {
            let value = HeaderValue::from_str(&format!("Bearer {credential}"))
                .map_err(|e| ClientError::Internal(anyhow!("Credential is not a valid header value: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let method = request.method().clone();
        let url = request.url().clone();
        tracing::debug!(method = %method, url = %url, "Sending HTTP request");

        let response = self.http.execute(request).await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        tracing::debug!(status = %status, url = %url, "Received error response");
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Upstream {
            status: status.as_u16(),
            body,
        })
    }

    /// Request path relative to the configured base URL
    fn api_path(&self, path: &str) -> String {
        path.strip_prefix(&self.base_path).unwrap_or(path).to_string()
    }

    /// Decision table for a failed response, evaluated once per attempt
    fn classify(&self, error: &ClientError, path: &str, retried: bool) -> Disposition {
        // Anything that is not a 401 response, including transport errors
        // without a response, is none of our business
        if !error.is_auth_failure() {
            return Disposition::Propagate;
        }

        // A 401 on a public path is never evidence of a stale credential
        if self.classifier.is_public(path) {
            return Disposition::Propagate;
        }

        // One refresh cycle per request instance. A request that already
        // carries a refreshed credential and is still rejected would loop
        // forever otherwise.
        if retried {
            return Disposition::Propagate;
        }

        // Nothing stored means nothing to refresh; the session is gone
        if self.credentials.get().is_none() {
            return Disposition::PropagateAndTeardown;
        }

        Disposition::Refresh
    }
}
