//! Transport abstraction for the Sync API.
//!
//! Provides a trait-based transport layer that enables:
//! - HTTP delivery against a project service
//! - Scripted doubles for testing the scheduler

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::StatusCode;
use sitesync_engine::{SyncRequest, SyncResponse};

/// Error type for transport operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No response within the batch deadline.
    #[error("request timed out")]
    Timeout,

    /// The request never reached the server.
    #[error("network error: {0}")]
    Network(String),

    /// The server refused the session token.
    #[error("unauthorized")]
    Unauthorized,

    /// The server answered with a non-success status.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl TransportError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TransportError::Unauthorized)
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Boxed future returned by transport calls.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = TransportResult<T>> + Send + 'a>>;

/// Delivery of sync batches to the project service.
pub trait Transport: Send + Sync {
    /// Submit one batch and wait for per-item results.
    fn submit(&self, request: SyncRequest) -> TransportFuture<'_, SyncResponse>;

    /// Cheap reachability check.
    fn probe(&self) -> TransportFuture<'_, ()>;
}

/// HTTP transport using reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for `base_url` (e.g. `http://localhost:3000`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn map_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_decode() {
        TransportError::Decode(e.to_string())
    } else {
        TransportError::Network(e.to_string())
    }
}

impl Transport for HttpTransport {
    fn submit(&self, request: SyncRequest) -> TransportFuture<'_, SyncResponse> {
        Box::pin(async move {
            let mut builder = self.client.post(self.url("/sync")).json(&request);
            if let Some(token) = &request.session_token {
                builder = builder.bearer_auth(token);
            }

            let response = builder.send().await.map_err(map_reqwest)?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(TransportError::Unauthorized);
            }
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(TransportError::Server {
                    status: status.as_u16(),
                    message,
                });
            }

            response.json::<SyncResponse>().await.map_err(map_reqwest)
        })
    }

    fn probe(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.url("/health"))
                .send()
                .await
                .map_err(map_reqwest)?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(TransportError::Server {
                    status: response.status().as_u16(),
                    message: "health check failed".to_string(),
                })
            }
        })
    }
}
