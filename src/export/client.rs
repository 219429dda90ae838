//! Freight-marketplace API client.
//!
//! Thin typed wrapper over the listing endpoints with conditional-request
//! support: listings carry ETags, updates send If-Match, and a 412 means
//! the stored ETag went stale. Retry *policy* lives in pure functions here
//! so the backoff schedule is testable without a live server.

use std::time::Duration;

use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::payload::ListingPayload;

/// Base delay for exponential backoff; attempts wait 2s, 4s, 8s.
const BACKOFF_BASE_SECS: u64 = 2;

/// Maximum submission attempts per export call.
pub const MAX_ATTEMPTS: u32 = 3;

/// Typed failures from the marketplace API.
#[derive(Debug, Error)]
pub enum ExportError {
    /// HTTP 429; holds the server's Retry-After when present.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// HTTP 5xx.
    #[error("server error ({status})")]
    ServerError { status: u16 },

    /// HTTP 412: our ETag went stale under us.
    #[error("listing changed upstream (stale ETag)")]
    ConflictStale,

    /// HTTP 401/403. Terminal; retrying cannot help.
    #[error("authentication rejected ({status})")]
    Auth { status: u16 },

    /// Any other non-success response.
    #[error("listing rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ExportError {
    /// Whether the retry policy may try this failure again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ServerError { .. } | Self::Transport(_)
        )
    }
}

/// Backoff delay for a (1-based) attempt number: 2s, 4s, 8s.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(BACKOFF_BASE_SECS << attempt.saturating_sub(1).min(8))
}

/// Decide whether to retry after a failed attempt, and how long to wait.
///
/// 429 honors Retry-After when present; 429 without the header and 5xx
/// and transport errors use exponential backoff. Returns None when the
/// error is terminal or the attempt budget is spent.
pub fn retry_delay(error: &ExportError, attempt: u32, max_attempts: u32) -> Option<Duration> {
    if attempt >= max_attempts || !error.is_retryable() {
        return None;
    }
    match error {
        ExportError::RateLimited {
            retry_after: Some(wait),
        } => Some(*wait),
        _ => Some(backoff_delay(attempt)),
    }
}

/// Receipt for a created or updated listing.
#[derive(Debug, Clone)]
pub struct ListingReceipt {
    pub listing_id: String,
    pub etag: Option<String>,
}

#[derive(Deserialize)]
struct ListingBody {
    id: String,
}

/// Client for the marketplace listing API.
#[derive(Clone)]
pub struct MarketplaceClient {
    http: Client,
    base_url: String,
    token: String,
}

impl MarketplaceClient {
    /// Create a new client.
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn parse_retry_after(response: &Response) -> Option<Duration> {
        response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    fn etag_of(response: &Response) -> Option<String> {
        response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    }

    /// Map a non-success response to a typed error.
    async fn classify_failure(response: Response) -> ExportError {
        let status = response.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS => ExportError::RateLimited {
                retry_after: Self::parse_retry_after(&response),
            },
            StatusCode::PRECONDITION_FAILED => ExportError::ConflictStale,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ExportError::Auth {
                status: status.as_u16(),
            },
            s if s.is_server_error() => ExportError::ServerError {
                status: status.as_u16(),
            },
            _ => {
                let body = response.text().await.unwrap_or_default();
                ExportError::Rejected {
                    status: status.as_u16(),
                    body: body.chars().take(500).collect(),
                }
            }
        }
    }

    async fn receipt_from(response: Response) -> Result<ListingReceipt, ExportError> {
        let etag = Self::etag_of(&response);
        let body: ListingBody = response.json().await?;
        Ok(ListingReceipt {
            listing_id: body.id,
            etag,
        })
    }

    /// Create a listing: `POST /listings`.
    pub async fn create_listing(
        &self,
        payload: &ListingPayload,
    ) -> Result<ListingReceipt, ExportError> {
        debug!("POST /listings for {}", payload.external_reference);
        let response = self
            .http
            .post(self.url("/listings"))
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await?;

        if response.status().is_success() {
            Self::receipt_from(response).await
        } else {
            Err(Self::classify_failure(response).await)
        }
    }

    /// Update a listing: `PUT /listings/{id}` with `If-Match`.
    pub async fn update_listing(
        &self,
        listing_id: &str,
        etag: &str,
        payload: &ListingPayload,
    ) -> Result<ListingReceipt, ExportError> {
        debug!("PUT /listings/{} (If-Match {})", listing_id, etag);
        let response = self
            .http
            .put(self.url(&format!("/listings/{}", listing_id)))
            .bearer_auth(&self.token)
            .header(header::IF_MATCH, etag)
            .json(payload)
            .send()
            .await?;

        if response.status().is_success() {
            Self::receipt_from(response).await
        } else {
            Err(Self::classify_failure(response).await)
        }
    }

    /// Fetch the current ETag for a listing: `GET /listings/{id}`.
    pub async fn fetch_etag(&self, listing_id: &str) -> Result<String, ExportError> {
        let response = self
            .http
            .get(self.url(&format!("/listings/{}", listing_id)))
            .bearer_auth(&self.token)
            .send()
            .await?;

        if response.status().is_success() {
            Self::etag_of(&response).ok_or(ExportError::Rejected {
                status: response.status().as_u16(),
                body: "listing response carried no ETag".to_string(),
            })
        } else {
            Err(Self::classify_failure(response).await)
        }
    }
}
