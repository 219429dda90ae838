//! Export submission with bounded concurrency and status-aware retries.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::models::{DispatchRecord, RowStatus};
use crate::repository::{DispatchRepository, RepositoryError};

use super::client::{retry_delay, ExportError, ListingReceipt, MarketplaceClient, MAX_ATTEMPTS};
use super::payload::build_payload;
use super::validate::{validate_ready, ValidationError};

/// Errors surfaced by an export call.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Validation failed; the record was moved to ERROR.
    #[error("validation failed: {0:?}")]
    Validation(Vec<ValidationError>),

    /// Terminal API failure; the record was moved to ERROR.
    #[error(transparent)]
    Api(ExportError),

    /// The record left READY/RETRY while the export was in flight.
    #[error("export cancelled: record is {0}")]
    Cancelled(&'static str),

    /// The record was not in an exportable state to begin with.
    #[error("record is {0}, not READY or RETRY")]
    NotExportable(&'static str),
}

/// Submits READY records to the marketplace.
///
/// The semaphore is process-wide: every export call in the process shares
/// one pool of permits so the external API's rate limits are respected no
/// matter how many records go out at once.
pub struct ExportService {
    client: MarketplaceClient,
    repo: Arc<DispatchRepository>,
    semaphore: Arc<Semaphore>,
}

impl ExportService {
    pub fn new(client: MarketplaceClient, repo: Arc<DispatchRepository>, concurrency: usize) -> Self {
        Self {
            client,
            repo,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Export one record. Success transitions it to EXPORTED and stores
    /// the returned listing id and ETag; failure transitions to ERROR and
    /// leaves everything else untouched so the record can be retried.
    pub async fn export_record(&self, dispatch_id: &str) -> Result<DispatchRecord, SubmitError> {
        let record = self.repo.get_required(dispatch_id)?;
        if !record.row_status.is_exportable() {
            return Err(SubmitError::NotExportable(record.row_status.as_str()));
        }

        let errors = validate_ready(&record);
        if !errors.is_empty() {
            warn!(
                "dispatch {} failed validation with {} error(s)",
                dispatch_id,
                errors.len()
            );
            self.repo.update_status(dispatch_id, RowStatus::Error)?;
            return Err(SubmitError::Validation(errors));
        }

        let payload = build_payload(&record);

        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("export semaphore closed");

        let mut stale_retried = false;
        let mut attempt: u32 = 1;

        loop {
            // Cancellation check: an operator may have pulled the record
            // while we waited for a permit or a backoff.
            let current = self.repo.get_required(dispatch_id)?;
            if !current.row_status.is_exportable() {
                info!(
                    "dispatch {} left exportable state ({}), aborting",
                    dispatch_id,
                    current.row_status.as_str()
                );
                return Err(SubmitError::Cancelled(current.row_status.as_str()));
            }

            let result = self.submit_once(&current, &payload).await;

            match result {
                Ok(receipt) => {
                    self.repo.record_export(
                        dispatch_id,
                        &receipt.listing_id,
                        receipt.etag.as_deref(),
                    )?;
                    let record = self.repo.update_status(dispatch_id, RowStatus::Exported)?;
                    info!(
                        "dispatch {} exported as listing {}",
                        dispatch_id, receipt.listing_id
                    );
                    return Ok(record);
                }
                // Optimistic concurrency: refresh the ETag and retry the
                // write exactly once.
                Err(ExportError::ConflictStale) if !stale_retried => {
                    stale_retried = true;
                    let listing_id = current
                        .external_listing_id
                        .clone()
                        .unwrap_or_default();
                    warn!(
                        "dispatch {}: stale ETag on listing {}, refreshing",
                        dispatch_id, listing_id
                    );
                    match self.client.fetch_etag(&listing_id).await {
                        Ok(etag) => {
                            self.repo.record_export(dispatch_id, &listing_id, Some(&etag))?;
                            continue;
                        }
                        Err(err) => {
                            self.repo.update_status(dispatch_id, RowStatus::Error)?;
                            return Err(SubmitError::Api(err));
                        }
                    }
                }
                Err(err) => match retry_delay(&err, attempt, MAX_ATTEMPTS) {
                    Some(delay) => {
                        warn!(
                            "dispatch {} attempt {}/{} failed ({}), retrying in {:?}",
                            dispatch_id, attempt, MAX_ATTEMPTS, err, delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        warn!("dispatch {} export failed: {}", dispatch_id, err);
                        self.repo.update_status(dispatch_id, RowStatus::Error)?;
                        return Err(SubmitError::Api(err));
                    }
                },
            }
        }
    }

    async fn submit_once(
        &self,
        record: &DispatchRecord,
        payload: &super::payload::ListingPayload,
    ) -> Result<ListingReceipt, ExportError> {
        match (&record.external_listing_id, &record.export_etag) {
            // Already on the marketplace: conditional update.
            (Some(listing_id), Some(etag)) => {
                self.client.update_listing(listing_id, etag, payload).await
            }
            _ => self.client.create_listing(payload).await,
        }
    }

    /// Export every READY and RETRY record, up to the concurrency cap.
    ///
    /// Individual failures are collected, not propagated; one bad record
    /// never blocks the rest of the queue.
    pub async fn export_all(&self) -> Vec<(String, Result<DispatchRecord, SubmitError>)> {
        let mut candidates = match self.repo.list(Some(RowStatus::Ready)) {
            Ok(records) => records,
            Err(err) => {
                warn!("could not list READY records: {}", err);
                return Vec::new();
            }
        };
        if let Ok(retries) = self.repo.list(Some(RowStatus::Retry)) {
            candidates.extend(retries);
        }

        let futures = candidates.into_iter().map(|record| {
            let id = record.dispatch_id.clone();
            async move {
                let result = self.export_record(&id).await;
                (id, result)
            }
        });

        futures::future::join_all(futures).await
    }
}
