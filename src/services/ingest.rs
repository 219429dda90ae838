//! Ingest service: the full pipeline for one document.
//!
//! Structure, classify, extract, reconcile. Each run owns its document
//! structure and field map, so any number of documents can ingest
//! concurrently; only same-identity upserts serialize, inside the
//! reconciler.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::info;

use crate::classifier::classify;
use crate::extract::{extract_fields, FieldDiagnostic};
use crate::models::{content_hash, derive_identity_hash, keys, TextMode};
use crate::profiles::ProfileStore;
use crate::reconcile::{ReconcileError, Reconciler, UpsertAction, UpsertReport};
use crate::structurer::{DocumentStructurer, StructureError};

/// Errors that abort one document's ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Structure(#[from] StructureError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Summary of one ingested document.
#[derive(Debug)]
pub struct IngestOutcome {
    pub dispatch_id: String,
    pub action: UpsertAction,
    pub auction_type: String,
    pub classification_confidence: f32,
    pub needs_classification: bool,
    pub text_mode: TextMode,
    pub page_count: usize,
    pub block_count: usize,
    /// Fields extraction produced a non-empty value for.
    pub extracted_fields: usize,
    pub report: UpsertReport,
    pub diagnostics: Vec<FieldDiagnostic>,
}

/// Runs the ingestion pipeline.
pub struct IngestService {
    structurer: DocumentStructurer,
    profiles: ProfileStore,
    reconciler: Arc<Reconciler>,
}

impl IngestService {
    pub fn new(
        structurer: DocumentStructurer,
        profiles: ProfileStore,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            structurer,
            profiles,
            reconciler,
        }
    }

    /// Ingest one PDF into its canonical dispatch record.
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestOutcome, IngestError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| IngestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let doc_hash = content_hash(&bytes);

        let doc = self.structurer.structure(path).await?;
        info!(
            "structured {}: {} page(s), {} block(s), {} text",
            path.display(),
            doc.page_count,
            doc.blocks.len(),
            doc.text_mode.as_str()
        );

        let classification = classify(&doc.raw_text, self.profiles.all());
        let profile = if classification.needs_classification {
            self.profiles.generic()
        } else {
            self.profiles
                .get(&classification.auction_type)
                .unwrap_or_else(|| self.profiles.generic())
        };

        let outcome = extract_fields(&doc, profile, keys::ALL);

        let identity_hash = derive_identity_hash(
            outcome.value(keys::GATE_PASS_CODE),
            outcome.value(keys::AUCTION_REFERENCE),
            outcome.value(keys::VEHICLE_VIN),
            &doc_hash,
        );

        let extracted_fields = outcome
            .fields
            .values()
            .filter(|f| !f.is_empty())
            .count();

        let (record, report) = self
            .reconciler
            .upsert(
                &classification.auction_type,
                &identity_hash,
                outcome.fields,
                classification.needs_classification,
            )
            .await?;

        Ok(IngestOutcome {
            dispatch_id: record.dispatch_id,
            action: report.action,
            auction_type: classification.auction_type,
            classification_confidence: classification.confidence,
            needs_classification: classification.needs_classification,
            text_mode: doc.text_mode,
            page_count: doc.page_count,
            block_count: doc.blocks.len(),
            extracted_fields,
            report,
            diagnostics: outcome.diagnostics,
        })
    }

    /// Ingest a batch of PDFs with bounded parallelism.
    ///
    /// Per-file failures come back alongside successes; one unreadable
    /// document never stops the batch.
    pub async fn ingest_batch(
        &self,
        paths: Vec<PathBuf>,
        workers: usize,
    ) -> Vec<(PathBuf, Result<IngestOutcome, IngestError>)> {
        stream::iter(paths)
            .map(|path| async move {
                let result = self.ingest_file(&path).await;
                (path, result)
            })
            .buffer_unordered(workers.max(1))
            .collect()
            .await
    }
}

/// PDF files directly inside a directory, sorted for stable batch order.
pub fn pdf_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"x").unwrap();
        std::fs::write(dir.path().join("a.PDF"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let files = pdf_files(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].file_name().unwrap().eq_ignore_ascii_case("a.pdf"));
    }
}
