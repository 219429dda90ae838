//! Document structuring: PDF bytes to ordered, positioned text blocks.
//!
//! Native text comes from poppler word boxes; sparse or scanned documents
//! fall through to Tesseract OCR with the same word-box granularity, so
//! downstream extraction never cares which path produced a block.

mod layout;
mod poppler;
mod tesseract;

pub use tesseract::check_tools;

use std::path::Path;
use std::process::{ExitStatus, Output};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{BBox, DocumentStructure, TextBlock, TextMode};

/// Errors raised while structuring a document.
#[derive(Debug, Error)]
pub enum StructureError {
    /// The document could not be opened at all. Terminal; not retried.
    #[error("Cannot open document: {0}")]
    Unopenable(String),

    #[error("External tool not found: {0}")]
    ToolNotFound(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle command output, extracting stdout on success.
fn handle_cmd_output(
    result: std::io::Result<Output>,
    tool_name: &str,
) -> Result<String, StructureError> {
    match result {
        Ok(output) => {
            if output.status.success() {
                Ok(String::from_utf8_lossy(&output.stdout).to_string())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(StructureError::CommandFailed(stderr.trim().to_string()))
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StructureError::ToolNotFound(tool_name.to_string()))
        }
        Err(e) => Err(StructureError::Io(e)),
    }
}

/// Check command status, returning an error on failure.
fn check_cmd_status(
    result: std::io::Result<ExitStatus>,
    tool_name: &str,
) -> Result<(), StructureError> {
    match result {
        Ok(s) if s.success() => Ok(()),
        Ok(s) => Err(StructureError::CommandFailed(format!(
            "{} exited with {}",
            tool_name, s
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StructureError::ToolNotFound(tool_name.to_string()))
        }
        Err(e) => Err(StructureError::Io(e)),
    }
}

/// A single positioned word, the unit both extraction paths produce.
#[derive(Debug, Clone)]
pub struct Word {
    pub text: String,
    pub page_index: usize,
    pub bbox: BBox,
}

/// All words on one page plus the page dimensions in points.
#[derive(Debug, Clone)]
pub struct PageWords {
    pub width: f32,
    pub height: f32,
    pub words: Vec<Word>,
}

impl PageWords {
    fn char_count(&self) -> usize {
        self.words.iter().map(|w| w.text.chars().count()).sum()
    }
}

/// Builds a [`DocumentStructure`] from a PDF on disk.
pub struct DocumentStructurer {
    /// Vertical tolerance for line clustering, in points.
    y_tolerance: f32,
    /// Word count at or below which the document needs OCR.
    min_words: usize,
    /// Character count below which the document needs OCR.
    min_chars: usize,
    ocr_timeout: Duration,
    ocr_dpi: u32,
    ocr_lang: String,
}

impl Default for DocumentStructurer {
    fn default() -> Self {
        Self {
            y_tolerance: 3.0,
            min_words: 20,
            min_chars: 100,
            ocr_timeout: Duration::from_secs(120),
            ocr_dpi: 300,
            ocr_lang: "eng".to_string(),
        }
    }
}

impl DocumentStructurer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_y_tolerance(mut self, tolerance: f32) -> Self {
        self.y_tolerance = tolerance;
        self
    }

    pub fn with_ocr_timeout(mut self, timeout: Duration) -> Self {
        self.ocr_timeout = timeout;
        self
    }

    pub fn with_ocr_language(mut self, lang: &str) -> Self {
        self.ocr_lang = lang.to_string();
        self
    }

    /// Structure a PDF into ordered text blocks.
    ///
    /// OCR may block for tens of seconds, so it runs on the blocking pool
    /// under a timeout; a timeout falls back to whatever native text exists
    /// with `needs_ocr` kept set, rather than failing the run.
    pub async fn structure(&self, path: &Path) -> Result<DocumentStructure, StructureError> {
        let native_path = path.to_path_buf();
        let mut pages = tokio::task::spawn_blocking(move || poppler::extract_words(&native_path))
            .await
            .map_err(|e| StructureError::CommandFailed(format!("structuring task failed: {e}")))??;

        if pages.is_empty() {
            // No text layer at all; synthesize empty pages from pdfinfo.
            let count_path = path.to_path_buf();
            let count = tokio::task::spawn_blocking(move || poppler::page_count(&count_path))
                .await
                .ok()
                .flatten()
                .ok_or_else(|| {
                    StructureError::Unopenable("no pages could be read".to_string())
                })?;
            pages = (0..count)
                .map(|_| PageWords {
                    width: 612.0,
                    height: 792.0,
                    words: Vec::new(),
                })
                .collect();
        }

        let total_words: usize = pages.iter().map(|p| p.words.len()).sum();
        let total_chars: usize = pages.iter().map(|p| p.char_count()).sum();
        let empty_pages: Vec<usize> = pages
            .iter()
            .enumerate()
            .filter(|(_, p)| p.words.is_empty())
            .map(|(i, _)| i)
            .collect();

        let needs_ocr = total_words <= self.min_words || total_chars < self.min_chars;

        let (ocr_targets, intended_mode) = if needs_ocr {
            ((0..pages.len()).collect::<Vec<_>>(), TextMode::Ocr)
        } else if !empty_pages.is_empty() {
            (empty_pages, TextMode::Hybrid)
        } else {
            (Vec::new(), TextMode::Native)
        };

        let mut text_mode = TextMode::Native;
        if !ocr_targets.is_empty() {
            debug!(
                "OCR needed for {} of {} pages ({} words, {} chars native)",
                ocr_targets.len(),
                pages.len(),
                total_words,
                total_chars
            );
            match self.run_ocr(path, &ocr_targets, &pages).await {
                Some(ocr_pages) => {
                    merge_ocr_pages(&mut pages, &ocr_targets, ocr_pages);
                    text_mode = intended_mode;
                }
                // Recoverable: keep native text, leave needs_ocr set.
                None => warn!("OCR unavailable, keeping native text only"),
            }
        }

        Ok(build_structure(
            pages,
            text_mode,
            needs_ocr || intended_mode == TextMode::Hybrid,
            self.y_tolerance,
        ))
    }

    /// Run OCR for the given pages under the configured timeout.
    async fn run_ocr(
        &self,
        path: &Path,
        targets: &[usize],
        pages: &[PageWords],
    ) -> Option<Vec<PageWords>> {
        let ocr_path = path.to_path_buf();
        let ocr_targets = targets.to_vec();
        let sizes: Vec<(f32, f32)> = pages.iter().map(|p| (p.width, p.height)).collect();
        let dpi = self.ocr_dpi;
        let lang = self.ocr_lang.clone();

        let task = tokio::task::spawn_blocking(move || {
            tesseract::ocr_pages(&ocr_path, &ocr_targets, &sizes, dpi, &lang)
        });

        match tokio::time::timeout(self.ocr_timeout, task).await {
            Ok(Ok(Ok(ocr_pages))) => Some(ocr_pages),
            Ok(Ok(Err(err))) => {
                warn!("OCR failed: {}", err);
                None
            }
            Ok(Err(join_err)) => {
                warn!("OCR task failed: {}", join_err);
                None
            }
            Err(_) => {
                warn!("OCR timed out after {:?}", self.ocr_timeout);
                None
            }
        }
    }
}

/// Replace native page words with OCR results where OCR found more.
///
/// A page keeps its native words when they already carry at least as much
/// content; OCR never makes a page worse.
fn merge_ocr_pages(pages: &mut [PageWords], targets: &[usize], ocr_pages: Vec<PageWords>) {
    for (target, ocr_page) in targets.iter().zip(ocr_pages) {
        let Some(page) = pages.get_mut(*target) else {
            continue;
        };
        if ocr_page.char_count() > page.char_count() {
            page.words = ocr_page.words;
        }
    }
}

/// Assemble pages of words into the final immutable structure.
///
/// Pure; exercised directly by tests with synthetic word boxes.
pub fn build_structure(
    pages: Vec<PageWords>,
    text_mode: TextMode,
    needs_ocr: bool,
    y_tolerance: f32,
) -> DocumentStructure {
    let mut blocks: Vec<TextBlock> = Vec::new();
    let mut page_sizes = Vec::with_capacity(pages.len());

    for (page_index, page) in pages.iter().enumerate() {
        page_sizes.push((page.width, page.height));
        let lines = layout::cluster_lines(&page.words, y_tolerance);
        let raw = layout::assemble_blocks(lines, page.width);

        for (reading_order, block) in raw.into_iter().enumerate() {
            blocks.push(TextBlock {
                id: blocks.len(),
                text: block.text,
                page_index,
                bbox: block.bbox,
                reading_order,
                column_index: block.column_index,
                block_type: block.block_type,
            });
        }
    }

    let raw_text = blocks
        .iter()
        .map(|b| b.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    DocumentStructure {
        raw_text,
        page_count: pages.len(),
        page_sizes,
        blocks,
        text_mode,
        needs_ocr,
    }
}
