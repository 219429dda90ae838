//! OCR word extraction via pdftoppm and Tesseract TSV output.
//!
//! Pages are rendered at a fixed DPI, OCR'd with `tesseract ... tsv`, and
//! the word-level rows (level 5) are scaled from pixels back to page
//! points so OCR'd documents carry the same coordinate system as native
//! ones and evidence highlighting works identically for both.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;
use tracing::warn;

use crate::models::BBox;

use super::{check_cmd_status, handle_cmd_output, PageWords, StructureError, Word};

/// TSV row level that carries individual words.
const WORD_LEVEL: u32 = 5;

/// Find the image pdftoppm generated for a page.
///
/// pdftoppm pads page numbers to a document-dependent width
/// (page-01.png, page-001.png, ...), so probe the plausible widths.
fn find_page_image(dir: &Path, page_num: usize) -> Option<PathBuf> {
    for digits in [1, 2, 3, 4] {
        let filename = format!("page-{:0width$}.png", page_num, width = digits);
        let path = dir.join(&filename);
        if path.exists() {
            return Some(path);
        }
    }
    None
}

/// Parse Tesseract TSV output into words, scaling pixels to points.
pub fn parse_tsv(tsv: &str, page_index: usize, dpi: u32) -> Vec<Word> {
    let scale = 72.0 / dpi as f32;
    let mut words = Vec::new();

    for line in tsv.lines().skip(1) {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let level: u32 = match cols[0].parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        if level != WORD_LEVEL {
            continue;
        }
        let conf: f32 = cols[10].parse().unwrap_or(-1.0);
        let text = cols[11].trim();
        if conf < 0.0 || text.is_empty() {
            continue;
        }

        let left: f32 = cols[6].parse().unwrap_or(0.0);
        let top: f32 = cols[7].parse().unwrap_or(0.0);
        let width: f32 = cols[8].parse().unwrap_or(0.0);
        let height: f32 = cols[9].parse().unwrap_or(0.0);
        if width <= 0.0 || height <= 0.0 {
            continue;
        }

        words.push(Word {
            text: text.to_string(),
            page_index,
            bbox: BBox::new(
                left * scale,
                top * scale,
                (left + width) * scale,
                (top + height) * scale,
            ),
        });
    }

    words
}

fn run_tesseract_tsv(image: &Path, lang: &str) -> Result<String, StructureError> {
    let output = Command::new("tesseract")
        .arg(image)
        .arg("stdout")
        .args(["-l", lang, "tsv"])
        .output();

    handle_cmd_output(output, "tesseract (install tesseract-ocr)")
}

/// OCR the given pages of a PDF, producing per-word boxes in points.
///
/// `page_sizes` supplies the known page dimensions so OCR'd pages keep
/// them; pages the renderer or OCR fail on come back empty with a warning
/// rather than failing the document.
pub fn ocr_pages(
    path: &Path,
    pages: &[usize],
    page_sizes: &[(f32, f32)],
    dpi: u32,
    lang: &str,
) -> Result<Vec<PageWords>, StructureError> {
    if pages.is_empty() {
        return Ok(Vec::new());
    }

    let temp_dir = TempDir::new()?;
    let temp_path = temp_dir.path();

    let first = pages.iter().min().unwrap() + 1;
    let last = pages.iter().max().unwrap() + 1;

    let status = Command::new("pdftoppm")
        .args(["-png", "-r", &dpi.to_string()])
        .args(["-f", &first.to_string(), "-l", &last.to_string()])
        .arg(path)
        .arg(temp_path.join("page"))
        .status();

    check_cmd_status(status, "pdftoppm (install poppler-utils)")?;

    let mut result = Vec::with_capacity(pages.len());
    for &page_index in pages {
        let (width, height) = page_sizes
            .get(page_index)
            .copied()
            .unwrap_or((612.0, 792.0));

        let words = match find_page_image(temp_path, page_index + 1) {
            Some(image) => match run_tesseract_tsv(&image, lang) {
                Ok(tsv) => parse_tsv(&tsv, page_index, dpi),
                Err(err) => {
                    warn!("OCR failed for page {}: {}", page_index + 1, err);
                    Vec::new()
                }
            },
            None => {
                warn!("no rendered image for page {}", page_index + 1);
                Vec::new()
            }
        };

        result.push(PageWords {
            width,
            height,
            words,
        });
    }

    Ok(result)
}

/// Check whether the external document tools are available.
pub fn check_tools() -> Vec<(String, bool)> {
    ["pdftotext", "pdftoppm", "pdfinfo", "tesseract"]
        .iter()
        .map(|tool| (tool.to_string(), which::which(tool).is_ok()))
        .collect()
}
