//! Native PDF word extraction via poppler's pdftotext.
//!
//! `pdftotext -bbox` emits an XHTML word list with per-word coordinates in
//! page points, which is exactly the granularity line clustering needs.
//! Page count falls back to pdfinfo for documents with no text layer.

use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::BBox;

use super::{handle_cmd_output, PageWords, StructureError, Word};

static PAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<page\s+width="([\d.]+)"\s+height="([\d.]+)""#).unwrap()
});

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"<word\s+xMin="(-?[\d.]+)"\s+yMin="(-?[\d.]+)"\s+xMax="(-?[\d.]+)"\s+yMax="(-?[\d.]+)">(.*?)</word>"#,
    )
    .unwrap()
});

/// Undo the XML escaping pdftotext applies to word text.
fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Parse the XHTML produced by `pdftotext -bbox`.
pub fn parse_bbox_output(xml: &str) -> Vec<PageWords> {
    let mut pages: Vec<PageWords> = Vec::new();

    for line in xml.lines() {
        if let Some(caps) = PAGE_RE.captures(line) {
            let width: f32 = caps[1].parse().unwrap_or(0.0);
            let height: f32 = caps[2].parse().unwrap_or(0.0);
            pages.push(PageWords {
                width,
                height,
                words: Vec::new(),
            });
            continue;
        }

        if let Some(caps) = WORD_RE.captures(line) {
            let page_index = pages.len() - 1;
            let Some(page) = pages.last_mut() else {
                continue;
            };
            let x0: f32 = caps[1].parse().unwrap_or(0.0);
            let y0: f32 = caps[2].parse().unwrap_or(0.0);
            let x1: f32 = caps[3].parse().unwrap_or(0.0);
            let y1: f32 = caps[4].parse().unwrap_or(0.0);
            let text = unescape(&caps[5]);
            if text.trim().is_empty() {
                continue;
            }
            page.words.push(Word {
                text,
                page_index,
                bbox: BBox::new(x0, y0, x1, y1),
            });
        }
    }

    pages
}

/// Extract per-word boxes for every page of a PDF.
///
/// An unreadable document surfaces as [`StructureError::Unopenable`], the
/// terminal ingest failure; a missing binary as `ToolNotFound`.
pub fn extract_words(path: &Path) -> Result<Vec<PageWords>, StructureError> {
    let output = Command::new("pdftotext")
        .args(["-bbox", "-enc", "UTF-8"])
        .arg(path)
        .arg("-")
        .output();

    let xml = handle_cmd_output(output, "pdftotext (install poppler-utils)").map_err(|err| {
        match err {
            StructureError::CommandFailed(msg) => StructureError::Unopenable(msg),
            other => other,
        }
    })?;

    Ok(parse_bbox_output(&xml))
}

/// Page count via pdfinfo, for PDFs whose bbox output comes back empty.
pub fn page_count(path: &Path) -> Option<usize> {
    let output = Command::new("pdfinfo").arg(path).output().ok()?;
    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        if line.starts_with("Pages:") {
            return line.split_whitespace().nth(1).and_then(|s| s.parse().ok());
        }
    }
    None
}
