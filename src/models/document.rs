//! Structured document models.
//!
//! A [`DocumentStructure`] is produced once per ingested document version
//! and never mutated afterwards. Extracted fields reference blocks by id,
//! so evidence highlighting keeps working across extraction runs.

use serde::{Deserialize, Serialize};

/// How the document text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMode {
    /// Native PDF text layer.
    Native,
    /// Full-document OCR.
    Ocr,
    /// Native text with OCR applied to empty pages only.
    Hybrid,
}

impl TextMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Ocr => "ocr",
            Self::Hybrid => "hybrid",
        }
    }
}

/// Coarse classification of a text block's role on the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    /// Running text.
    Paragraph,
    /// Short line that looks like a field label ("Buyer:", "GATE PASS").
    LabelCandidate,
    /// Line with several horizontally separated cells.
    TableRow,
}

/// Axis-aligned bounding box in page points, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Smallest box containing both boxes.
    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    /// Horizontal overlap with another box, in points.
    pub fn x_overlap(&self, other: &BBox) -> f32 {
        (self.x1.min(other.x1) - self.x0.max(other.x0)).max(0.0)
    }

    /// Vertical overlap with another box, in points.
    pub fn y_overlap(&self, other: &BBox) -> f32 {
        (self.y1.min(other.y1) - self.y0.max(other.y0)).max(0.0)
    }

    /// Convert to page-relative percentages for visual overlays.
    pub fn to_percentages(&self, page_width: f32, page_height: f32) -> BBox {
        if page_width <= 0.0 || page_height <= 0.0 {
            return BBox::new(0.0, 0.0, 0.0, 0.0);
        }
        BBox {
            x0: self.x0 / page_width * 100.0,
            y0: self.y0 / page_height * 100.0,
            x1: self.x1 / page_width * 100.0,
            y1: self.y1 / page_height * 100.0,
        }
    }
}

/// Identifier of a block within its owning [`DocumentStructure`].
pub type BlockId = usize;

/// A positioned run of text on a page.
///
/// Blocks are immutable once the structure is built and are ordered by
/// `reading_order`: column index first, then vertical position, so a
/// consumer walking the block list reads the page the way a human would
/// even across multi-column layouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    /// Index into `DocumentStructure::blocks`.
    pub id: BlockId,
    pub text: String,
    /// Zero-based page number.
    pub page_index: usize,
    pub bbox: BBox,
    /// Position in natural reading order within the page.
    pub reading_order: usize,
    /// Zero-based detected column, left to right.
    pub column_index: usize,
    pub block_type: BlockType,
}

/// Structured text for one document version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentStructure {
    /// All block text joined in reading order.
    pub raw_text: String,
    pub blocks: Vec<TextBlock>,
    pub page_count: usize,
    /// Page dimensions in points, indexed by page.
    pub page_sizes: Vec<(f32, f32)>,
    pub text_mode: TextMode,
    pub needs_ocr: bool,
}

impl DocumentStructure {
    pub fn block(&self, id: BlockId) -> Option<&TextBlock> {
        self.blocks.get(id)
    }

    /// Blocks on a single page, already in reading order.
    pub fn page_blocks(&self, page_index: usize) -> impl Iterator<Item = &TextBlock> {
        self.blocks.iter().filter(move |b| b.page_index == page_index)
    }

    /// Total word count across all blocks.
    pub fn word_count(&self) -> usize {
        self.blocks
            .iter()
            .map(|b| b.text.split_whitespace().count())
            .sum()
    }
}
