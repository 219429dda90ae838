//! Page layout analysis: line clustering, column detection, block assembly.
//!
//! Pure geometry over word boxes; the same code runs on native poppler
//! words and OCR words so both paths produce identical block structure.

use crate::models::{BBox, BlockType};

use super::Word;

/// Vertical gap between lines that still reads as one paragraph block.
const PARAGRAPH_GAP: f32 = 6.0;

/// Minimum x0 gap, as a fraction of page width, that splits columns.
const COLUMN_GAP_RATIO: f32 = 0.15;

/// Horizontal gap between words that reads as a table cell boundary.
const CELL_GAP: f32 = 18.0;

/// A clustered line of words, left to right.
#[derive(Debug, Clone)]
pub struct Line {
    pub words: Vec<Word>,
    pub bbox: BBox,
}

impl Line {
    fn from_words(mut words: Vec<Word>) -> Self {
        words.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
        let bbox = words
            .iter()
            .skip(1)
            .fold(words[0].bbox, |acc, w| acc.union(&w.bbox));
        Self { words, bbox }
    }

    pub fn text(&self) -> String {
        self.words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// An assembled block before global ids are assigned.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub text: String,
    pub bbox: BBox,
    pub column_index: usize,
    pub block_type: BlockType,
}

/// Cluster words on one page into lines.
///
/// Words are sorted by (top, x0); consecutive words whose top differs from
/// the line anchor by at most `y_tolerance` stay on the same line.
pub fn cluster_lines(words: &[Word], y_tolerance: f32) -> Vec<Line> {
    let mut sorted: Vec<Word> = words
        .iter()
        .filter(|w| w.bbox.width() > 0.0 && w.bbox.height() > 0.0 && !w.text.trim().is_empty())
        .cloned()
        .collect();
    sorted.sort_by(|a, b| {
        a.bbox
            .y0
            .total_cmp(&b.bbox.y0)
            .then(a.bbox.x0.total_cmp(&b.bbox.x0))
    });

    let mut lines: Vec<Line> = Vec::new();
    let mut current: Vec<Word> = Vec::new();
    let mut anchor_top = 0.0f32;

    for word in sorted {
        if current.is_empty() {
            anchor_top = word.bbox.y0;
            current.push(word);
        } else if (word.bbox.y0 - anchor_top).abs() <= y_tolerance {
            current.push(word);
        } else {
            lines.push(Line::from_words(std::mem::take(&mut current)));
            anchor_top = word.bbox.y0;
            current.push(word);
        }
    }
    if !current.is_empty() {
        lines.push(Line::from_words(current));
    }

    lines
}

/// Detect column boundaries on a page from line start positions.
///
/// Collects x0 across all lines, sorts them, and splits wherever the gap
/// between consecutive starts exceeds 15% of page width. Returns the x
/// positions that open a new column; empty means single-column.
pub fn detect_columns(lines: &[Line], page_width: f32) -> Vec<f32> {
    if page_width <= 0.0 || lines.len() < 2 {
        return Vec::new();
    }

    let mut starts: Vec<f32> = lines.iter().map(|l| l.bbox.x0).collect();
    starts.sort_by(f32::total_cmp);
    starts.dedup_by(|a, b| (*a - *b).abs() < 1.0);

    let min_gap = page_width * COLUMN_GAP_RATIO;
    let mut boundaries = Vec::new();
    for pair in starts.windows(2) {
        if pair[1] - pair[0] > min_gap {
            boundaries.push(pair[1]);
        }
    }
    boundaries
}

/// Column index for an x position given detected boundaries.
fn column_of(x0: f32, boundaries: &[f32]) -> usize {
    boundaries.iter().filter(|b| x0 >= **b - 0.5).count()
}

/// Partition each line's words at the column boundaries.
///
/// Line clustering is purely vertical, so a visual row with text in two
/// columns arrives as one line; splitting here keeps each fragment inside
/// a single column before block assembly.
fn split_lines(lines: Vec<Line>, boundaries: &[f32]) -> Vec<(usize, Line)> {
    if boundaries.is_empty() {
        return lines.into_iter().map(|l| (0, l)).collect();
    }

    let mut fragments = Vec::new();
    for line in lines {
        let mut by_column: Vec<Vec<Word>> = vec![Vec::new(); boundaries.len() + 1];
        for word in line.words {
            let col = column_of(word.bbox.x0, boundaries);
            by_column[col].push(word);
        }
        for (col, words) in by_column.into_iter().enumerate() {
            if !words.is_empty() {
                fragments.push((col, Line::from_words(words)));
            }
        }
    }
    fragments
}

fn classify_line(line: &Line) -> BlockType {
    // Table row: several cells separated by wide gaps.
    let mut cells = 1usize;
    for pair in line.words.windows(2) {
        if pair[1].bbox.x0 - pair[0].bbox.x1 > CELL_GAP {
            cells += 1;
        }
    }
    if cells >= 3 {
        return BlockType::TableRow;
    }

    let text = line.text();
    let trimmed = text.trim();
    let is_short = line.words.len() <= 4;
    let all_caps = trimmed
        .chars()
        .filter(|c| c.is_alphabetic())
        .all(|c| c.is_uppercase())
        && trimmed.chars().any(|c| c.is_alphabetic());

    if trimmed.ends_with(':') || (is_short && all_caps) {
        BlockType::LabelCandidate
    } else {
        BlockType::Paragraph
    }
}

/// Assemble lines into blocks within detected columns.
///
/// Consecutive paragraph lines in the same column merge while the vertical
/// gap stays within tolerance; label and table lines stay on their own so
/// label-proximity extraction can address them individually.
pub fn assemble_blocks(lines: Vec<Line>, page_width: f32) -> Vec<RawBlock> {
    let boundaries = detect_columns(&lines, page_width);

    let mut fragments: Vec<(usize, Line, BlockType)> = split_lines(lines, &boundaries)
        .into_iter()
        .map(|(col, line)| {
            let kind = classify_line(&line);
            (col, line, kind)
        })
        .collect();
    fragments.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.bbox.y0.total_cmp(&b.1.bbox.y0)));

    let mut blocks: Vec<RawBlock> = Vec::new();
    let mut current: Option<(usize, BlockType, Vec<String>, BBox, f32)> = None;

    for (col, line, kind) in fragments {
        let mergeable = kind == BlockType::Paragraph;
        match current.take() {
            Some((cur_col, cur_kind, mut texts, bbox, bottom))
                if cur_col == col
                    && mergeable
                    && cur_kind == BlockType::Paragraph
                    && line.bbox.y0 - bottom <= PARAGRAPH_GAP =>
            {
                texts.push(line.text());
                let merged = bbox.union(&line.bbox);
                current = Some((cur_col, cur_kind, texts, merged, line.bbox.y1));
            }
            Some((cur_col, cur_kind, texts, bbox, _)) => {
                blocks.push(RawBlock {
                    text: texts.join("\n"),
                    bbox,
                    column_index: cur_col,
                    block_type: cur_kind,
                });
                current = Some((col, kind, vec![line.text()], line.bbox, line.bbox.y1));
            }
            None => {
                current = Some((col, kind, vec![line.text()], line.bbox, line.bbox.y1));
            }
        }
    }
    if let Some((col, kind, texts, bbox, _)) = current {
        blocks.push(RawBlock {
            text: texts.join("\n"),
            bbox,
            column_index: col,
            block_type: kind,
        });
    }

    // Column-major, then top-to-bottom: natural reading order.
    blocks.sort_by(|a, b| {
        a.column_index
            .cmp(&b.column_index)
            .then(a.bbox.y0.total_cmp(&b.bbox.y0))
            .then(a.bbox.x0.total_cmp(&b.bbox.x0))
    });
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, x0: f32, y0: f32, x1: f32, y1: f32) -> Word {
        Word {
            text: text.to_string(),
            page_index: 0,
            bbox: BBox::new(x0, y0, x1, y1),
        }
    }

    #[test]
    fn test_cluster_lines_groups_by_top() {
        let words = vec![
            word("Gate", 10.0, 100.0, 40.0, 112.0),
            word("Pass:", 44.0, 101.5, 80.0, 113.0),
            word("X9Y2", 10.0, 120.0, 50.0, 132.0),
        ];
        let lines = cluster_lines(&words, 3.0);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text(), "Gate Pass:");
        assert_eq!(lines[1].text(), "X9Y2");
    }

    #[test]
    fn test_cluster_lines_skips_degenerate_words() {
        let words = vec![
            word("ok", 10.0, 10.0, 20.0, 20.0),
            word("zero", 10.0, 10.0, 10.0, 20.0),
            word("  ", 30.0, 10.0, 40.0, 20.0),
        ];
        let lines = cluster_lines(&words, 3.0);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text(), "ok");
    }

    #[test]
    fn test_detect_columns_two_column_page() {
        // Left column starts at 40; a right-column-only line starts at 320.
        let words = vec![
            word("left", 40.0, 100.0, 100.0, 112.0),
            word("text", 104.0, 100.0, 150.0, 112.0),
            word("right", 320.0, 120.0, 380.0, 132.0),
            word("only", 384.0, 120.0, 420.0, 132.0),
        ];
        let lines = cluster_lines(&words, 3.0);
        let boundaries = detect_columns(&lines, 612.0);
        assert_eq!(boundaries.len(), 1);
        assert!((boundaries[0] - 320.0).abs() < 0.01);
    }

    #[test]
    fn test_detect_columns_single_column() {
        let words = vec![
            word("a", 40.0, 100.0, 60.0, 112.0),
            word("b", 42.0, 120.0, 62.0, 132.0),
            word("c", 44.0, 140.0, 64.0, 152.0),
        ];
        let lines = cluster_lines(&words, 3.0);
        assert!(detect_columns(&lines, 612.0).is_empty());
    }

    #[test]
    fn test_assemble_blocks_splits_row_spanning_columns() {
        let words = vec![
            // A right-column-only line establishes the boundary.
            word("SELLER", 320.0, 80.0, 380.0, 92.0),
            // One visual row with text in both columns.
            word("left", 40.0, 100.0, 90.0, 112.0),
            word("cell", 94.0, 100.0, 130.0, 112.0),
            word("right", 320.0, 100.0, 380.0, 112.0),
            word("cell", 384.0, 100.0, 420.0, 112.0),
        ];
        let lines = cluster_lines(&words, 3.0);
        let blocks = assemble_blocks(lines, 612.0);
        // Column 0: "left cell". Column 1: "SELLER" label + "right cell".
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].column_index, 0);
        assert_eq!(blocks[0].text, "left cell");
        assert_eq!(blocks[1].text, "SELLER");
        assert_eq!(blocks[2].text, "right cell");
        assert_eq!(blocks[2].column_index, 1);
    }

    #[test]
    fn test_assemble_blocks_reading_order_column_major() {
        let words = vec![
            word("left", 40.0, 100.0, 90.0, 112.0),
            word("one", 94.0, 100.0, 130.0, 112.0),
            word("left", 40.0, 116.0, 90.0, 128.0),
            word("two", 94.0, 116.0, 130.0, 128.0),
            // Right column sits higher on the page but reads second.
            word("right", 320.0, 80.0, 380.0, 92.0),
            word("side", 384.0, 80.0, 420.0, 92.0),
        ];
        let lines = cluster_lines(&words, 3.0);
        let blocks = assemble_blocks(lines, 612.0);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].column_index, 0);
        assert_eq!(blocks[0].text, "left one\nleft two");
        assert_eq!(blocks[1].column_index, 1);
        assert_eq!(blocks[1].text, "right side");
    }

    #[test]
    fn test_label_lines_stay_separate() {
        let words = vec![
            word("Buyer:", 40.0, 100.0, 90.0, 112.0),
            word("Smith", 40.0, 114.0, 90.0, 126.0),
            word("Transport", 94.0, 114.0, 160.0, 126.0),
        ];
        let lines = cluster_lines(&words, 3.0);
        let blocks = assemble_blocks(lines, 612.0);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].block_type, BlockType::LabelCandidate);
        assert_eq!(blocks[0].text, "Buyer:");
        assert_eq!(blocks[1].text, "Smith Transport");
    }

    #[test]
    fn test_paragraph_gap_splits_blocks() {
        let words = vec![
            word("first", 40.0, 100.0, 90.0, 112.0),
            word("para", 94.0, 100.0, 130.0, 112.0),
            // 40pt below: a separate block.
            word("second", 40.0, 152.0, 100.0, 164.0),
            word("para", 104.0, 152.0, 140.0, 164.0),
        ];
        let lines = cluster_lines(&words, 3.0);
        let blocks = assemble_blocks(lines, 612.0);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn test_table_row_detection() {
        let words = vec![
            word("2019", 40.0, 100.0, 70.0, 112.0),
            word("HONDA", 120.0, 100.0, 170.0, 112.0),
            word("ACCORD", 240.0, 100.0, 300.0, 112.0),
        ];
        let lines = cluster_lines(&words, 3.0);
        let blocks = assemble_blocks(lines, 612.0);
        assert_eq!(blocks[0].block_type, BlockType::TableRow);
    }
}
