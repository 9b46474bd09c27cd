//! Natural reading order for extracted text blocks.
//!
//! Blocks are taken top to bottom. Blocks whose vertical extents overlap by at
//! least half of the shorter one form a row (side-by-side columns, a label and
//! its value) and are read left to right within the row.

use std::cmp::Ordering;

use super::document::{BoundingBox, TextBlock};

/// Minimum overlap, relative to the shorter block, for two blocks to share a row.
const ROW_OVERLAP: f64 = 0.5;

/// Sort `blocks` into reading order.
pub fn reading_order(mut blocks: Vec<TextBlock>) -> Vec<TextBlock> {
    blocks.sort_by(|a, b| by_top_then_left(&a.bbox, &b.bbox));

    let mut rows: Vec<(BoundingBox, Vec<TextBlock>)> = Vec::new();
    for block in blocks {
        match rows.last_mut() {
            Some((span, row)) if same_row(span, &block.bbox) => {
                span.y_min = span.y_min.min(block.bbox.y_min);
                span.y_max = span.y_max.max(block.bbox.y_max);
                row.push(block);
            }
            _ => rows.push((block.bbox, vec![block])),
        }
    }

    rows.into_iter()
        .flat_map(|(_, mut row)| {
            row.sort_by(|a, b| a.bbox.x_min.partial_cmp(&b.bbox.x_min).unwrap_or(Ordering::Equal));
            row
        })
        .collect()
}

fn by_top_then_left(a: &BoundingBox, b: &BoundingBox) -> Ordering {
    a.y_min
        .partial_cmp(&b.y_min)
        .unwrap_or(Ordering::Equal)
        .then(a.x_min.partial_cmp(&b.x_min).unwrap_or(Ordering::Equal))
}

fn same_row(span: &BoundingBox, bbox: &BoundingBox) -> bool {
    let shorter = span.height().min(bbox.height());
    if shorter <= 0.0 {
        return span.y_min == bbox.y_min;
    }
    span.vertical_overlap(bbox) >= shorter * ROW_OVERLAP
}
