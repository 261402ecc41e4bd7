//! FILENAME: core/engine/src/cell_meta.rs
//! PURPOSE: Column-span bookkeeping per (row, visible column index).
//! CONTEXT: Spans are resolved lazily, one rendered window at a time. A cell
//! spanning W columns records itself as `Primary` and marks the W-1 cells it
//! covers (inside the window) as `Spanned`, pointing back at the primary.
//! The lookup is cleared when columns are reordered. Row changes leave it
//! alone: entries of removed rows stay behind until the next reorder.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::columns::{CellParams, ColumnDef};
use crate::value::{RowId, RowModel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellMeta {
    Primary {
        col_span: u32,
        /// Width of the cell plus every column it covers in the window.
        width: f64,
        attributes: BTreeMap<String, String>,
    },
    Spanned {
        left_visible_cell_index: usize,
        right_visible_cell_index: usize,
    },
}

impl CellMeta {
    pub fn is_spanned(&self) -> bool {
        matches!(self, CellMeta::Spanned { .. })
    }
}

pub struct CalculateColSpanParams<'a> {
    pub row_id: &'a RowId,
    pub row: &'a RowModel,
    /// Visible columns in display order.
    pub columns: &'a [&'a ColumnDef],
    pub min_first_column: usize,
    /// Exclusive.
    pub max_last_column: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CellMetaLookup {
    lookup: FxHashMap<RowId, FxHashMap<usize, CellMeta>>,
}

impl CellMetaLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_cell_meta(&self, row_id: &RowId, column_index: usize) -> Option<&CellMeta> {
        self.lookup.get(row_id)?.get(&column_index)
    }

    fn set_cell_meta(&mut self, row_id: &RowId, column_index: usize, meta: CellMeta) {
        self.lookup
            .entry(row_id.clone())
            .or_default()
            .insert(column_index, meta);
    }

    /// Resolves the span of every cell of `row_id` in the column window.
    pub fn calculate_col_span(&mut self, params: &CalculateColSpanParams<'_>) {
        let columns_len = params.columns.len();
        let window_end = params.max_last_column.min(columns_len);

        let mut i = params.min_first_column;
        while i < window_end {
            let col_span = self.calculate_cell_col_span(params, i, window_end);
            i += col_span.max(1) as usize;
        }
    }

    fn calculate_cell_col_span(&mut self, params: &CalculateColSpanParams<'_>, column_index: usize, window_end: usize) -> u32 {
        let columns_len = params.columns.len();
        let column = params.columns[column_index];

        let col_span = column
            .col_span
            .as_ref()
            .map(|span| {
                span.resolve(&CellParams {
                    id: params.row_id,
                    field: &column.field,
                    value: params.row.get(&column.field),
                    row: params.row,
                })
            })
            .unwrap_or(1);

        let mut width = column.width;
        let mut attributes = BTreeMap::new();

        if col_span > 1 {
            for j in 1..col_span as usize {
                let next_index = column_index + j;
                // Only cells inside the rendered window are marked.
                if next_index < params.min_first_column || next_index >= window_end {
                    continue;
                }
                let next_column = params.columns[next_index];
                width += next_column.width;
                attributes.insert(
                    format!("data-colspan-allocates-field-{}", next_column.field.to_lowercase()),
                    "1".to_string(),
                );
                self.set_cell_meta(
                    params.row_id,
                    next_index,
                    CellMeta::Spanned {
                        left_visible_cell_index: column_index,
                        right_visible_cell_index: (column_index + col_span as usize).min(columns_len - 1),
                    },
                );
            }
            attributes.insert("aria-colspan".to_string(), col_span.to_string());
        }

        self.set_cell_meta(
            params.row_id,
            column_index,
            CellMeta::Primary {
                col_span,
                width,
                attributes,
            },
        );

        col_span
    }

    /// Number of rows with at least one entry.
    pub fn row_count(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    pub fn clear(&mut self) {
        self.lookup.clear();
    }
}
