//! FILENAME: core/engine/src/config.rs
//! PURPOSE: Grid configuration - what the host passes in as "props".
//! CONTEXT: Every field has a default so partial JSON documents deserialize.
//! The configuration is an immutable snapshot of host intent; runtime state
//! (models, focus, caches) lives in `GridState` and `GridEngine`.

use serde::{Deserialize, Serialize};

use crate::error::GridResult;

/// Feature tier of the grid. Some mutations are refused below a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GridSignature {
    DataGrid,
    DataGridPro,
    DataGridPremium,
}

impl Default for GridSignature {
    fn default() -> Self {
        GridSignature::DataGridPremium
    }
}

/// Where aggregated values are displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationPosition {
    /// On the group row itself.
    Inline,
    /// On a synthetic footer row appended to each group (and to the root).
    Footer,
}

impl Default for AggregationPosition {
    fn default() -> Self {
        AggregationPosition::Footer
    }
}

/// Which rows feed an aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregatedRows {
    /// Only rows passing the current filter.
    Filtered,
    /// Every row, filtered or not.
    All,
}

impl Default for AggregatedRows {
    fn default() -> Self {
        AggregatedRows::Filtered
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationModel {
    pub page: usize,
    pub page_size: usize,
}

impl Default for PaginationModel {
    fn default() -> Self {
        PaginationModel {
            page: 0,
            page_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub signature: GridSignature,

    /// Minimum interval between two applied row-set updates.
    /// 0 applies every update immediately.
    pub throttle_rows_ms: u64,

    pub aggregation_position: AggregationPosition,

    pub aggregated_rows: AggregatedRows,

    pub disable_aggregation: bool,

    /// Whether the visible rows are split into pages.
    pub pagination: bool,

    pub pagination_model: PaginationModel,

    /// Number of rows visible in one screen; used by PageUp/PageDown.
    pub viewport_page_size: usize,

    /// Groups with a depth lower than this are expanded on creation.
    /// -1 expands every group.
    pub default_group_expansion_depth: i32,

    /// Field read by the default row-id extraction.
    pub row_id_field: String,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            signature: GridSignature::default(),
            throttle_rows_ms: 0,
            aggregation_position: AggregationPosition::default(),
            aggregated_rows: AggregatedRows::default(),
            disable_aggregation: false,
            pagination: false,
            pagination_model: PaginationModel::default(),
            viewport_page_size: 10,
            default_group_expansion_depth: 0,
            row_id_field: "id".to_string(),
        }
    }
}

impl GridConfig {
    pub fn from_json(json: &str) -> GridResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> GridResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
