//! FILENAME: core/engine/src/lib.rs
//! PURPOSE: Main library entry point for the headless data grid engine.
//! CONTEXT: Re-exports public types and modules for use by other crates.

pub mod aggregation;
pub mod cell_meta;
pub mod columns;
pub mod config;
pub mod error;
pub mod grid;
pub mod logging;
pub mod navigation;
pub mod pipeline;
pub mod rows;
pub mod state;
pub mod throttle;
pub mod value;

// Re-export commonly used types at the crate root
pub use aggregation::{
    AggregatedCell, AggregationFunction, AggregationFunctions, AggregationLookup, AggregationModel,
};
pub use cell_meta::{CellMeta, CellMetaLookup};
pub use columns::{CellParams, ColSpan, ColumnAggregation, ColumnDef, ColumnType, ColumnsState};
pub use config::{AggregatedRows, AggregationPosition, GridConfig, GridSignature, PaginationModel};
pub use error::{GridError, GridResult};
pub use grid::{
    GridEngine, GridEngineBuilder, GridEvent, GridState, GroupChildrenParams, MutationOutcome,
};
pub use navigation::{GridFocus, KeyModifiers, NavigationEffect, NavigationKey, NavigationOutcome};
pub use pipeline::{
    ColumnMenuItem, ExportStateParams, PipeGroup, PipeProcessor, PipeRegistry, RestoreStateValue, Unregister,
};
pub use rows::{
    HydrateRowsValue, PageRange, PinnedPosition, PinnedRow, PinnedRows, RowGroupingStrategy, RowNode,
    RowNodeKind, RowTree, RowUpdate,
};
pub use state::GridInitialState;
pub use throttle::{Clock, ManualClock, SystemClock};
pub use value::{CellValue, RowId, RowModel};
