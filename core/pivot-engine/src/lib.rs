//! FILENAME: core/pivot-engine/src/lib.rs
//! Pivot subsystem for the grid engine.
//!
//! This crate provides the pivot transform as a standalone module, separate
//! from the core row/column engine. It depends on `grid-engine` for shared
//! types (CellValue, RowModel, ColumnDef, aggregation functions) and for the
//! pipeline the pivoting controller plugs into.
//!
//! Layers:
//! - `definition`: Serializable configuration (what the pivot IS) and its output
//! - `engine`: Pure calculation (HOW we reshape rows into pivoted data)
//! - `pivoting`: Controller that swaps the engine's data while pivoting is on

pub mod definition;
pub mod engine;
pub mod pivoting;

pub use definition::*;
pub use engine::{calculate_pivot, PivotSource, PIVOT_ROW_ID_PREFIX, PIVOT_TOTAL_ROW_ID};
pub use pivoting::{Pivoting, PivotingInitialState, PIVOTING_PROCESSOR};
