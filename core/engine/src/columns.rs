//! FILENAME: core/engine/src/columns.rs
//! PURPOSE: Column definitions and the hydrated column state.
//! CONTEXT: `ColumnDef` is what the host supplies. `ColumnsState` is the
//! result of running the `hydrateColumns` pipeline over those definitions:
//! ordered fields plus a field-keyed lookup.

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::value::{CellValue, RowId, RowModel};

/// Default width of a column when the host does not provide one.
pub const DEFAULT_COLUMN_WIDTH: f64 = 100.0;

// ============================================================================
// COLUMN TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    String,
    Number,
    Date,
    DateTime,
    Boolean,
    SingleSelect,
    Actions,
}

impl Default for ColumnType {
    fn default() -> Self {
        ColumnType::String
    }
}

// ============================================================================
// SPAN RESOLVER
// ============================================================================

/// Parameters handed to a dynamic span resolver.
pub struct CellParams<'a> {
    pub id: &'a RowId,
    pub field: &'a str,
    pub value: &'a CellValue,
    pub row: &'a RowModel,
}

/// How many grid columns a cell of this column occupies.
#[derive(Clone)]
pub enum ColSpan {
    Fixed(u32),
    Dynamic(Rc<dyn Fn(&CellParams<'_>) -> u32>),
}

impl ColSpan {
    pub fn dynamic(f: impl Fn(&CellParams<'_>) -> u32 + 'static) -> Self {
        ColSpan::Dynamic(Rc::new(f))
    }

    /// Evaluates the span for one cell. A span of 0 is treated as 1.
    pub fn resolve(&self, params: &CellParams<'_>) -> u32 {
        let span = match self {
            ColSpan::Fixed(n) => *n,
            ColSpan::Dynamic(f) => f(params),
        };
        span.max(1)
    }
}

impl fmt::Debug for ColSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColSpan::Fixed(n) => write!(f, "Fixed({})", n),
            ColSpan::Dynamic(_) => write!(f, "Dynamic(..)"),
        }
    }
}

impl PartialEq for ColSpan {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ColSpan::Fixed(a), ColSpan::Fixed(b)) => a == b,
            (ColSpan::Dynamic(a), ColSpan::Dynamic(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// ============================================================================
// COLUMN DEFINITION
// ============================================================================

/// Aggregation attached to a column by the `hydrateColumns` pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnAggregation {
    pub function_name: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub field: String,
    pub header_name: Option<String>,
    pub column_type: ColumnType,
    pub width: f64,
    pub hide: bool,

    /// Whether any aggregation may be applied to this column.
    pub aggregable: bool,

    /// Per-column whitelist of aggregation function names.
    /// When set it overrides the functions' own column-type constraints.
    pub available_aggregation_functions: Option<Vec<String>>,

    pub col_span: Option<ColSpan>,

    /// Set by the aggregation feature during column hydration.
    pub aggregation: Option<ColumnAggregation>,
}

impl ColumnDef {
    pub fn new(field: impl Into<String>) -> Self {
        ColumnDef {
            field: field.into(),
            header_name: None,
            column_type: ColumnType::String,
            width: DEFAULT_COLUMN_WIDTH,
            hide: false,
            aggregable: true,
            available_aggregation_functions: None,
            col_span: None,
            aggregation: None,
        }
    }

    pub fn with_type(mut self, column_type: ColumnType) -> Self {
        self.column_type = column_type;
        self
    }

    pub fn with_header_name(mut self, header_name: impl Into<String>) -> Self {
        self.header_name = Some(header_name.into());
        self
    }

    pub fn with_width(mut self, width: f64) -> Self {
        self.width = width;
        self
    }

    pub fn with_col_span(mut self, col_span: ColSpan) -> Self {
        self.col_span = Some(col_span);
        self
    }

    pub fn with_available_aggregation_functions(mut self, names: &[&str]) -> Self {
        self.available_aggregation_functions =
            Some(names.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn not_aggregable(mut self) -> Self {
        self.aggregable = false;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hide = true;
        self
    }

    pub fn display_name(&self) -> &str {
        self.header_name.as_deref().unwrap_or(&self.field)
    }
}

// ============================================================================
// COLUMNS STATE
// ============================================================================

/// Hydrated column state: the value threaded through `hydrateColumns`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnsState {
    /// All fields in display order (hidden columns included).
    pub all: Vec<String>,
    pub lookup: FxHashMap<String, ColumnDef>,
}

impl ColumnsState {
    /// Builds the state from host definitions. A repeated field keeps its
    /// first position and its last definition.
    pub fn from_defs(defs: Vec<ColumnDef>) -> Self {
        let mut state = ColumnsState::default();
        for def in defs {
            if !state.lookup.contains_key(&def.field) {
                state.all.push(def.field.clone());
            }
            state.lookup.insert(def.field.clone(), def);
        }
        state
    }

    pub fn get(&self, field: &str) -> Option<&ColumnDef> {
        self.lookup.get(field)
    }

    /// Visible columns in display order.
    pub fn visible_columns(&self) -> Vec<&ColumnDef> {
        self.all
            .iter()
            .filter_map(|field| self.lookup.get(field))
            .filter(|col| !col.hide)
            .collect()
    }

    /// Index of `field` among the visible columns.
    pub fn visible_index(&self, field: &str) -> Option<usize> {
        self.visible_columns()
            .iter()
            .position(|col| col.field == field)
    }

    /// Moves `field` to `target_index` in the ordered field list.
    /// Returns false when nothing moved.
    pub fn move_column(&mut self, field: &str, target_index: usize) -> bool {
        let Some(old_index) = self.all.iter().position(|f| f == field) else {
            return false;
        };
        let target_index = target_index.min(self.all.len() - 1);
        if old_index == target_index {
            return false;
        }
        let moved = self.all.remove(old_index);
        self.all.insert(target_index, moved);
        true
    }
}
