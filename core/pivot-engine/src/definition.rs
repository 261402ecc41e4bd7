//! FILENAME: core/pivot-engine/src/definition.rs
//! Pivot Model Definition - The serializable configuration.
//!
//! This module contains the types needed to DESCRIBE a pivot transform and
//! the types it produces. These structures are designed to be:
//! - Serializable (persisted under the grid's exported state)
//! - Independent of any engine instance
//! - Immutable snapshots of user intent

use grid_engine::{ColumnDef, RowModel};
use serde::{Deserialize, Serialize};

/// Separator between the path segments of a derived column field.
pub const COLUMN_PATH_SEPARATOR: &str = ">->";

// ============================================================================
// FIELD DEFINITIONS
// ============================================================================

/// Sort direction applied to the values of a column field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PivotSortDirection {
    Asc,
    Desc,
}

/// A source field whose distinct values become derived rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotRowField {
    pub field: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
}

/// A source field whose distinct values become derived columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotColumnField {
    pub field: String,
    /// `None` keeps the values in order of first appearance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<PivotSortDirection>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
}

/// A source field aggregated into every derived cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotValueField {
    pub field: String,
    /// Name of a registered aggregation function.
    #[serde(rename = "aggFunc")]
    pub agg_func: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl PivotRowField {
    pub fn new(field: impl Into<String>) -> Self {
        PivotRowField {
            field: field.into(),
            hidden: false,
        }
    }
}

impl PivotColumnField {
    pub fn new(field: impl Into<String>) -> Self {
        PivotColumnField {
            field: field.into(),
            sort: None,
            hidden: false,
        }
    }

    pub fn sorted(mut self, direction: PivotSortDirection) -> Self {
        self.sort = Some(direction);
        self
    }
}

impl PivotValueField {
    pub fn new(field: impl Into<String>, agg_func: impl Into<String>) -> Self {
        PivotValueField {
            field: field.into(),
            agg_func: agg_func.into(),
            hidden: false,
        }
    }
}

// ============================================================================
// PIVOT MODEL
// ============================================================================

/// The complete pivot configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotModel {
    #[serde(default)]
    pub rows: Vec<PivotRowField>,
    #[serde(default)]
    pub columns: Vec<PivotColumnField>,
    #[serde(default)]
    pub values: Vec<PivotValueField>,
}

impl PivotModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_row(mut self, field: PivotRowField) -> Self {
        self.rows.push(field);
        self
    }

    pub fn with_column(mut self, field: PivotColumnField) -> Self {
        self.columns.push(field);
        self
    }

    pub fn with_value(mut self, field: PivotValueField) -> Self {
        self.values.push(field);
        self
    }

    /// True when no field takes part in the transform.
    pub fn is_empty(&self) -> bool {
        self.active_rows().next().is_none()
            && self.active_columns().next().is_none()
            && self.active_values().next().is_none()
    }

    pub fn active_rows(&self) -> impl Iterator<Item = &PivotRowField> {
        self.rows.iter().filter(|f| !f.hidden)
    }

    pub fn active_columns(&self) -> impl Iterator<Item = &PivotColumnField> {
        self.columns.iter().filter(|f| !f.hidden)
    }

    pub fn active_values(&self) -> impl Iterator<Item = &PivotValueField> {
        self.values.iter().filter(|f| !f.hidden)
    }
}

// ============================================================================
// PIVOT OUTPUT
// ============================================================================

/// A node of the column grouping tree built over the derived value columns.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnGroupNode {
    Group(PivotColumnGroup),
    /// Leaf referencing a derived column by field.
    Field(String),
}

/// One value of a column field, grouping the columns below it.
#[derive(Debug, Clone, PartialEq)]
pub struct PivotColumnGroup {
    /// Path of the group joined with `COLUMN_PATH_SEPARATOR`.
    pub group_id: String,
    pub header_name: String,
    pub children: Vec<ColumnGroupNode>,
}

/// Result of a pivot transform.
#[derive(Debug, Clone, Default)]
pub struct PivotedData {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<RowModel>,
    pub column_groups: Vec<PivotColumnGroup>,
}

/// Prefixes backslashes and `reserved` with a backslash, so that segments
/// joined by a separator starting with `reserved` split back unambiguously.
pub fn escape_path_segment(label: &str, reserved: char) -> String {
    if !label.chars().any(|c| c == '\\' || c == reserved) {
        return label.to_string();
    }
    let mut escaped = String::with_capacity(label.len() + 2);
    for c in label.chars() {
        if c == '\\' || c == reserved {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Field of the derived column for `value_field` under a column path.
/// The path segments are expected to be escaped already.
pub fn pivot_column_field(path: &[String], value_field: &str) -> String {
    if path.is_empty() {
        return value_field.to_string();
    }
    let mut field = path.join(COLUMN_PATH_SEPARATOR);
    field.push_str(COLUMN_PATH_SEPARATOR);
    field.push_str(value_field);
    field
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_json_shape() {
        let model = PivotModel::new()
            .with_row(PivotRowField::new("cat"))
            .with_column(PivotColumnField::new("y").sorted(PivotSortDirection::Desc))
            .with_value(PivotValueField::new("price", "sum"));

        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "rows": [{"field": "cat"}],
                "columns": [{"field": "y", "sort": "desc"}],
                "values": [{"field": "price", "aggFunc": "sum"}],
            })
        );
        let parsed: PivotModel = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, model);
    }

    #[test]
    fn test_hidden_fields_do_not_count() {
        let mut model = PivotModel::new().with_row(PivotRowField::new("cat"));
        assert!(!model.is_empty());
        model.rows[0].hidden = true;
        assert!(model.is_empty());
    }

    #[test]
    fn test_pivot_column_field() {
        let path = vec!["2023".to_string(), "Q1".to_string()];
        assert_eq!(pivot_column_field(&path, "price"), "2023>->Q1>->price");
        assert_eq!(pivot_column_field(&[], "price"), "price");
    }

    #[test]
    fn test_escape_path_segment() {
        assert_eq!(escape_path_segment("2023", '>'), "2023");
        assert_eq!(escape_path_segment("a>->b", '>'), "a\\>->b");
        assert_eq!(escape_path_segment("a/b", '/'), "a\\/b");
        assert_eq!(escape_path_segment("c:\\tmp", '/'), "c:\\\\tmp");

        let joined = pivot_column_field(&[escape_path_segment("A>->B", '>')], "x");
        let nested = pivot_column_field(&["A".to_string(), "B".to_string()], "x");
        assert_ne!(joined, nested);
    }
}
