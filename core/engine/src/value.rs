//! FILENAME: core/engine/src/value.rs
//! PURPOSE: Fundamental data types shared by every part of the grid engine.
//! CONTEXT: Defines row identifiers, cell values and the row model (one
//! externally supplied record). Also provides `ValueKey`, a normalized and
//! hashable form of a cell value used as a grouping key.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// ROW IDENTIFIERS
// ============================================================================

/// Identifier of a row, as returned by the row-id extraction function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    Number(i64),
    Text(String),
}

impl RowId {
    /// Returns true if this id was synthesized by the engine (groups, footers).
    pub fn is_auto_generated(&self) -> bool {
        match self {
            RowId::Text(s) => s.starts_with("auto-generated-"),
            RowId::Number(_) => false,
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Number(n) => write!(f, "{}", n),
            RowId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RowId {
    fn from(value: i64) -> Self {
        RowId::Number(value)
    }
}

impl From<i32> for RowId {
    fn from(value: i32) -> Self {
        RowId::Number(value as i64)
    }
}

impl From<&str> for RowId {
    fn from(value: &str) -> Self {
        RowId::Text(value.to_string())
    }
}

impl From<String> for RowId {
    fn from(value: String) -> Self {
        RowId::Text(value)
    }
}

// ============================================================================
// CELL VALUES
// ============================================================================

/// A single value held by a row at a given field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    /// Milliseconds since the Unix epoch.
    Date(i64),
}

pub(crate) static EMPTY_CELL: CellValue = CellValue::Empty;

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        CellValue::Text(s.into())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the display value of the cell as a String.
    /// Used for group labels and derived pivot column ids.
    pub fn display_value(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => {
                // Format without unnecessary decimal places
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{:.0}", n)
                } else {
                    format!("{}", n)
                }
            }
            CellValue::Text(s) => s.clone(),
            CellValue::Boolean(b) => b.to_string(),
            CellValue::Date(ms) => ms.to_string(),
        }
    }

    /// Total ordering used for sorting group keys and for min/max.
    /// Empty sorts first, then numbers, dates, text and booleans.
    pub fn compare(a: &CellValue, b: &CellValue) -> Ordering {
        fn rank(v: &CellValue) -> u8 {
            match v {
                CellValue::Empty => 0,
                CellValue::Number(_) => 1,
                CellValue::Date(_) => 2,
                CellValue::Text(_) => 3,
                CellValue::Boolean(_) => 4,
            }
        }

        match (a, b) {
            (CellValue::Number(na), CellValue::Number(nb)) => {
                na.partial_cmp(nb).unwrap_or(Ordering::Equal)
            }
            (CellValue::Date(da), CellValue::Date(db)) => da.cmp(db),
            (CellValue::Text(ta), CellValue::Text(tb)) => ta.cmp(tb),
            (CellValue::Boolean(ba), CellValue::Boolean(bb)) => ba.cmp(bb),
            _ => rank(a).cmp(&rank(b)),
        }
    }
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Empty
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(value as f64)
    }
}

impl From<i32> for CellValue {
    fn from(value: i32) -> Self {
        CellValue::Number(value as f64)
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Boolean(value)
    }
}

// ============================================================================
// VALUE KEYS
// ============================================================================

/// Wrapper around f64 that implements Eq and Hash for use as HashMap keys.
/// NaN values are treated as equal to each other.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderedFloat(pub f64);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        if self.0.is_nan() && other.0.is_nan() {
            true
        } else {
            self.0 == other.0
        }
    }
}

impl Eq for OrderedFloat {}

impl std::hash::Hash for OrderedFloat {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        if self.0.is_nan() {
            u64::MAX.hash(state);
        } else {
            self.0.to_bits().hash(state);
        }
    }
}

/// A normalized, hashable representation of a cell value.
/// Used as grouping keys by the row tree builder and the pivot transform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKey {
    Empty,
    Number(OrderedFloat),
    Text(String),
    Boolean(bool),
    Date(i64),
}

impl From<&CellValue> for ValueKey {
    fn from(value: &CellValue) -> Self {
        match value {
            CellValue::Empty => ValueKey::Empty,
            CellValue::Number(n) => ValueKey::Number(OrderedFloat(*n)),
            CellValue::Text(s) => ValueKey::Text(s.clone()),
            CellValue::Boolean(b) => ValueKey::Boolean(*b),
            CellValue::Date(d) => ValueKey::Date(*d),
        }
    }
}

impl From<&ValueKey> for CellValue {
    fn from(value: &ValueKey) -> Self {
        match value {
            ValueKey::Empty => CellValue::Empty,
            ValueKey::Number(n) => CellValue::Number(n.0),
            ValueKey::Text(s) => CellValue::Text(s.clone()),
            ValueKey::Boolean(b) => CellValue::Boolean(*b),
            ValueKey::Date(d) => CellValue::Date(*d),
        }
    }
}

impl ValueKey {
    pub fn label(&self) -> String {
        CellValue::from(self).display_value()
    }
}

// ============================================================================
// ROW MODEL
// ============================================================================

/// One externally supplied record: a map from field to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowModel {
    values: BTreeMap<String, CellValue>,
}

impl RowModel {
    pub fn new() -> Self {
        RowModel {
            values: BTreeMap::new(),
        }
    }

    /// Builder-style setter, convenient for fixtures.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<CellValue>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    /// Returns the value at `field`, or `CellValue::Empty` when absent.
    pub fn get(&self, field: &str) -> &CellValue {
        self.values.get(field).unwrap_or(&EMPTY_CELL)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<CellValue>) {
        self.values.insert(field.into(), value.into());
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    /// Shallow merge: every field of `other` overwrites the same field here.
    pub fn merge(&mut self, other: &RowModel) {
        for (field, value) in &other.values {
            self.values.insert(field.clone(), value.clone());
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &CellValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<CellValue>> FromIterator<(K, V)> for RowModel {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        RowModel {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
