//! FILENAME: core/engine/src/aggregation/functions.rs
//! PURPOSE: Aggregation functions and their applicability rules.
//! CONTEXT: Built-in reducers run through a single-pass accumulator. Hosts
//! can register custom reducers next to them; registration order is kept
//! because it is the order offered in the column menu.

use std::fmt;
use std::rc::Rc;

use crate::columns::{ColumnDef, ColumnType};
use crate::value::CellValue;

pub type AggregationApplyFn = Rc<dyn Fn(&[CellValue]) -> CellValue>;

#[derive(Clone)]
pub enum AggregationReducer {
    Sum,
    Avg,
    Min,
    Max,
    Size,
    Custom(AggregationApplyFn),
}

impl fmt::Debug for AggregationReducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationReducer::Sum => write!(f, "Sum"),
            AggregationReducer::Avg => write!(f, "Avg"),
            AggregationReducer::Min => write!(f, "Min"),
            AggregationReducer::Max => write!(f, "Max"),
            AggregationReducer::Size => write!(f, "Size"),
            AggregationReducer::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

// ============================================================================
// ACCUMULATOR
// ============================================================================

/// Running aggregate over a sequence of cell values.
#[derive(Debug, Clone, Default)]
pub struct AggregateAccumulator {
    pub sum: f64,
    /// Every value, empty ones included.
    pub count: u64,
    pub count_numbers: u64,
    pub min: Option<CellValue>,
    pub max: Option<CellValue>,
}

impl AggregateAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: &CellValue) {
        self.count += 1;

        if let CellValue::Number(n) = value {
            if n.is_nan() {
                return;
            }
            self.sum += n;
            self.count_numbers += 1;
        }

        // Min/Max over numbers and dates
        if matches!(value, CellValue::Number(_) | CellValue::Date(_)) {
            let lower = self
                .min
                .as_ref()
                .map_or(true, |m| CellValue::compare(value, m).is_lt());
            if lower {
                self.min = Some(value.clone());
            }
            let higher = self
                .max
                .as_ref()
                .map_or(true, |m| CellValue::compare(value, m).is_gt());
            if higher {
                self.max = Some(value.clone());
            }
        }
    }

    pub fn compute(&self, reducer: &AggregationReducer) -> CellValue {
        match reducer {
            AggregationReducer::Sum => CellValue::Number(self.sum),
            AggregationReducer::Avg => {
                if self.count_numbers == 0 {
                    CellValue::Empty
                } else {
                    CellValue::Number(self.sum / self.count_numbers as f64)
                }
            }
            AggregationReducer::Min => self.min.clone().unwrap_or_default(),
            AggregationReducer::Max => self.max.clone().unwrap_or_default(),
            AggregationReducer::Size => CellValue::Number(self.count as f64),
            // Custom reducers see the raw values, not the accumulator.
            AggregationReducer::Custom(_) => CellValue::Empty,
        }
    }
}

// ============================================================================
// AGGREGATION FUNCTIONS
// ============================================================================

#[derive(Debug, Clone)]
pub struct AggregationFunction {
    pub reducer: AggregationReducer,
    /// Column types the function applies to. `None` means every type.
    pub column_types: Option<Vec<ColumnType>>,
    pub label: Option<String>,
}

const NUMERIC: &[ColumnType] = &[ColumnType::Number];
const ORDERED: &[ColumnType] = &[ColumnType::Number, ColumnType::Date, ColumnType::DateTime];

impl AggregationFunction {
    fn builtin(reducer: AggregationReducer, column_types: Option<&[ColumnType]>) -> Self {
        AggregationFunction {
            reducer,
            column_types: column_types.map(|types| types.to_vec()),
            label: None,
        }
    }

    pub fn sum() -> Self {
        Self::builtin(AggregationReducer::Sum, Some(NUMERIC))
    }

    pub fn avg() -> Self {
        Self::builtin(AggregationReducer::Avg, Some(NUMERIC))
    }

    pub fn min() -> Self {
        Self::builtin(AggregationReducer::Min, Some(ORDERED))
    }

    pub fn max() -> Self {
        Self::builtin(AggregationReducer::Max, Some(ORDERED))
    }

    pub fn size() -> Self {
        Self::builtin(AggregationReducer::Size, None)
    }

    pub fn custom(apply: impl Fn(&[CellValue]) -> CellValue + 'static) -> Self {
        AggregationFunction {
            reducer: AggregationReducer::Custom(Rc::new(apply)),
            column_types: None,
            label: None,
        }
    }

    pub fn with_column_types(mut self, types: &[ColumnType]) -> Self {
        self.column_types = Some(types.to_vec());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn apply(&self, values: &[CellValue]) -> CellValue {
        if let AggregationReducer::Custom(apply) = &self.reducer {
            return apply(values);
        }
        let mut acc = AggregateAccumulator::new();
        for value in values {
            acc.add(value);
        }
        acc.compute(&self.reducer)
    }

    pub fn applies_to_type(&self, column_type: ColumnType) -> bool {
        self.column_types
            .as_ref()
            .map_or(true, |types| types.contains(&column_type))
    }
}

/// Ordered name -> function registry.
#[derive(Debug, Clone, Default)]
pub struct AggregationFunctions {
    entries: Vec<(String, AggregationFunction)>,
}

impl AggregationFunctions {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `sum`, `avg`, `min`, `max` and `size`.
    pub fn builtin() -> Self {
        let mut functions = Self::empty();
        functions.insert("sum", AggregationFunction::sum());
        functions.insert("avg", AggregationFunction::avg());
        functions.insert("min", AggregationFunction::min());
        functions.insert("max", AggregationFunction::max());
        functions.insert("size", AggregationFunction::size());
        functions
    }

    /// Adds `function`, replacing any function of the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, function: AggregationFunction) {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = function,
            None => self.entries.push((name, function)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AggregationFunction> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, function)| function)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AggregationFunction)> {
        self.entries.iter().map(|(name, f)| (name.as_str(), f))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Display label of `name`: the function's own label, else its name.
    pub fn label(&self, name: &str) -> String {
        self.get(name)
            .and_then(|f| f.label.clone())
            .unwrap_or_else(|| name.to_string())
    }
}

// ============================================================================
// APPLICABILITY
// ============================================================================

/// Whether `function` (registered as `function_name`) may aggregate `column`.
pub fn can_column_have_aggregation_function(
    column: Option<&ColumnDef>,
    function_name: &str,
    function: Option<&AggregationFunction>,
) -> bool {
    let Some(column) = column else {
        return false;
    };
    if !column.aggregable {
        return false;
    }
    let Some(function) = function else {
        return false;
    };
    if let Some(whitelist) = &column.available_aggregation_functions {
        return whitelist.iter().any(|name| name == function_name);
    }
    function.applies_to_type(column.column_type)
}

/// Names of the functions applicable to `column`, in registration order.
pub fn available_aggregation_functions(functions: &AggregationFunctions, column: &ColumnDef) -> Vec<String> {
    functions
        .iter()
        .filter(|(name, function)| can_column_have_aggregation_function(Some(column), name, Some(*function)))
        .map(|(name, _)| name.to_string())
        .collect()
}
