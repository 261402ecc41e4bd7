//! FILENAME: core/engine/src/aggregation/lookup.rs
//! PURPOSE: Computes aggregated values for every carrier row.
//! CONTEXT: Carriers are group rows (inline position) or footer rows (footer
//! position). Each carrier aggregates the caller-backed rows below it; the
//! root footer aggregates every caller-backed row of the tree.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::aggregation::functions::{can_column_have_aggregation_function, AggregationFunction, AggregationFunctions};
use crate::columns::ColumnsState;
use crate::config::{AggregatedRows, AggregationPosition};
use crate::error::{GridError, GridResult};
use crate::rows::cache::RowsCache;
use crate::rows::tree::{root_id, RowNode, RowTree};
use crate::value::{CellValue, RowId};

/// field -> aggregation function name.
pub type AggregationModel = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedCell {
    pub position: AggregationPosition,
    pub value: CellValue,
}

/// row id -> (field -> aggregated cell). Only carrier rows have an entry.
pub type AggregationLookup = FxHashMap<RowId, BTreeMap<String, AggregatedCell>>;

#[derive(Debug, Clone)]
pub struct AggregationRule {
    pub function_name: String,
    pub function: AggregationFunction,
}

pub type AggregationRules = BTreeMap<String, AggregationRule>;

/// Drops model entries whose field is not a known column.
pub fn sanitize_aggregation_model(model: &AggregationModel, columns: &ColumnsState) -> AggregationModel {
    model
        .iter()
        .filter(|(field, _)| columns.get(field).is_some())
        .map(|(field, name)| (field.clone(), name.clone()))
        .collect()
}

/// The applicable subset of `model`. Entries that cannot apply are skipped
/// silently; `compute_aggregation_lookup` is where they become errors.
pub fn get_aggregation_rules(
    columns: &ColumnsState,
    model: &AggregationModel,
    functions: &AggregationFunctions,
) -> AggregationRules {
    model
        .iter()
        .filter_map(|(field, name)| {
            let function = functions.get(name);
            if !can_column_have_aggregation_function(columns.get(field), name, function) {
                return None;
            }
            function.map(|function| {
                (
                    field.clone(),
                    AggregationRule {
                        function_name: name.clone(),
                        function: function.clone(),
                    },
                )
            })
        })
        .collect()
}

pub struct AggregationLookupParams<'a> {
    pub tree: &'a RowTree,
    pub cache: &'a RowsCache,
    pub columns: &'a ColumnsState,
    pub model: &'a AggregationModel,
    pub functions: &'a AggregationFunctions,
    pub position: AggregationPosition,
    pub aggregated_rows: AggregatedRows,
    /// `false` marks a row as filtered out.
    pub filtered_rows: &'a FxHashMap<RowId, bool>,
    /// Restricts which groups carry inline aggregates.
    pub is_group_aggregated: Option<&'a dyn Fn(&RowNode) -> bool>,
}

/// Validates every sanitized model entry, then aggregates every carrier.
pub fn compute_aggregation_lookup(params: &AggregationLookupParams<'_>) -> GridResult<AggregationLookup> {
    let model = sanitize_aggregation_model(params.model, params.columns);
    let mut lookup = AggregationLookup::default();
    if model.is_empty() {
        return Ok(lookup);
    }

    // Fail before computing anything.
    let mut rules: Vec<(&str, &AggregationFunction)> = Vec::with_capacity(model.len());
    for (field, name) in &model {
        let column = params.columns.get(field);
        let function = params.functions.get(name);
        let Some(function) = function else {
            return Err(GridError::Configuration(format!(
                "Unknown aggregation function \"{}\" on column \"{}\"",
                name, field
            )));
        };
        if !can_column_have_aggregation_function(column, name, Some(function)) {
            let column_type = column.map(|c| format!("{:?}", c.column_type)).unwrap_or_default();
            return Err(GridError::Configuration(format!(
                "The aggregation function \"{}\" is not applicable to the column \"{}\" of type \"{}\"",
                name, field, column_type
            )));
        }
        rules.push((field.as_str(), function));
    }

    for node in params.tree.nodes() {
        let Some((position, source)) = carrier_source(node, params) else {
            continue;
        };

        let mut ids = params.tree.descendants(&source, true);
        if params.aggregated_rows == AggregatedRows::Filtered {
            ids.retain(|id| params.filtered_rows.get(id) != Some(&false));
        }

        let mut cells = BTreeMap::new();
        for (field, function) in &rules {
            let values: Vec<CellValue> = ids
                .iter()
                .map(|id| {
                    params
                        .cache
                        .get(id)
                        .map(|row| row.get(field).clone())
                        .unwrap_or_default()
                })
                .collect();
            cells.insert(
                field.to_string(),
                AggregatedCell {
                    position,
                    value: function.apply(&values),
                },
            );
        }
        lookup.insert(node.id.clone(), cells);
    }

    crate::log_debug!(
        "AGGREGATION",
        "computed {} aggregated fields for {} carrier rows",
        rules.len(),
        lookup.len()
    );

    Ok(lookup)
}

/// For a carrier row, the position it displays and the node whose
/// descendants it aggregates.
fn carrier_source(node: &RowNode, params: &AggregationLookupParams<'_>) -> Option<(AggregationPosition, RowId)> {
    match params.position {
        AggregationPosition::Inline => {
            // Tree-data parents backed by a real row keep their own values.
            if !node.is_group() || node.is_root() || !node.is_auto_generated() {
                return None;
            }
            if let Some(predicate) = params.is_group_aggregated {
                if !predicate(node) {
                    return None;
                }
            }
            Some((AggregationPosition::Inline, node.id.clone()))
        }
        AggregationPosition::Footer => {
            if !node.is_footer() {
                return None;
            }
            let source = node.parent.clone().unwrap_or_else(root_id);
            Some((AggregationPosition::Footer, source))
        }
    }
}
