//! FILENAME: core/engine/src/state.rs
//! PURPOSE: Serializable grid state snapshots (export / restore).
//! CONTEXT: A snapshot is assembled by the `exportState` pipeline and
//! consumed by the `restoreState` pipeline. Features living outside this
//! crate store their part under `extensions`, keyed by feature name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::aggregation::AggregationModel;
use crate::config::PaginationModel;
use crate::error::GridResult;
use crate::pipeline::{PipeProcessor, PipeRegistry, Unregister};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnsInitialState {
    pub ordered_fields: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationInitialState {
    pub pagination_model: PaginationModel,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationInitialState {
    pub model: AggregationModel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridInitialState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<ColumnsInitialState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationInitialState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationInitialState>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl GridInitialState {
    pub fn to_json(&self) -> GridResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> GridResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> GridResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Stores a feature's state under `key`.
    pub fn set_extension<T: Serialize>(&mut self, key: &str, value: &T) -> GridResult<()> {
        self.extensions.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Reads a feature's state. `Ok(None)` when the key is absent.
    pub fn extension<T: for<'de> Deserialize<'de>>(&self, key: &str) -> GridResult<Option<T>> {
        match self.extensions.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }
}

// ============================================================================
// CORE PERSISTENCE PROCESSORS
// ============================================================================

pub const COLUMNS_PROCESSOR: &str = "columns";
pub const PAGINATION_PROCESSOR: &str = "pagination";

/// Export/restore of the column order and the pagination model.
pub fn register_core_state_processors(registry: &PipeRegistry) -> Vec<Unregister> {
    vec![
        registry.register(
            COLUMNS_PROCESSOR,
            PipeProcessor::export_state(|mut exported, context| {
                let ordered_fields = context.state.columns.all.clone();
                let dirty = ordered_fields != context.state.initial_column_order;
                if !context.params.export_only_dirty_models || dirty {
                    exported.columns = Some(ColumnsInitialState { ordered_fields });
                }
                exported
            }),
        ),
        registry.register(
            COLUMNS_PROCESSOR,
            PipeProcessor::restore_state(|mut value, context| {
                if let Some(columns) = &context.state_to_restore.columns {
                    let fields = columns.ordered_fields.clone();
                    value.push(move |engine| engine.set_columns_order(&fields).map(|_| ()));
                }
                value
            }),
        ),
        registry.register(
            PAGINATION_PROCESSOR,
            PipeProcessor::export_state(|mut exported, context| {
                let model = context.state.pagination_model;
                let dirty = model != context.state.config.pagination_model;
                if !context.params.export_only_dirty_models || dirty {
                    exported.pagination = Some(PaginationInitialState {
                        pagination_model: model,
                    });
                }
                exported
            }),
        ),
        registry.register(
            PAGINATION_PROCESSOR,
            PipeProcessor::restore_state(|mut value, context| {
                if let Some(pagination) = &context.state_to_restore.pagination {
                    let model = pagination.pagination_model;
                    value.push(move |engine| {
                        engine.set_pagination_model(model);
                        Ok(())
                    });
                }
                value
            }),
        ),
    ]
}
