//! FILENAME: core/engine/src/aggregation/processors.rs
//! PURPOSE: Hooks the aggregation feature into the grid pipelines.
//! CONTEXT: Registered by the engine at construction. Every processor reads
//! the aggregation model and functions from the `GridState` it is given, so
//! re-applying a pipeline after a model change is enough to refresh it.

use crate::aggregation::footer::add_footer_rows;
use crate::aggregation::functions::available_aggregation_functions;
use crate::aggregation::lookup::get_aggregation_rules;
use crate::columns::ColumnAggregation;
use crate::config::{AggregationPosition, GridSignature};
use crate::grid::GridState;
use crate::pipeline::{AggregationMenuOption, ColumnMenuItem, PipeProcessor, PipeRegistry, Unregister};
use crate::state::AggregationInitialState;

pub const AGGREGATION_PROCESSOR: &str = "aggregation";

fn aggregation_enabled(state: &GridState) -> bool {
    !state.config.disable_aggregation && state.config.signature >= GridSignature::DataGridPremium
}

pub fn register_aggregation_processors(registry: &PipeRegistry) -> Vec<Unregister> {
    vec![
        registry.register(
            AGGREGATION_PROCESSOR,
            PipeProcessor::hydrate_columns(|mut columns, state| {
                let rules = if aggregation_enabled(state) {
                    get_aggregation_rules(&columns, &state.aggregation.model, &state.aggregation.functions)
                } else {
                    Default::default()
                };
                for field in &columns.all {
                    let Some(column) = columns.lookup.get_mut(field) else {
                        continue;
                    };
                    column.aggregation = rules.get(field).map(|rule| ColumnAggregation {
                        function_name: rule.function_name.clone(),
                        label: state.aggregation.functions.label(&rule.function_name),
                    });
                }
                columns
            }),
        ),
        registry.register(
            AGGREGATION_PROCESSOR,
            PipeProcessor::hydrate_rows(|value, state| {
                if !aggregation_enabled(state) || state.config.aggregation_position != AggregationPosition::Footer {
                    return value;
                }
                let rules = get_aggregation_rules(
                    &state.columns,
                    &state.aggregation.model,
                    &state.aggregation.functions,
                );
                if rules.is_empty() {
                    return value;
                }
                add_footer_rows(value)
            }),
        ),
        registry.register(
            AGGREGATION_PROCESSOR,
            PipeProcessor::column_menu(|mut items, context| {
                if !aggregation_enabled(context.state) {
                    return items;
                }
                let functions = &context.state.aggregation.functions;
                let available = available_aggregation_functions(functions, context.column);
                if available.is_empty() {
                    return items;
                }
                items.push(ColumnMenuItem::Divider);
                items.push(ColumnMenuItem::AggregationSelector {
                    field: context.column.field.clone(),
                    selected: context.state.aggregation.model.get(&context.column.field).cloned(),
                    options: available
                        .into_iter()
                        .map(|name| AggregationMenuOption {
                            label: functions.label(&name),
                            name,
                        })
                        .collect(),
                });
                items
            }),
        ),
        registry.register(
            AGGREGATION_PROCESSOR,
            PipeProcessor::export_state(|mut exported, context| {
                if context.state.config.disable_aggregation || context.state.aggregation.model.is_empty() {
                    return exported;
                }
                exported.aggregation = Some(AggregationInitialState {
                    model: context.state.aggregation.model.clone(),
                });
                exported
            }),
        ),
        registry.register(
            AGGREGATION_PROCESSOR,
            PipeProcessor::restore_state(|mut value, context| {
                if context.state.config.disable_aggregation {
                    return value;
                }
                if let Some(aggregation) = &context.state_to_restore.aggregation {
                    let model = aggregation.model.clone();
                    value.push(move |engine| engine.set_aggregation_model(model).map(|_| ()));
                }
                value
            }),
        ),
    ]
}
