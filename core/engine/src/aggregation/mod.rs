//! FILENAME: core/engine/src/aggregation/mod.rs
//! PURPOSE: Aggregation feature: functions, lookup computation, footers and
//! the pipeline processors tying them into the engine.

pub mod footer;
pub mod functions;
pub mod lookup;
pub mod processors;

pub use footer::{add_footer_rows, footer_row_id};
pub use functions::{
    available_aggregation_functions, can_column_have_aggregation_function, AggregateAccumulator,
    AggregationApplyFn, AggregationFunction, AggregationFunctions, AggregationReducer,
};
pub use lookup::{
    compute_aggregation_lookup, get_aggregation_rules, sanitize_aggregation_model, AggregatedCell,
    AggregationLookup, AggregationLookupParams, AggregationModel, AggregationRule, AggregationRules,
};
