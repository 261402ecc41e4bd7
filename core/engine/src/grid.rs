//! FILENAME: core/engine/src/grid.rs
//! PURPOSE: The grid engine - owner of all row/column state.
//! CONTEXT: Every mutation goes through `GridEngine`. Derived state (row
//! tree, aggregation lookup, visible rows) is computed into locals first and
//! only committed once everything succeeded, so readers never observe a
//! half-applied update. Pipeline processors receive `&GridState`; caches
//! that are not part of the observable state (row cache, cell meta,
//! throttle) stay private to the engine.

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::aggregation::processors::register_aggregation_processors;
use crate::aggregation::{
    compute_aggregation_lookup, AggregatedCell, AggregationFunction, AggregationFunctions, AggregationLookup,
    AggregationLookupParams, AggregationModel,
};
use crate::cell_meta::{CalculateColSpanParams, CellMeta, CellMetaLookup};
use crate::columns::{ColumnDef, ColumnsState};
use crate::config::{GridConfig, GridSignature, PaginationModel};
use crate::error::{GridError, GridResult};
use crate::navigation::{navigate, GridFocus, KeyModifiers, NavigationContext, NavigationEffect, NavigationKey, NavigationOutcome};
use crate::pipeline::{
    ColumnMenuContext, ColumnMenuItem, ExportStateContext, ExportStateParams, PipeGroup, PipeProcessor, PipeRegistry,
    RestoreStateContext, RestoreStateValue, Unregister,
};
use crate::rows::builder::{build_row_tree, BuildRowTreeParams, PinnedRow, PinnedRows, RowGroupingStrategy};
use crate::rows::cache::{field_row_id, row_id_from_model, GetRowId, RowUpdate, RowsCache};
use crate::rows::pinning::add_pinned_rows;
use crate::rows::tree::{root_id, RowNode, RowNodeKind, RowTree};
use crate::rows::visible::{page_range, sorted_row_ids, visible_row_ids, PageRange};
use crate::state::{register_core_state_processors, GridInitialState};
use crate::throttle::{Clock, RowsThrottle, SystemClock, ThrottleDecision};
use crate::value::{CellValue, RowId, RowModel};

/// Result of a capability-gated or throttled mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied,
    /// Stored, but the derived state is applied later (throttling).
    Deferred,
    /// Not available for the grid's feature tier. Nothing changed.
    Refused,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GridEvent {
    RowsSet,
    ColumnOrderChange { ordered_fields: Vec<String> },
    RowExpansionChange { id: RowId, expanded: bool },
    AggregationModelChange(AggregationModel),
    /// Serialized pivot model, published by the pivoting feature.
    PivotModelChange(serde_json::Value),
}

pub type GroupAggregatedFn = Rc<dyn Fn(&RowNode) -> bool>;

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RowsState {
    pub tree: RowTree,
    pub data_row_ids: Vec<RowId>,
    pub pinned_rows: PinnedRows,
    /// Number of data rows (synthetic and pinned rows excluded).
    pub total_row_count: usize,
    pub total_top_level_row_count: usize,
    pub grouping_strategy: RowGroupingStrategy,
}

#[derive(Debug, Clone, Default)]
pub struct AggregationState {
    pub model: AggregationModel,
    pub lookup: AggregationLookup,
    pub functions: AggregationFunctions,
}

/// Observable grid state. Handed to every pipeline processor.
#[derive(Debug, Clone, Default)]
pub struct GridState {
    pub config: GridConfig,
    pub rows: RowsState,
    pub columns: ColumnsState,
    /// Column order right after the first hydration (for dirty exports).
    pub initial_column_order: Vec<String>,
    /// Pinned rows as supplied by the host.
    pub pinned_rows_prop: PinnedRows,
    pub aggregation: AggregationState,
    /// `false` marks a row as filtered out.
    pub filtered_rows: FxHashMap<RowId, bool>,
    /// Ids ranked among their siblings; `None` keeps tree order.
    pub sort_order: Option<Vec<RowId>>,
    pub pagination_model: PaginationModel,
    pub visible_rows: Vec<RowId>,
    pub focus: GridFocus,
    /// Field whose column menu is open.
    pub column_menu_open: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupChildrenParams {
    pub group_id: RowId,
    pub skip_auto_generated_rows: bool,
    pub apply_sorting: bool,
    pub apply_filtering: bool,
}

impl GroupChildrenParams {
    pub fn new(group_id: RowId) -> Self {
        GroupChildrenParams {
            group_id,
            skip_auto_generated_rows: true,
            apply_sorting: false,
            apply_filtering: false,
        }
    }
}

// ============================================================================
// BUILDER
// ============================================================================

pub struct GridEngineBuilder {
    config: GridConfig,
    rows: Vec<RowModel>,
    columns: Vec<ColumnDef>,
    get_row_id: Option<GetRowId>,
    strategy: RowGroupingStrategy,
    pinned_top: Vec<RowModel>,
    pinned_bottom: Vec<RowModel>,
    aggregation_model: AggregationModel,
    aggregation_functions: AggregationFunctions,
    is_group_aggregated: Option<GroupAggregatedFn>,
    clock: Box<dyn Clock>,
    initial_state: Option<GridInitialState>,
}

impl Default for GridEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GridEngineBuilder {
    pub fn new() -> Self {
        GridEngineBuilder {
            config: GridConfig::default(),
            rows: Vec::new(),
            columns: Vec::new(),
            get_row_id: None,
            strategy: RowGroupingStrategy::Flat,
            pinned_top: Vec::new(),
            pinned_bottom: Vec::new(),
            aggregation_model: AggregationModel::new(),
            aggregation_functions: AggregationFunctions::builtin(),
            is_group_aggregated: None,
            clock: Box::new(SystemClock),
            initial_state: None,
        }
    }

    pub fn config(mut self, config: GridConfig) -> Self {
        self.config = config;
        self
    }

    pub fn rows(mut self, rows: Vec<RowModel>) -> Self {
        self.rows = rows;
        self
    }

    pub fn columns(mut self, columns: Vec<ColumnDef>) -> Self {
        self.columns = columns;
        self
    }

    pub fn get_row_id(mut self, get_row_id: impl Fn(&RowModel) -> Option<RowId> + 'static) -> Self {
        self.get_row_id = Some(Rc::new(get_row_id));
        self
    }

    pub fn grouping(mut self, strategy: RowGroupingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn pinned_rows(mut self, top: Vec<RowModel>, bottom: Vec<RowModel>) -> Self {
        self.pinned_top = top;
        self.pinned_bottom = bottom;
        self
    }

    pub fn aggregation_model(mut self, model: AggregationModel) -> Self {
        self.aggregation_model = model;
        self
    }

    pub fn aggregation_function(mut self, name: impl Into<String>, function: AggregationFunction) -> Self {
        self.aggregation_functions.insert(name, function);
        self
    }

    pub fn is_group_aggregated(mut self, predicate: impl Fn(&RowNode) -> bool + 'static) -> Self {
        self.is_group_aggregated = Some(Rc::new(predicate));
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn initial_state(mut self, state: GridInitialState) -> Self {
        self.initial_state = Some(state);
        self
    }

    pub fn build(self) -> GridResult<GridEngine> {
        let signature = self.config.signature;
        if let Some(reason) = strategy_refusal(signature, &self.strategy) {
            return Err(GridError::Configuration(reason));
        }
        let has_pinned = !self.pinned_top.is_empty() || !self.pinned_bottom.is_empty();
        if has_pinned && signature < GridSignature::DataGridPro {
            return Err(GridError::Configuration(
                "Row pinning is not available on the DataGrid".to_string(),
            ));
        }

        let get_row_id = self
            .get_row_id
            .unwrap_or_else(|| field_row_id(self.config.row_id_field.clone()));
        let cache = RowsCache::from_rows(&self.rows, &get_row_id)?;
        let pinned_rows_prop = pinned_rows_from_models(&self.pinned_top, &self.pinned_bottom, &get_row_id)?;

        let registry = PipeRegistry::new();
        let mut handles = register_core_state_processors(&registry);
        handles.push(registry.register(
            "rowPinning",
            PipeProcessor::hydrate_rows(|value, state| add_pinned_rows(value, &state.pinned_rows_prop)),
        ));
        handles.extend(register_aggregation_processors(&registry));

        let state = GridState {
            pagination_model: self.config.pagination_model,
            rows: RowsState {
                grouping_strategy: self.strategy,
                ..RowsState::default()
            },
            pinned_rows_prop,
            aggregation: AggregationState {
                model: self.aggregation_model,
                lookup: AggregationLookup::default(),
                functions: self.aggregation_functions,
            },
            config: self.config,
            ..GridState::default()
        };

        let mut engine = GridEngine {
            throttle: RowsThrottle::new(state.config.throttle_rows_ms),
            state,
            cache,
            pending_cache: None,
            get_row_id,
            column_defs: self.columns,
            registry,
            internal_processors: handles,
            cell_meta: CellMetaLookup::new(),
            clock: self.clock,
            is_group_aggregated: self.is_group_aggregated,
            subscribers: Vec::new(),
            next_subscriber_id: 0,
        };

        engine.hydrate_columns();
        engine.state.initial_column_order = engine.state.columns.all.clone();
        engine.hydrate_rows()?;
        let now = engine.clock.now();
        engine.throttle.mark_applied(now);

        crate::log_info!(
            "GRID",
            "engine ready: {} rows, {} columns, {} strategy",
            engine.state.rows.data_row_ids.len(),
            engine.state.columns.all.len(),
            engine.state.rows.grouping_strategy.name()
        );

        if let Some(initial_state) = self.initial_state {
            engine.restore_state(initial_state)?;
        }

        Ok(engine)
    }
}

fn strategy_refusal(signature: GridSignature, strategy: &RowGroupingStrategy) -> Option<String> {
    match strategy {
        RowGroupingStrategy::TreeData(_) if signature < GridSignature::DataGridPro => {
            Some("Tree data is not available on the DataGrid".to_string())
        }
        RowGroupingStrategy::ByFields(fields) if !fields.is_empty() && signature < GridSignature::DataGridPremium => {
            Some("Row grouping requires the DataGridPremium".to_string())
        }
        _ => None,
    }
}

fn pinned_rows_from_models(top: &[RowModel], bottom: &[RowModel], get_row_id: &GetRowId) -> GridResult<PinnedRows> {
    let convert = |models: &[RowModel]| -> GridResult<Vec<PinnedRow>> {
        models
            .iter()
            .map(|model| {
                Ok(PinnedRow {
                    id: row_id_from_model(model, get_row_id)?,
                    model: model.clone(),
                })
            })
            .collect()
    };
    Ok(PinnedRows {
        top: convert(top)?,
        bottom: convert(bottom)?,
    })
}

// ============================================================================
// ENGINE
// ============================================================================

type Subscriber = Box<dyn FnMut(&GridEvent)>;

/// Engine data a failed multi-step operation puts back.
struct EngineSnapshot {
    state: GridState,
    cache: RowsCache,
    pending_cache: Option<RowsCache>,
    column_defs: Vec<ColumnDef>,
    cell_meta: CellMetaLookup,
}

pub struct GridEngine {
    state: GridState,
    cache: RowsCache,
    /// Row set waiting for the throttle. Readers never see it.
    pending_cache: Option<RowsCache>,
    get_row_id: GetRowId,
    column_defs: Vec<ColumnDef>,
    registry: PipeRegistry,
    internal_processors: Vec<Unregister>,
    cell_meta: CellMetaLookup,
    throttle: RowsThrottle,
    clock: Box<dyn Clock>,
    is_group_aggregated: Option<GroupAggregatedFn>,
    subscribers: Vec<(u64, Subscriber)>,
    next_subscriber_id: u64,
}

impl fmt::Debug for GridEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridEngine")
            .field("state", &self.state)
            .field("registry", &self.registry)
            .field("pending_rows", &self.throttle.is_pending())
            .finish()
    }
}

/// Aggregation lookup and visible rows for a candidate tree.
fn derive_row_state(
    state: &GridState,
    cache: &RowsCache,
    tree: &RowTree,
    is_group_aggregated: Option<&dyn Fn(&RowNode) -> bool>,
) -> GridResult<(AggregationLookup, Vec<RowId>)> {
    let aggregation_enabled =
        !state.config.disable_aggregation && state.config.signature >= GridSignature::DataGridPremium;

    let lookup = if aggregation_enabled {
        compute_aggregation_lookup(&AggregationLookupParams {
            tree,
            cache,
            columns: &state.columns,
            model: &state.aggregation.model,
            functions: &state.aggregation.functions,
            position: state.config.aggregation_position,
            aggregated_rows: state.config.aggregated_rows,
            filtered_rows: &state.filtered_rows,
            is_group_aggregated,
        })?
    } else {
        AggregationLookup::default()
    };

    let sorted = sorted_row_ids(tree, state.sort_order.as_deref());
    let visible = visible_row_ids(tree, &sorted, &state.filtered_rows);
    Ok((lookup, visible))
}

impl GridEngine {
    pub fn builder() -> GridEngineBuilder {
        GridEngineBuilder::new()
    }

    pub fn state(&self) -> &GridState {
        &self.state
    }

    pub fn config(&self) -> &GridConfig {
        &self.state.config
    }

    pub fn pipe_registry(&self) -> &PipeRegistry {
        &self.registry
    }

    // ------------------------------------------------------------------
    // Hydration
    // ------------------------------------------------------------------

    fn hydrate_columns(&mut self) {
        let mut base = ColumnsState::from_defs(self.column_defs.clone());

        // Keep the current order of surviving fields; new fields go last.
        if !self.state.columns.all.is_empty() {
            let mut ordered: Vec<String> = self
                .state
                .columns
                .all
                .iter()
                .filter(|field| base.lookup.contains_key(*field))
                .cloned()
                .collect();
            for field in &base.all {
                if !ordered.contains(field) {
                    ordered.push(field.clone());
                }
            }
            base.all = ordered;
        }

        let columns = self.registry.apply_hydrate_columns(base, &self.state);
        self.state.columns = columns;
    }

    fn hydrate_rows(&mut self) -> GridResult<()> {
        let base = build_row_tree(BuildRowTreeParams {
            cache: &self.cache,
            strategy: &self.state.rows.grouping_strategy,
            previous_tree: Some(&self.state.rows.tree),
            default_group_expansion_depth: self.state.config.default_group_expansion_depth,
        })?;
        let value = self.registry.apply_hydrate_rows(base, &self.state);
        let (lookup, visible) = derive_row_state(
            &self.state,
            &self.cache,
            &value.tree,
            self.is_group_aggregated.as_deref(),
        )?;

        let total_row_count = value.data_row_ids.len();
        let total_top_level_row_count = value.tree.depth_counts().get(&0).copied().unwrap_or(0);
        self.state.rows.tree = value.tree;
        self.state.rows.data_row_ids = value.data_row_ids;
        self.state.rows.pinned_rows = value.pinned_rows;
        self.state.rows.total_row_count = total_row_count;
        self.state.rows.total_top_level_row_count = total_top_level_row_count;
        self.state.aggregation.lookup = lookup;
        self.state.visible_rows = visible;
        self.cache.partial_updates = None;

        crate::log_debug!(
            "ROWS",
            "hydrated {} data rows ({} visible)",
            total_row_count,
            self.state.visible_rows.len()
        );
        Ok(())
    }

    /// Recomputes the aggregation lookup and visible rows over the current tree.
    fn refresh_derived(&mut self) -> GridResult<()> {
        let (lookup, visible) = derive_row_state(
            &self.state,
            &self.cache,
            &self.state.rows.tree,
            self.is_group_aggregated.as_deref(),
        )?;
        self.state.aggregation.lookup = lookup;
        self.state.visible_rows = visible;
        Ok(())
    }

    /// Commits the staged row set, if any, and hydrates. A failed hydration
    /// puts the previous cache back.
    fn apply_rows(&mut self) -> GridResult<()> {
        match self.pending_cache.take() {
            Some(pending) => {
                let previous = std::mem::replace(&mut self.cache, pending);
                if let Err(e) = self.hydrate_rows() {
                    self.cache = previous;
                    return Err(e);
                }
            }
            None => self.hydrate_rows()?,
        }
        let now = self.clock.now();
        self.throttle.mark_applied(now);
        self.publish(GridEvent::RowsSet);
        Ok(())
    }

    fn schedule_rows_update(&mut self, throttle: bool) -> GridResult<MutationOutcome> {
        let now = self.clock.now();
        match self.throttle.schedule(now, throttle) {
            ThrottleDecision::ApplyNow => {
                self.apply_rows()?;
                Ok(MutationOutcome::Applied)
            }
            ThrottleDecision::Deferred(_) => {
                crate::log_debug!("ROWS", "row update deferred by throttling");
                Ok(MutationOutcome::Deferred)
            }
        }
    }

    /// Applies a throttled row update once it is due. Returns true if one ran.
    pub fn poll_pending_rows(&mut self) -> GridResult<bool> {
        let now = self.clock.now();
        if self.throttle.poll(now) {
            self.apply_rows()?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn has_pending_rows(&self) -> bool {
        self.throttle.is_pending()
    }

    /// Cancels any pending update and drops the subscribers.
    pub fn teardown(&mut self) {
        self.cancel_pending_rows();
        self.subscribers.clear();
    }

    /// Drops a throttled row update without applying it.
    pub fn cancel_pending_rows(&mut self) -> bool {
        let cancelled = self.throttle.cancel();
        if self.pending_cache.take().is_some() || cancelled {
            crate::log_debug!("GRID", "pending row update cancelled");
            return true;
        }
        false
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn subscribe(&mut self, listener: impl FnMut(&GridEvent) + 'static) -> u64 {
        self.next_subscriber_id += 1;
        self.subscribers.push((self.next_subscriber_id, Box::new(listener)));
        self.next_subscriber_id
    }

    pub fn unsubscribe(&mut self, id: u64) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(existing, _)| *existing != id);
        before != self.subscribers.len()
    }

    pub fn publish(&mut self, event: GridEvent) {
        for (_, listener) in self.subscribers.iter_mut() {
            listener(&event);
        }
    }

    // ------------------------------------------------------------------
    // Pipelines
    // ------------------------------------------------------------------

    /// Registers a processor and re-applies its pipeline.
    pub fn register_pipe_processor(&mut self, name: &str, processor: PipeProcessor) -> GridResult<Unregister> {
        let group = processor.group();
        let handle = self.registry.register(name, processor);
        self.refresh_pipeline(group)?;
        Ok(handle)
    }

    pub fn unregister_pipe_processor(&mut self, handle: Unregister) -> GridResult<bool> {
        let group = handle.group();
        let removed = handle.unregister();
        if removed {
            self.refresh_pipeline(group)?;
        }
        Ok(removed)
    }

    /// Re-runs a hydration pipeline after its inputs changed.
    pub fn refresh_pipeline(&mut self, group: PipeGroup) -> GridResult<()> {
        match group {
            PipeGroup::HydrateColumns => {
                self.hydrate_columns();
                self.hydrate_rows()
            }
            PipeGroup::HydrateRows => self.hydrate_rows(),
            PipeGroup::ExportState | PipeGroup::RestoreState | PipeGroup::ColumnMenu => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Rows
    // ------------------------------------------------------------------

    /// Replaces the row set. Subject to throttling.
    pub fn set_rows(&mut self, rows: Vec<RowModel>) -> GridResult<MutationOutcome> {
        let cache = RowsCache::from_rows(&rows, &self.get_row_id)?;
        self.pending_cache = Some(cache);
        self.schedule_rows_update(true)
    }

    /// Replaces the row set and applies it at once.
    pub fn force_set_rows(&mut self, rows: Vec<RowModel>) -> GridResult<()> {
        let cache = RowsCache::from_rows(&rows, &self.get_row_id)?;
        self.pending_cache = Some(cache);
        self.schedule_rows_update(false).map(|_| ())
    }

    /// Inserts, merges or deletes rows. Subject to throttling.
    pub fn update_rows(&mut self, updates: &[RowUpdate]) -> GridResult<MutationOutcome> {
        if updates.len() > 1 && self.state.config.signature < GridSignature::DataGridPro {
            crate::log_warn!("ROWS", "you can't update several rows at once on the DataGrid");
            return Ok(MutationOutcome::Refused);
        }
        let base = self.pending_cache.as_ref().unwrap_or(&self.cache);
        // A pending full replacement cannot be patched incrementally.
        let full_rebuild = self.pending_cache.is_some() && base.partial_updates.is_none();
        let mut cache = base.with_updates(updates, &self.get_row_id)?;
        if full_rebuild {
            cache.partial_updates = None;
        }
        self.pending_cache = Some(cache);
        self.schedule_rows_update(true)
    }

    pub fn set_row_grouping_strategy(&mut self, strategy: RowGroupingStrategy) -> GridResult<MutationOutcome> {
        if let Some(reason) = strategy_refusal(self.state.config.signature, &strategy) {
            crate::log_warn!("ROWS", "{}", reason);
            return Ok(MutationOutcome::Refused);
        }
        let previous = std::mem::replace(&mut self.state.rows.grouping_strategy, strategy);
        if let Err(e) = self.schedule_rows_update(false) {
            self.state.rows.grouping_strategy = previous;
            return Err(e);
        }
        Ok(MutationOutcome::Applied)
    }

    pub fn set_pinned_rows(&mut self, top: Vec<RowModel>, bottom: Vec<RowModel>) -> GridResult<MutationOutcome> {
        if self.state.config.signature < GridSignature::DataGridPro {
            crate::log_warn!("PINNING", "row pinning is not available on the DataGrid");
            return Ok(MutationOutcome::Refused);
        }
        let pinned = pinned_rows_from_models(&top, &bottom, &self.get_row_id)?;
        let previous = std::mem::replace(&mut self.state.pinned_rows_prop, pinned);
        if let Err(e) = self.schedule_rows_update(false) {
            self.state.pinned_rows_prop = previous;
            return Err(e);
        }
        Ok(MutationOutcome::Applied)
    }

    /// A data row or a pinned row.
    pub fn get_row(&self, id: &RowId) -> Option<&RowModel> {
        self.cache
            .get(id)
            .or_else(|| self.state.rows.pinned_rows.get(id).map(|row| &row.model))
    }

    /// Data rows in source order.
    pub fn get_row_models(&self) -> Vec<(&RowId, &RowModel)> {
        self.cache
            .data_row_ids
            .iter()
            .filter_map(|id| self.cache.get(id).map(|model| (id, model)))
            .collect()
    }

    pub fn get_rows_count(&self) -> usize {
        self.state.rows.total_row_count
    }

    pub fn get_all_row_ids(&self) -> &[RowId] {
        &self.state.rows.data_row_ids
    }

    pub fn get_row_node(&self, id: &RowId) -> Option<&RowNode> {
        self.state.rows.tree.get(id)
    }

    pub fn get_pinned_rows(&self) -> &PinnedRows {
        &self.state.rows.pinned_rows
    }

    pub fn get_row_index_relative_to_visible_rows(&self, id: &RowId) -> Option<usize> {
        self.state.visible_rows.iter().position(|existing| existing == id)
    }

    pub fn set_row_children_expansion(&mut self, id: &RowId, expanded: bool) -> GridResult<()> {
        let node = self
            .state
            .rows
            .tree
            .get_mut(id)
            .ok_or_else(|| GridError::MissingRow(id.clone()))?;
        if node.is_root() {
            return Err(GridError::NotAGroup(id.clone()));
        }
        match &mut node.kind {
            RowNodeKind::Group { children_expanded, .. } => *children_expanded = expanded,
            _ => return Err(GridError::NotAGroup(id.clone())),
        }

        let sorted = sorted_row_ids(&self.state.rows.tree, self.state.sort_order.as_deref());
        self.state.visible_rows = visible_row_ids(&self.state.rows.tree, &sorted, &self.state.filtered_rows);
        self.publish(GridEvent::RowExpansionChange {
            id: id.clone(),
            expanded,
        });
        Ok(())
    }

    pub fn get_row_group_children(&self, params: &GroupChildrenParams) -> GridResult<Vec<RowId>> {
        let tree = &self.state.rows.tree;
        let group = tree
            .get(&params.group_id)
            .ok_or_else(|| GridError::MissingRow(params.group_id.clone()))?;

        let mut children: Vec<RowId> = if params.apply_sorting {
            let sorted = sorted_row_ids(tree, self.state.sort_order.as_deref());
            let start = if group.is_root() {
                0
            } else {
                sorted
                    .iter()
                    .position(|id| id == &params.group_id)
                    .map_or(sorted.len(), |index| index + 1)
            };
            sorted[start..]
                .iter()
                .filter_map(|id| tree.get(id))
                .take_while(|node| node.depth > group.depth)
                .filter(|node| !params.skip_auto_generated_rows || !node.is_auto_generated())
                .map(|node| node.id.clone())
                .collect()
        } else {
            tree.descendants(&params.group_id, params.skip_auto_generated_rows)
        };

        if params.apply_filtering {
            children.retain(|id| self.state.filtered_rows.get(id) != Some(&false));
        }
        Ok(children)
    }

    /// Moves a row within its parent's children.
    pub fn set_row_index(&mut self, id: &RowId, target_index: usize) -> GridResult<MutationOutcome> {
        if self.state.config.signature < GridSignature::DataGridPro {
            crate::log_warn!("ROWS", "row reordering is not available on the DataGrid");
            return Ok(MutationOutcome::Refused);
        }
        let node = self
            .state
            .rows
            .tree
            .get(id)
            .ok_or_else(|| GridError::MissingRow(id.clone()))?;
        if node.is_group() || node.is_footer() || node.is_pinned() {
            crate::log_warn!("ROWS", "row reordering does not support group, footer or pinned rows");
            return Ok(MutationOutcome::Refused);
        }
        let parent_id = node.parent.clone().unwrap_or_else(root_id);

        if let Some(RowNodeKind::Group { children, .. }) =
            self.state.rows.tree.get_mut(&parent_id).map(|parent| &mut parent.kind)
        {
            if let Some(old_index) = children.iter().position(|child| child == id) {
                let moved = children.remove(old_index);
                let target = target_index.min(children.len());
                children.insert(target, moved);
            }
        }

        self.refresh_derived()?;
        self.publish(GridEvent::RowsSet);
        Ok(MutationOutcome::Applied)
    }

    // ------------------------------------------------------------------
    // Filtering, sorting, pagination inputs
    // ------------------------------------------------------------------

    pub fn set_filtered_rows(&mut self, filtered_rows: FxHashMap<RowId, bool>) -> GridResult<()> {
        let previous = std::mem::replace(&mut self.state.filtered_rows, filtered_rows);
        if let Err(e) = self.refresh_derived() {
            self.state.filtered_rows = previous;
            return Err(e);
        }
        Ok(())
    }

    pub fn set_sort_order(&mut self, sort_order: Option<Vec<RowId>>) {
        self.state.sort_order = sort_order;
        let sorted = sorted_row_ids(&self.state.rows.tree, self.state.sort_order.as_deref());
        self.state.visible_rows = visible_row_ids(&self.state.rows.tree, &sorted, &self.state.filtered_rows);
    }

    pub fn get_sorted_row_ids(&self) -> Vec<RowId> {
        sorted_row_ids(&self.state.rows.tree, self.state.sort_order.as_deref())
    }

    pub fn get_visible_rows(&self) -> &[RowId] {
        &self.state.visible_rows
    }

    pub fn set_pagination_model(&mut self, model: PaginationModel) {
        self.state.pagination_model = model;
    }

    pub fn get_pagination_model(&self) -> PaginationModel {
        self.state.pagination_model
    }

    pub fn get_current_page_range(&self) -> Option<PageRange> {
        page_range(
            self.state.visible_rows.len(),
            self.state.config.pagination,
            &self.state.pagination_model,
        )
    }

    /// Visible rows of the current page.
    pub fn get_current_page_rows(&self) -> &[RowId] {
        match self.get_current_page_range() {
            Some(range) => &self.state.visible_rows[range.first_row_index..=range.last_row_index],
            None => &[],
        }
    }

    // ------------------------------------------------------------------
    // Columns
    // ------------------------------------------------------------------

    pub fn set_columns(&mut self, columns: Vec<ColumnDef>) -> GridResult<()> {
        let previous_defs = std::mem::replace(&mut self.column_defs, columns);
        let previous_columns = self.state.columns.clone();
        self.hydrate_columns();
        if let Err(e) = self.hydrate_rows() {
            self.column_defs = previous_defs;
            self.state.columns = previous_columns;
            return Err(e);
        }
        self.cell_meta.clear();
        Ok(())
    }

    /// Column definitions as supplied, before hydration.
    pub fn column_defs(&self) -> &[ColumnDef] {
        &self.column_defs
    }

    pub fn get_column(&self, field: &str) -> Option<&ColumnDef> {
        self.state.columns.get(field)
    }

    pub fn get_all_columns(&self) -> Vec<&ColumnDef> {
        self.state
            .columns
            .all
            .iter()
            .filter_map(|field| self.state.columns.get(field))
            .collect()
    }

    pub fn get_visible_columns(&self) -> Vec<&ColumnDef> {
        self.state.columns.visible_columns()
    }

    /// Index of `field` among the visible columns.
    pub fn get_column_index(&self, field: &str) -> Option<usize> {
        self.state.columns.visible_index(field)
    }

    /// Moves a column in the ordered field list.
    pub fn set_column_index(&mut self, field: &str, target_index: usize) -> GridResult<()> {
        if self.state.columns.get(field).is_none() {
            return Err(GridError::MissingColumn(field.to_string()));
        }
        if self.state.columns.move_column(field, target_index) {
            self.on_column_order_change();
        }
        Ok(())
    }

    /// Reorders the columns. Unknown fields are ignored; fields not listed
    /// keep their relative order after the listed ones.
    pub fn set_columns_order(&mut self, fields: &[String]) -> GridResult<()> {
        let mut ordered: Vec<String> = fields
            .iter()
            .filter(|field| self.state.columns.get(field).is_some())
            .cloned()
            .collect();
        for field in &self.state.columns.all {
            if !ordered.contains(field) {
                ordered.push(field.clone());
            }
        }
        if ordered != self.state.columns.all {
            self.state.columns.all = ordered;
            self.on_column_order_change();
        }
        Ok(())
    }

    fn on_column_order_change(&mut self) {
        // Spans are resolved per column index.
        self.cell_meta.clear();
        let ordered_fields = self.state.columns.all.clone();
        self.publish(GridEvent::ColumnOrderChange { ordered_fields });
    }

    pub fn get_column_menu_items(&self, field: &str) -> GridResult<Vec<ColumnMenuItem>> {
        let column = self
            .state
            .columns
            .get(field)
            .ok_or_else(|| GridError::MissingColumn(field.to_string()))?;
        let base = vec![
            ColumnMenuItem::action("sortAsc", "Sort by ASC"),
            ColumnMenuItem::action("sortDesc", "Sort by DESC"),
            ColumnMenuItem::action("filter", "Filter"),
            ColumnMenuItem::action("hideColumn", "Hide"),
            ColumnMenuItem::action("manageColumns", "Show columns"),
        ];
        Ok(self.registry.apply_column_menu(
            base,
            &ColumnMenuContext {
                state: &self.state,
                column,
            },
        ))
    }

    pub fn toggle_column_menu(&mut self, field: &str) {
        self.state.column_menu_open = match &self.state.column_menu_open {
            Some(open) if open == field => None,
            _ => Some(field.to_string()),
        };
    }

    // ------------------------------------------------------------------
    // Aggregation
    // ------------------------------------------------------------------

    pub fn get_aggregation_model(&self) -> &AggregationModel {
        &self.state.aggregation.model
    }

    /// Validates and applies a new aggregation model. On error nothing changes.
    pub fn set_aggregation_model(&mut self, model: AggregationModel) -> GridResult<MutationOutcome> {
        if self.state.config.signature < GridSignature::DataGridPremium || self.state.config.disable_aggregation {
            crate::log_warn!("AGGREGATION", "aggregation is not available on this grid");
            return Ok(MutationOutcome::Refused);
        }
        if model == self.state.aggregation.model {
            return Ok(MutationOutcome::Applied);
        }

        let previous = std::mem::replace(&mut self.state.aggregation.model, model);
        let previous_columns = self.state.columns.clone();
        self.hydrate_columns();
        if let Err(e) = self.hydrate_rows() {
            self.state.aggregation.model = previous;
            self.state.columns = previous_columns;
            return Err(e);
        }

        let model = self.state.aggregation.model.clone();
        crate::log_info!("AGGREGATION", "aggregation model set ({} fields)", model.len());
        self.publish(GridEvent::AggregationModelChange(model));
        Ok(MutationOutcome::Applied)
    }

    pub fn get_aggregation_lookup(&self) -> &AggregationLookup {
        &self.state.aggregation.lookup
    }

    pub fn aggregation_functions(&self) -> &AggregationFunctions {
        &self.state.aggregation.functions
    }

    pub fn register_aggregation_function(&mut self, name: &str, function: AggregationFunction) -> GridResult<()> {
        self.state.aggregation.functions.insert(name, function);
        self.refresh_pipeline(PipeGroup::HydrateColumns)
    }

    /// The aggregated value for carrier rows, the row's own value otherwise.
    pub fn get_cell_value(&self, id: &RowId, field: &str) -> CellValue {
        if let Some(AggregatedCell { value, .. }) = self.state.aggregation.lookup.get(id).and_then(|cells| cells.get(field)) {
            return value.clone();
        }
        self.get_row(id)
            .map(|row| row.get(field).clone())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Column spanning
    // ------------------------------------------------------------------

    /// Resolves spans of `row_id` for visible columns in `[min_first_column, max_last_column)`.
    /// Group and footer rows span with an empty model.
    pub fn calculate_col_span(
        &mut self,
        row_id: &RowId,
        min_first_column: usize,
        max_last_column: usize,
    ) -> GridResult<()> {
        let empty = RowModel::new();
        let found = self
            .cache
            .get(row_id)
            .or_else(|| self.state.rows.pinned_rows.get(row_id).map(|r| &r.model));
        let row = match found {
            Some(row) => row,
            None if self.state.rows.tree.get(row_id).is_some() => &empty,
            None => return Err(GridError::MissingRow(row_id.clone())),
        };
        let columns = self.state.columns.visible_columns();
        self.cell_meta.calculate_col_span(&CalculateColSpanParams {
            row_id,
            row,
            columns: &columns,
            min_first_column,
            max_last_column,
        });
        Ok(())
    }

    pub fn get_cell_meta(&self, row_id: &RowId, column_index: usize) -> Option<&CellMeta> {
        self.cell_meta.get_cell_meta(row_id, column_index)
    }

    // ------------------------------------------------------------------
    // Keyboard navigation
    // ------------------------------------------------------------------

    pub fn focus(&self) -> GridFocus {
        self.state.focus
    }

    pub fn set_cell_focus(&mut self, row_index: usize, col_index: usize) {
        self.state.focus = GridFocus::Cell { row_index, col_index };
    }

    pub fn set_column_header_focus(&mut self, col_index: usize) {
        self.state.focus = GridFocus::ColumnHeader { col_index };
    }

    pub fn handle_key(&mut self, key: NavigationKey, modifiers: KeyModifiers) -> NavigationOutcome {
        let (focus, outcome) = {
            let visible = &self.state.visible_rows;
            let cell_meta = &self.cell_meta;
            let meta = |row_index: usize, col_index: usize| {
                visible
                    .get(row_index)
                    .and_then(|id| cell_meta.get_cell_meta(id, col_index))
                    .cloned()
            };
            let context = NavigationContext {
                page_range: self.get_current_page_range(),
                col_count: self.state.columns.visible_columns().len(),
                viewport_page_size: self.state.config.viewport_page_size,
                cell_meta: &meta,
            };
            navigate(self.state.focus, key, modifiers, &context)
        };

        self.state.focus = focus;
        for effect in &outcome.effects {
            if let NavigationEffect::ToggleColumnMenu { col_index } = effect {
                let field = self
                    .state
                    .columns
                    .visible_columns()
                    .get(*col_index)
                    .map(|column| column.field.clone());
                if let Some(field) = field {
                    self.toggle_column_menu(&field);
                }
            }
        }
        outcome
    }

    // ------------------------------------------------------------------
    // State persistence
    // ------------------------------------------------------------------

    pub fn export_state(&self, params: ExportStateParams) -> GridInitialState {
        self.registry.apply_export_state(
            GridInitialState::default(),
            &ExportStateContext {
                state: &self.state,
                params,
            },
        )
    }

    pub fn restore_state(&mut self, snapshot: GridInitialState) -> GridResult<()> {
        let value = self.registry.apply_restore_state(
            RestoreStateValue::default(),
            &RestoreStateContext {
                state: &self.state,
                state_to_restore: &snapshot,
            },
        );
        // Callbacks apply one after another, so a failure puts back
        // everything the earlier ones changed.
        let snapshot = self.snapshot();
        for callback in value.callbacks {
            if let Err(e) = callback(self) {
                crate::log_warn!("GRID", "state restore failed, rolling back: {}", e);
                self.rollback(snapshot);
                return Err(e);
            }
        }
        crate::log_info!("GRID", "state restored");
        Ok(())
    }

    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.state.clone(),
            cache: self.cache.clone(),
            pending_cache: self.pending_cache.clone(),
            column_defs: self.column_defs.clone(),
            cell_meta: self.cell_meta.clone(),
        }
    }

    fn rollback(&mut self, snapshot: EngineSnapshot) {
        self.state = snapshot.state;
        self.cache = snapshot.cache;
        self.pending_cache = snapshot.pending_cache;
        self.column_defs = snapshot.column_defs;
        self.cell_meta = snapshot.cell_meta;
    }

    /// Names of the processors the engine registered for itself.
    pub fn internal_processors(&self) -> Vec<(PipeGroup, &str)> {
        self.internal_processors
            .iter()
            .map(|handle| (handle.group(), handle.name()))
            .collect()
    }
}
