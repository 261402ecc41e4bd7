//! FILENAME: core/engine/src/pipeline.rs
//! PURPOSE: Typed registry of pre-processors for the grid pipelines.
//! CONTEXT: Features (aggregation, pinning, pivoting, persistence) hook into
//! the engine by registering a named processor in one of five groups:
//! - hydrateRows: post-process the row tree produced by the builder
//! - hydrateColumns: post-process the column state
//! - exportState / restoreState: contribute to state snapshots
//! - columnMenu: contribute items to a column's menu
//!
//! The processor variant fixes its group, so a processor can never be
//! applied with the wrong value type. Processors of a group run in
//! registration order; re-registering a name replaces the processor in place.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;

use crate::columns::{ColumnDef, ColumnsState};
use crate::error::GridResult;
use crate::grid::{GridEngine, GridState};
use crate::rows::HydrateRowsValue;
use crate::state::GridInitialState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipeGroup {
    HydrateRows,
    HydrateColumns,
    ExportState,
    RestoreState,
    ColumnMenu,
}

// ============================================================================
// PROCESSOR CONTEXTS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportStateParams {
    /// Only export models that differ from their initial value.
    pub export_only_dirty_models: bool,
}

pub struct ExportStateContext<'a> {
    pub state: &'a GridState,
    pub params: ExportStateParams,
}

/// Deferred work queued by `restoreState` processors. Callbacks run once
/// every processor has seen the snapshot.
pub type RestoreCallback = Box<dyn FnOnce(&mut GridEngine) -> GridResult<()>>;

#[derive(Default)]
pub struct RestoreStateValue {
    pub callbacks: Vec<RestoreCallback>,
}

impl RestoreStateValue {
    pub fn push(&mut self, callback: impl FnOnce(&mut GridEngine) -> GridResult<()> + 'static) {
        self.callbacks.push(Box::new(callback));
    }
}

impl fmt::Debug for RestoreStateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RestoreStateValue({} callbacks)", self.callbacks.len())
    }
}

pub struct RestoreStateContext<'a> {
    pub state: &'a GridState,
    pub state_to_restore: &'a GridInitialState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationMenuOption {
    pub name: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnMenuItem {
    Divider,
    Action {
        key: String,
        label: String,
    },
    AggregationSelector {
        field: String,
        selected: Option<String>,
        options: Vec<AggregationMenuOption>,
    },
}

impl ColumnMenuItem {
    pub fn action(key: impl Into<String>, label: impl Into<String>) -> Self {
        ColumnMenuItem::Action {
            key: key.into(),
            label: label.into(),
        }
    }
}

pub struct ColumnMenuContext<'a> {
    pub state: &'a GridState,
    pub column: &'a ColumnDef,
}

// ============================================================================
// PROCESSORS
// ============================================================================

pub type HydrateRowsFn = dyn Fn(HydrateRowsValue, &GridState) -> HydrateRowsValue;
pub type HydrateColumnsFn = dyn Fn(ColumnsState, &GridState) -> ColumnsState;
pub type ExportStateFn = dyn Fn(GridInitialState, &ExportStateContext<'_>) -> GridInitialState;
pub type RestoreStateFn = dyn Fn(RestoreStateValue, &RestoreStateContext<'_>) -> RestoreStateValue;
pub type ColumnMenuFn = dyn Fn(Vec<ColumnMenuItem>, &ColumnMenuContext<'_>) -> Vec<ColumnMenuItem>;

pub enum PipeProcessor {
    HydrateRows(Box<HydrateRowsFn>),
    HydrateColumns(Box<HydrateColumnsFn>),
    ExportState(Box<ExportStateFn>),
    RestoreState(Box<RestoreStateFn>),
    ColumnMenu(Box<ColumnMenuFn>),
}

impl PipeProcessor {
    pub fn hydrate_rows(f: impl Fn(HydrateRowsValue, &GridState) -> HydrateRowsValue + 'static) -> Self {
        PipeProcessor::HydrateRows(Box::new(f))
    }

    pub fn hydrate_columns(f: impl Fn(ColumnsState, &GridState) -> ColumnsState + 'static) -> Self {
        PipeProcessor::HydrateColumns(Box::new(f))
    }

    pub fn export_state(
        f: impl Fn(GridInitialState, &ExportStateContext<'_>) -> GridInitialState + 'static,
    ) -> Self {
        PipeProcessor::ExportState(Box::new(f))
    }

    pub fn restore_state(
        f: impl Fn(RestoreStateValue, &RestoreStateContext<'_>) -> RestoreStateValue + 'static,
    ) -> Self {
        PipeProcessor::RestoreState(Box::new(f))
    }

    pub fn column_menu(
        f: impl Fn(Vec<ColumnMenuItem>, &ColumnMenuContext<'_>) -> Vec<ColumnMenuItem> + 'static,
    ) -> Self {
        PipeProcessor::ColumnMenu(Box::new(f))
    }

    pub fn group(&self) -> PipeGroup {
        match self {
            PipeProcessor::HydrateRows(_) => PipeGroup::HydrateRows,
            PipeProcessor::HydrateColumns(_) => PipeGroup::HydrateColumns,
            PipeProcessor::ExportState(_) => PipeGroup::ExportState,
            PipeProcessor::RestoreState(_) => PipeGroup::RestoreState,
            PipeProcessor::ColumnMenu(_) => PipeGroup::ColumnMenu,
        }
    }
}

impl fmt::Debug for PipeProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PipeProcessor::{:?}", self.group())
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

struct RegisteredProcessor {
    name: String,
    generation: u64,
    processor: Rc<PipeProcessor>,
}

#[derive(Default)]
struct RegistryInner {
    groups: FxHashMap<PipeGroup, Vec<RegisteredProcessor>>,
    next_generation: u64,
}

/// Shared handle on the processor registry. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct PipeRegistry {
    inner: Rc<RefCell<RegistryInner>>,
}

/// Returned by `PipeRegistry::register`. Unregistering after the processor
/// was replaced under the same name leaves the replacement in place.
#[derive(Debug)]
pub struct Unregister {
    registry: Weak<RefCell<RegistryInner>>,
    group: PipeGroup,
    name: String,
    generation: u64,
}

impl Unregister {
    pub fn group(&self) -> PipeGroup {
        self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Removes the processor. Returns false when the handle was stale.
    pub fn unregister(self) -> bool {
        let Some(inner) = self.registry.upgrade() else {
            return false;
        };
        let mut inner = inner.borrow_mut();
        let Some(entries) = inner.groups.get_mut(&self.group) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| !(entry.name == self.name && entry.generation == self.generation));
        before != entries.len()
    }
}

impl PipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, processor: PipeProcessor) -> Unregister {
        let name = name.into();
        let group = processor.group();
        let mut inner = self.inner.borrow_mut();
        inner.next_generation += 1;
        let generation = inner.next_generation;

        let entries = inner.groups.entry(group).or_default();
        let processor = Rc::new(processor);
        match entries.iter_mut().find(|entry| entry.name == name) {
            Some(existing) => {
                existing.generation = generation;
                existing.processor = processor;
            }
            None => entries.push(RegisteredProcessor {
                name: name.clone(),
                generation,
                processor,
            }),
        }

        crate::log_debug!("PIPELINE", "registered {:?} processor '{}'", group, name);

        Unregister {
            registry: Rc::downgrade(&self.inner),
            group,
            name,
            generation,
        }
    }

    /// Names of the processors of `group`, in application order.
    pub fn processor_names(&self, group: PipeGroup) -> Vec<String> {
        self.inner
            .borrow()
            .groups
            .get(&group)
            .map(|entries| entries.iter().map(|e| e.name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn has_processors(&self, group: PipeGroup) -> bool {
        self.inner
            .borrow()
            .groups
            .get(&group)
            .is_some_and(|entries| !entries.is_empty())
    }

    // Processors are cloned out before running so that a processor may touch
    // the registry without a borrow conflict.
    fn snapshot(&self, group: PipeGroup) -> Vec<Rc<PipeProcessor>> {
        self.inner
            .borrow()
            .groups
            .get(&group)
            .map(|entries| entries.iter().map(|e| Rc::clone(&e.processor)).collect())
            .unwrap_or_default()
    }

    pub fn apply_hydrate_rows(&self, value: HydrateRowsValue, state: &GridState) -> HydrateRowsValue {
        self.snapshot(PipeGroup::HydrateRows)
            .iter()
            .fold(value, |acc, processor| match processor.as_ref() {
                PipeProcessor::HydrateRows(f) => f(acc, state),
                _ => acc,
            })
    }

    pub fn apply_hydrate_columns(&self, value: ColumnsState, state: &GridState) -> ColumnsState {
        self.snapshot(PipeGroup::HydrateColumns)
            .iter()
            .fold(value, |acc, processor| match processor.as_ref() {
                PipeProcessor::HydrateColumns(f) => f(acc, state),
                _ => acc,
            })
    }

    pub fn apply_export_state(
        &self,
        value: GridInitialState,
        context: &ExportStateContext<'_>,
    ) -> GridInitialState {
        self.snapshot(PipeGroup::ExportState)
            .iter()
            .fold(value, |acc, processor| match processor.as_ref() {
                PipeProcessor::ExportState(f) => f(acc, context),
                _ => acc,
            })
    }

    pub fn apply_restore_state(
        &self,
        value: RestoreStateValue,
        context: &RestoreStateContext<'_>,
    ) -> RestoreStateValue {
        self.snapshot(PipeGroup::RestoreState)
            .iter()
            .fold(value, |acc, processor| match processor.as_ref() {
                PipeProcessor::RestoreState(f) => f(acc, context),
                _ => acc,
            })
    }

    pub fn apply_column_menu(
        &self,
        value: Vec<ColumnMenuItem>,
        context: &ColumnMenuContext<'_>,
    ) -> Vec<ColumnMenuItem> {
        self.snapshot(PipeGroup::ColumnMenu)
            .iter()
            .fold(value, |acc, processor| match processor.as_ref() {
                PipeProcessor::ColumnMenu(f) => f(acc, context),
                _ => acc,
            })
    }
}

impl fmt::Debug for PipeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        let mut map = f.debug_map();
        for (group, entries) in &inner.groups {
            let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
            map.entry(group, &names);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::ColumnDef;

    fn state() -> GridState {
        GridState::default()
    }

    fn append_column(field: &'static str) -> PipeProcessor {
        PipeProcessor::hydrate_columns(move |mut columns, _| {
            if columns.get(field).is_none() {
                columns.all.push(field.to_string());
                columns.lookup.insert(field.to_string(), ColumnDef::new(field));
            }
            columns
        })
    }

    #[test]
    fn test_processors_run_in_registration_order() {
        let registry = PipeRegistry::new();
        let _a = registry.register("a", append_column("a"));
        let _b = registry.register("b", append_column("b"));
        let result = registry.apply_hydrate_columns(ColumnsState::default(), &state());
        assert_eq!(result.all, vec!["a", "b"]);
    }

    #[test]
    fn test_reregister_replaces_in_place() {
        let registry = PipeRegistry::new();
        let _a = registry.register("a", append_column("x"));
        let _b = registry.register("b", append_column("b"));
        let _a2 = registry.register("a", append_column("a"));
        assert_eq!(registry.processor_names(PipeGroup::HydrateColumns), vec!["a", "b"]);
        let result = registry.apply_hydrate_columns(ColumnsState::default(), &state());
        assert_eq!(result.all, vec!["a", "b"]);
    }

    #[test]
    fn test_stale_unregister_is_noop() {
        let registry = PipeRegistry::new();
        let first = registry.register("a", append_column("x"));
        let second = registry.register("a", append_column("a"));
        assert!(!first.unregister());
        assert!(registry.has_processors(PipeGroup::HydrateColumns));
        assert!(second.unregister());
        assert!(!registry.has_processors(PipeGroup::HydrateColumns));
    }

    #[test]
    fn test_idempotent_processor_applied_twice_is_stable() {
        let registry = PipeRegistry::new();
        let _a = registry.register("a", append_column("a"));
        let once = registry.apply_hydrate_columns(ColumnsState::default(), &state());
        let twice = registry.apply_hydrate_columns(once.clone(), &state());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_groups_are_isolated() {
        let registry = PipeRegistry::new();
        let _a = registry.register("a", append_column("a"));
        let _menu = registry.register(
            "menu",
            PipeProcessor::column_menu(|mut items, _| {
                items.push(ColumnMenuItem::Divider);
                items
            }),
        );
        assert_eq!(registry.processor_names(PipeGroup::ColumnMenu), vec!["menu"]);
        assert_eq!(registry.processor_names(PipeGroup::HydrateColumns), vec!["a"]);
        assert!(!registry.has_processors(PipeGroup::ExportState));
    }
}
