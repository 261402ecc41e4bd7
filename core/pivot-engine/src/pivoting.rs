//! FILENAME: core/pivot-engine/src/pivoting.rs
// PURPOSE: Plugs a pivot model into a live grid engine.
// CONTEXT: While pivoting is active the engine's columns and rows are the
// pivoted data; otherwise they are the source data. The model is persisted
// under the "pivoting" extension key of the exported state.

use std::cell::RefCell;
use std::rc::Rc;

use grid_engine::{
    ColumnDef, GridEngine, GridError, GridEvent, GridResult, GridSignature, PipeProcessor, RowModel, Unregister,
};
use serde::{Deserialize, Serialize};

use crate::definition::{PivotColumnGroup, PivotModel};
use crate::engine::{calculate_pivot, PivotSource};

/// Name of the pipeline processors and of the exported state key.
pub const PIVOTING_PROCESSOR: &str = "pivoting";

/// Pivot state as stored in `GridInitialState::extensions`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotingInitialState {
    #[serde(default)]
    pub model: PivotModel,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Default)]
struct PivotingInner {
    model: PivotModel,
    initial_model: PivotModel,
    active: bool,
    source_rows: Vec<RowModel>,
    source_columns: Vec<ColumnDef>,
    column_groups: Vec<PivotColumnGroup>,
}

type SharedInner = Rc<RefCell<PivotingInner>>;

// ============================================================================
// CONTROLLER
// ============================================================================

/// Pivoting feature attached to one engine.
pub struct Pivoting {
    inner: SharedInner,
    handles: Vec<Unregister>,
}

impl Pivoting {
    /// Attaches pivoting to `engine`. Pivoting starts inactive, so the
    /// engine keeps showing the source data until `set_pivot_active(true)`.
    pub fn attach(
        engine: &mut GridEngine,
        source_rows: Vec<RowModel>,
        source_columns: Vec<ColumnDef>,
        model: PivotModel,
    ) -> GridResult<Self> {
        if engine.config().signature != GridSignature::DataGridPremium {
            return Err(GridError::Configuration(format!(
                "Pivoting is not available with {:?}",
                engine.config().signature
            )));
        }

        let inner: SharedInner = Rc::new(RefCell::new(PivotingInner {
            initial_model: model.clone(),
            model,
            source_rows,
            source_columns,
            ..PivotingInner::default()
        }));

        let export_inner = Rc::clone(&inner);
        let export = PipeProcessor::export_state(move |mut exported, context| {
            let inner = export_inner.borrow();
            if context.params.export_only_dirty_models && !inner.active && inner.model == inner.initial_model {
                return exported;
            }
            let state = PivotingInitialState {
                model: inner.model.clone(),
                enabled: inner.active,
            };
            if let Err(e) = exported.set_extension(PIVOTING_PROCESSOR, &state) {
                grid_engine::log_warn!("PIVOT", "could not export the pivot model: {}", e);
            }
            exported
        });

        let restore_inner = Rc::clone(&inner);
        let restore = PipeProcessor::restore_state(move |mut value, context| {
            match context
                .state_to_restore
                .extension::<PivotingInitialState>(PIVOTING_PROCESSOR)
            {
                Ok(Some(state)) => {
                    let inner = Rc::clone(&restore_inner);
                    value.push(move |engine| {
                        let previous = {
                            let mut current = inner.borrow_mut();
                            let previous = (current.model.clone(), current.active);
                            current.model = state.model;
                            current.active = state.enabled;
                            previous
                        };
                        if let Err(e) = apply(&inner, engine) {
                            let mut current = inner.borrow_mut();
                            current.model = previous.0;
                            current.active = previous.1;
                            return Err(e);
                        }
                        publish_model(&inner, engine)
                    });
                }
                Ok(None) => {}
                Err(e) => grid_engine::log_warn!("PIVOT", "ignoring unreadable pivot state: {}", e),
            }
            value
        });

        let handles = vec![
            engine.register_pipe_processor(PIVOTING_PROCESSOR, export)?,
            engine.register_pipe_processor(PIVOTING_PROCESSOR, restore)?,
        ];

        grid_engine::log_info!("PIVOT", "pivoting attached");
        Ok(Pivoting { inner, handles })
    }

    pub fn get_pivot_model(&self) -> PivotModel {
        self.inner.borrow().model.clone()
    }

    pub fn is_pivot_active(&self) -> bool {
        self.inner.borrow().active
    }

    /// Column groups of the current pivot output. Empty while inactive.
    pub fn column_groups(&self) -> Vec<PivotColumnGroup> {
        self.inner.borrow().column_groups.clone()
    }

    /// Replaces the model. When pivoting is active the engine is updated at
    /// once; an invalid model leaves everything unchanged.
    pub fn set_pivot_model(&mut self, engine: &mut GridEngine, model: PivotModel) -> GridResult<()> {
        if self.inner.borrow().model == model {
            return Ok(());
        }
        let previous = std::mem::replace(&mut self.inner.borrow_mut().model, model);
        if let Err(e) = apply(&self.inner, engine) {
            self.inner.borrow_mut().model = previous;
            return Err(e);
        }
        publish_model(&self.inner, engine)
    }

    pub fn set_pivot_active(&mut self, engine: &mut GridEngine, active: bool) -> GridResult<()> {
        if self.inner.borrow().active == active {
            return Ok(());
        }
        self.inner.borrow_mut().active = active;
        if let Err(e) = apply(&self.inner, engine) {
            self.inner.borrow_mut().active = !active;
            return Err(e);
        }
        grid_engine::log_info!("PIVOT", "pivoting {}", if active { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Replaces the source rows and re-applies.
    pub fn set_source_rows(&mut self, engine: &mut GridEngine, rows: Vec<RowModel>) -> GridResult<()> {
        let previous = std::mem::replace(&mut self.inner.borrow_mut().source_rows, rows);
        if let Err(e) = apply(&self.inner, engine) {
            self.inner.borrow_mut().source_rows = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Replaces the source columns and re-applies.
    pub fn set_source_columns(&mut self, engine: &mut GridEngine, columns: Vec<ColumnDef>) -> GridResult<()> {
        let previous = std::mem::replace(&mut self.inner.borrow_mut().source_columns, columns);
        if let Err(e) = apply(&self.inner, engine) {
            self.inner.borrow_mut().source_columns = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Removes the processors and puts the source data back if needed.
    pub fn detach(self, engine: &mut GridEngine) -> GridResult<()> {
        for handle in self.handles {
            engine.unregister_pipe_processor(handle)?;
        }
        let was_active = std::mem::replace(&mut self.inner.borrow_mut().active, false);
        if was_active {
            apply(&self.inner, engine)?;
        }
        Ok(())
    }
}

// ============================================================================
// APPLY
// ============================================================================

/// Pushes the pivoted (or source) columns and rows into the engine. The
/// pivot is computed before the engine is touched, and the previous columns
/// are put back if the rows are rejected.
fn apply(inner: &SharedInner, engine: &mut GridEngine) -> GridResult<()> {
    let (columns, rows, column_groups) = {
        let current = inner.borrow();
        if current.active && !current.model.is_empty() {
            let source = PivotSource {
                rows: &current.source_rows,
                columns: &current.source_columns,
                row_id_field: &engine.config().row_id_field,
            };
            let data = calculate_pivot(&source, &current.model, engine.aggregation_functions())?;
            grid_engine::log_debug!(
                "PIVOT",
                "pivoted {} source rows into {} rows x {} columns",
                current.source_rows.len(),
                data.rows.len(),
                data.columns.len()
            );
            (data.columns, data.rows, data.column_groups)
        } else {
            (current.source_columns.clone(), current.source_rows.clone(), Vec::new())
        }
    };

    // Switching between source and pivot columns starts from the new
    // definition order.
    let order: Vec<String> = columns.iter().map(|c| c.field.clone()).collect();
    let previous_defs = engine.column_defs().to_vec();
    let previous_order: Vec<String> = engine.get_all_columns().iter().map(|c| c.field.clone()).collect();

    engine.set_columns(columns)?;
    let applied = engine
        .set_columns_order(&order)
        .and_then(|()| engine.force_set_rows(rows));
    if let Err(e) = applied {
        let restored = engine
            .set_columns(previous_defs)
            .and_then(|()| engine.set_columns_order(&previous_order));
        if let Err(restore_err) = restored {
            grid_engine::log_warn!("PIVOT", "could not restore the previous columns: {}", restore_err);
        }
        return Err(e);
    }
    inner.borrow_mut().column_groups = column_groups;
    Ok(())
}

fn publish_model(inner: &SharedInner, engine: &mut GridEngine) -> GridResult<()> {
    let value = serde_json::to_value(&inner.borrow().model)?;
    engine.publish(GridEvent::PivotModelChange(value));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{PivotColumnField, PivotRowField, PivotValueField};
    use grid_engine::{CellValue, ColumnType, ExportStateParams, GridConfig, RowId};

    fn source_rows() -> Vec<RowModel> {
        vec![
            RowModel::new().with("id", 1).with("cat", "A").with("y", 2023).with("price", 10),
            RowModel::new().with("id", 2).with("cat", "A").with("y", 2024).with("price", 20),
            RowModel::new().with("id", 3).with("cat", "B").with("y", 2023).with("price", 5),
        ]
    }

    fn source_columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id").with_type(ColumnType::Number),
            ColumnDef::new("cat"),
            ColumnDef::new("y").with_type(ColumnType::Number),
            ColumnDef::new("price").with_type(ColumnType::Number),
        ]
    }

    fn model() -> PivotModel {
        PivotModel::new()
            .with_row(PivotRowField::new("cat"))
            .with_column(PivotColumnField::new("y"))
            .with_value(PivotValueField::new("price", "sum"))
    }

    fn setup(config: GridConfig) -> (GridEngine, Rc<RefCell<Vec<GridEvent>>>) {
        let mut engine = GridEngine::builder()
            .config(config)
            .rows(source_rows())
            .columns(source_columns())
            .build()
            .unwrap();
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        engine.subscribe(move |event| sink.borrow_mut().push(event.clone()));
        (engine, events)
    }

    fn column_fields(engine: &GridEngine) -> Vec<String> {
        engine.get_all_columns().iter().map(|c| c.field.clone()).collect()
    }

    #[test]
    fn test_activation_replaces_rows_and_columns() {
        let (mut engine, _) = setup(GridConfig::default());
        let mut pivoting = Pivoting::attach(&mut engine, source_rows(), source_columns(), model()).unwrap();
        assert_eq!(engine.get_rows_count(), 3);

        pivoting.set_pivot_active(&mut engine, true).unwrap();
        assert_eq!(column_fields(&engine), vec!["cat", "2023>->price", "2024>->price"]);
        assert_eq!(engine.get_rows_count(), 2);
        let a = engine.get_row(&RowId::from("pivot/A")).unwrap();
        assert_eq!(a.get("2024>->price"), &CellValue::Number(20.0));
        let b = engine.get_row(&RowId::from("pivot/B")).unwrap();
        assert_eq!(b.get("2024>->price"), &CellValue::Empty);
        assert_eq!(pivoting.column_groups().len(), 2);

        pivoting.set_pivot_active(&mut engine, false).unwrap();
        assert_eq!(column_fields(&engine), vec!["id", "cat", "y", "price"]);
        assert_eq!(engine.get_rows_count(), 3);
        assert!(pivoting.column_groups().is_empty());
    }

    #[test]
    fn test_model_change_publishes_event() {
        let (mut engine, events) = setup(GridConfig::default());
        let mut pivoting = Pivoting::attach(&mut engine, source_rows(), source_columns(), model()).unwrap();
        pivoting.set_pivot_active(&mut engine, true).unwrap();
        events.borrow_mut().clear();

        let mut next = model();
        next.columns.clear();
        pivoting.set_pivot_model(&mut engine, next.clone()).unwrap();

        assert_eq!(pivoting.get_pivot_model(), next);
        assert_eq!(column_fields(&engine), vec!["cat", "price"]);
        let expected = GridEvent::PivotModelChange(serde_json::to_value(&next).unwrap());
        assert!(events.borrow().contains(&expected));
    }

    #[test]
    fn test_invalid_model_changes_nothing() {
        let (mut engine, events) = setup(GridConfig::default());
        let mut pivoting = Pivoting::attach(&mut engine, source_rows(), source_columns(), model()).unwrap();
        pivoting.set_pivot_active(&mut engine, true).unwrap();
        events.borrow_mut().clear();

        let broken = model().with_value(PivotValueField::new("cat", "avg"));
        let result = pivoting.set_pivot_model(&mut engine, broken);

        assert!(matches!(result, Err(GridError::Configuration(_))));
        assert_eq!(pivoting.get_pivot_model(), model());
        assert_eq!(column_fields(&engine), vec!["cat", "2023>->price", "2024>->price"]);
        assert!(events.borrow().is_empty());
    }

    #[test]
    fn test_rejected_rows_keep_previous_columns() {
        let (mut engine, _) = setup(GridConfig::default());
        let mut sources = source_rows();
        sources.push(RowModel::new().with("cat", "C").with("y", 2023).with("price", 1));
        let mut pivoting = Pivoting::attach(&mut engine, sources, source_columns(), model()).unwrap();
        pivoting.set_pivot_active(&mut engine, true).unwrap();
        let pivot_columns = column_fields(&engine);

        // The source rows include one without an id, so switching back fails.
        let result = pivoting.set_pivot_active(&mut engine, false);

        assert!(matches!(result, Err(GridError::MissingRowId(_))));
        assert!(pivoting.is_pivot_active());
        assert_eq!(column_fields(&engine), pivot_columns);
        assert!(engine.get_row(&RowId::from("pivot/C")).is_some());
    }

    #[test]
    fn test_requires_premium() {
        let (mut engine, _) = setup(GridConfig {
            signature: GridSignature::DataGridPro,
            ..GridConfig::default()
        });
        let result = Pivoting::attach(&mut engine, source_rows(), source_columns(), model());
        assert!(matches!(result, Err(GridError::Configuration(_))));
    }

    #[test]
    fn test_state_round_trip() {
        let (mut engine, _) = setup(GridConfig::default());
        let mut pivoting = Pivoting::attach(&mut engine, source_rows(), source_columns(), model()).unwrap();

        let clean = engine.export_state(ExportStateParams {
            export_only_dirty_models: true,
        });
        assert!(!clean.extensions.contains_key(PIVOTING_PROCESSOR));

        pivoting.set_pivot_active(&mut engine, true).unwrap();
        let exported = engine.export_state(ExportStateParams::default());
        let json = exported.to_json().unwrap();

        let (mut target, events) = setup(GridConfig::default());
        let restored = Pivoting::attach(&mut target, source_rows(), source_columns(), PivotModel::new()).unwrap();
        target
            .restore_state(grid_engine::GridInitialState::from_json(&json).unwrap())
            .unwrap();

        assert!(restored.is_pivot_active());
        assert_eq!(restored.get_pivot_model(), model());
        assert_eq!(target.get_rows_count(), 2);
        assert!(events
            .borrow()
            .iter()
            .any(|e| matches!(e, GridEvent::PivotModelChange(_))));
    }

    #[test]
    fn test_detach_restores_source() {
        let (mut engine, _) = setup(GridConfig::default());
        let mut pivoting = Pivoting::attach(&mut engine, source_rows(), source_columns(), model()).unwrap();
        pivoting.set_pivot_active(&mut engine, true).unwrap();

        pivoting.detach(&mut engine).unwrap();
        assert_eq!(engine.get_rows_count(), 3);
        assert!(engine.pipe_registry().processor_names(grid_engine::PipeGroup::ExportState)
            .iter()
            .all(|name| name != PIVOTING_PROCESSOR));
    }
}
