//! FILENAME: tests/common/mod.rs
//! Test harness and fixtures for grid engine integration tests.

#![allow(dead_code)]

use grid_engine::{
    ColumnDef, ColumnType, GridConfig, GridEngine, GridEngineBuilder, GridEvent, ManualClock, RowModel,
};
use std::cell::RefCell;
use std::rc::Rc;

/// Sales rows used across the integration tests.
pub struct SalesFixture;

impl SalesFixture {
    /// (id, region, product, amount)
    pub fn data() -> Vec<(i64, &'static str, &'static str, f64)> {
        vec![
            (1, "North", "Apples", 10.0),
            (2, "North", "Pears", 20.0),
            (3, "South", "Apples", 30.0),
            (4, "South", "Pears", 40.0),
            (5, "South", "Apples", 50.0),
            (6, "East", "Apples", 60.0),
        ]
    }

    pub fn total() -> f64 {
        Self::data().iter().map(|(_, _, _, amount)| amount).sum()
    }

    pub fn rows() -> Vec<RowModel> {
        Self::data()
            .into_iter()
            .map(|(id, region, product, amount)| {
                RowModel::new()
                    .with("id", id)
                    .with("region", region)
                    .with("product", product)
                    .with("amount", amount)
            })
            .collect()
    }

    pub fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id").with_type(ColumnType::Number),
            ColumnDef::new("region"),
            ColumnDef::new("product"),
            ColumnDef::new("amount").with_type(ColumnType::Number),
        ]
    }
}

/// Test harness around an engine driven by a manual clock.
pub struct TestHarness {
    pub engine: GridEngine,
    pub clock: ManualClock,
    pub events: Rc<RefCell<Vec<GridEvent>>>,
}

impl TestHarness {
    /// Sales data on a premium grid with default configuration.
    pub fn new() -> Self {
        Self::with_config(GridConfig::default())
    }

    pub fn with_config(config: GridConfig) -> Self {
        Self::from_builder(|builder| builder.config(config))
    }

    /// Starts from the sales fixture; `configure` may override anything.
    pub fn from_builder(configure: impl FnOnce(GridEngineBuilder) -> GridEngineBuilder) -> Self {
        let clock = ManualClock::new();
        let builder = GridEngine::builder()
            .columns(SalesFixture::columns())
            .rows(SalesFixture::rows())
            .clock(clock.clone());
        let mut engine = configure(builder).build().expect("engine should build");

        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        engine.subscribe(move |event| sink.borrow_mut().push(event.clone()));

        TestHarness { engine, clock, events }
    }

    pub fn take_events(&self) -> Vec<GridEvent> {
        self.events.borrow_mut().drain(..).collect()
    }
}

/// A single sales row.
pub fn sales_row(id: i64, region: &str, product: &str, amount: f64) -> RowModel {
    RowModel::new()
        .with("id", id)
        .with("region", region)
        .with("product", product)
        .with("amount", amount)
}
