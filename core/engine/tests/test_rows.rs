//! FILENAME: tests/test_rows.rs
//! Integration tests for row management: tree building, throttling,
//! expansion, pinning and feature-tier gating.

mod common;

use common::{sales_row, SalesFixture, TestHarness};
use grid_engine::rows::group_row_id;
use grid_engine::{
    CellValue, GridConfig, GridError, GridEvent, GridSignature, GroupChildrenParams, MutationOutcome,
    RowGroupingStrategy, RowId, RowModel, RowNodeKind, RowUpdate,
};
use rustc_hash::FxHashMap;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn region_group(region: &str) -> RowId {
    group_row_id(&[("region", &CellValue::text(region))])
}

fn grouped_harness() -> TestHarness {
    TestHarness::from_builder(|builder| {
        builder.grouping(RowGroupingStrategy::ByFields(vec!["region".to_string()]))
    })
}

fn throttled_harness(ms: u64) -> TestHarness {
    TestHarness::with_config(GridConfig {
        throttle_rows_ms: ms,
        ..GridConfig::default()
    })
}

fn ids(values: &[i64]) -> Vec<RowId> {
    values.iter().map(|v| RowId::from(*v)).collect()
}

// ============================================================================
// ROW SET TESTS
// ============================================================================

#[test]
fn test_flat_rows_in_source_order() {
    let harness = TestHarness::new();
    assert_eq!(harness.engine.get_rows_count(), 6);
    assert_eq!(harness.engine.get_visible_rows(), ids(&[1, 2, 3, 4, 5, 6]).as_slice());
    assert_eq!(harness.engine.state().rows.total_top_level_row_count, 6);
}

#[test]
fn test_duplicate_ids_keep_last_model() {
    let mut harness = TestHarness::new();
    let outcome = harness
        .engine
        .set_rows(vec![sales_row(1, "North", "Apples", 1.0), sales_row(1, "North", "Apples", 2.0)])
        .unwrap();

    assert_eq!(outcome, MutationOutcome::Applied);
    assert_eq!(harness.engine.get_rows_count(), 1);
    let row = harness.engine.get_row(&RowId::from(1)).unwrap();
    assert_eq!(row.get("amount"), &CellValue::Number(2.0));
}

#[test]
fn test_row_without_id_is_rejected() {
    let mut harness = TestHarness::new();
    let result = harness.engine.set_rows(vec![RowModel::new().with("region", "North")]);

    assert!(matches!(result, Err(GridError::MissingRowId(_))));
    // The previous rows are untouched.
    assert_eq!(harness.engine.get_rows_count(), 6);
}

#[test]
fn test_custom_row_id_extraction() {
    let engine = grid_engine::GridEngine::builder()
        .columns(SalesFixture::columns())
        .get_row_id(|row| match row.get("code") {
            CellValue::Text(code) => Some(RowId::Text(code.clone())),
            _ => None,
        })
        .rows(vec![RowModel::new().with("code", "a"), RowModel::new().with("code", "b")])
        .build()
        .unwrap();

    assert!(engine.get_row(&RowId::from("b")).is_some());
    assert_eq!(engine.get_all_row_ids(), &[RowId::from("a"), RowId::from("b")]);
}

#[test]
fn test_update_rows_merges_inserts_and_deletes() {
    let mut harness = TestHarness::new();
    harness
        .engine
        .update_rows(&[
            RowUpdate::upsert(RowModel::new().with("id", 2).with("amount", 99.0)),
            RowUpdate::upsert(sales_row(7, "West", "Plums", 5.0)),
            RowUpdate::delete(RowModel::new().with("id", 1)),
        ])
        .unwrap();

    assert_eq!(harness.engine.get_visible_rows(), ids(&[2, 3, 4, 5, 6, 7]).as_slice());
    let row = harness.engine.get_row(&RowId::from(2)).unwrap();
    assert_eq!(row.get("amount"), &CellValue::Number(99.0));
    assert_eq!(row.get("region"), &CellValue::text("North"));
    assert!(harness.engine.get_row(&RowId::from(1)).is_none());
}

#[test]
fn test_row_index_relative_to_visible_rows() {
    let harness = TestHarness::new();
    assert_eq!(harness.engine.get_row_index_relative_to_visible_rows(&RowId::from(3)), Some(2));
    assert_eq!(harness.engine.get_row_index_relative_to_visible_rows(&RowId::from(42)), None);
}

#[test]
fn test_set_row_index_moves_within_parent() {
    let mut harness = TestHarness::new();
    let outcome = harness.engine.set_row_index(&RowId::from(3), 0).unwrap();

    assert_eq!(outcome, MutationOutcome::Applied);
    assert_eq!(harness.engine.get_visible_rows(), ids(&[3, 1, 2, 4, 5, 6]).as_slice());
}

// ============================================================================
// THROTTLING TESTS
// ============================================================================

#[test]
fn test_throttled_updates_coalesce() {
    let mut harness = throttled_harness(100);
    harness.take_events();

    harness.clock.advance_ms(10);
    let first = harness.engine.set_rows(vec![sales_row(10, "North", "Kiwis", 1.0)]).unwrap();
    harness.clock.advance_ms(10);
    let second = harness
        .engine
        .set_rows(vec![sales_row(11, "North", "Kiwis", 1.0), sales_row(12, "South", "Kiwis", 2.0)])
        .unwrap();

    assert_eq!(first, MutationOutcome::Deferred);
    assert_eq!(second, MutationOutcome::Deferred);
    assert_eq!(harness.engine.get_rows_count(), 6);
    assert!(harness.engine.has_pending_rows());

    harness.clock.advance_ms(50);
    assert!(!harness.engine.poll_pending_rows().unwrap());

    harness.clock.advance_ms(30);
    assert!(harness.engine.poll_pending_rows().unwrap());
    assert_eq!(harness.engine.get_visible_rows(), ids(&[11, 12]).as_slice());

    let rows_set = harness.take_events().into_iter().filter(|e| *e == GridEvent::RowsSet).count();
    assert_eq!(rows_set, 1);
}

#[test]
fn test_update_after_pending_set_rows_rebuilds_fully() {
    let mut harness = throttled_harness(100);
    harness.engine.set_rows(vec![sales_row(20, "North", "Kiwis", 1.0)]).unwrap();
    harness
        .engine
        .update_rows(&[RowUpdate::upsert(sales_row(21, "North", "Kiwis", 1.0))])
        .unwrap();

    harness.clock.advance_ms(100);
    assert!(harness.engine.poll_pending_rows().unwrap());
    assert_eq!(harness.engine.get_visible_rows(), ids(&[20, 21]).as_slice());
}

#[test]
fn test_forced_update_supersedes_pending() {
    let mut harness = throttled_harness(100);
    harness.engine.set_rows(vec![sales_row(30, "East", "Kiwis", 1.0)]).unwrap();
    assert!(harness.engine.has_pending_rows());

    let outcome = harness
        .engine
        .set_row_grouping_strategy(RowGroupingStrategy::ByFields(vec!["region".to_string()]))
        .unwrap();

    assert_eq!(outcome, MutationOutcome::Applied);
    assert!(!harness.engine.has_pending_rows());
    assert_eq!(harness.engine.get_visible_rows(), &[region_group("East")]);
}

#[test]
fn test_teardown_cancels_pending_update() {
    let mut harness = throttled_harness(100);
    harness.engine.set_rows(vec![sales_row(40, "East", "Kiwis", 1.0)]).unwrap();
    harness.engine.teardown();

    harness.clock.advance_ms(500);
    assert!(!harness.engine.poll_pending_rows().unwrap());
    assert_eq!(harness.engine.get_rows_count(), 6);

    // A later rebuild must not pick up the cancelled rows.
    harness.engine.set_columns(SalesFixture::columns()).unwrap();
    assert_eq!(harness.engine.get_all_row_ids(), ids(&[1, 2, 3, 4, 5, 6]).as_slice());
    assert!(harness.engine.get_row(&RowId::from(40)).is_none());
}

#[test]
fn test_pending_rows_are_not_visible_to_readers() {
    let mut harness = throttled_harness(100);
    let outcome = harness.engine.set_rows(vec![sales_row(10, "West", "Kiwis", 1.0)]).unwrap();
    assert_eq!(outcome, MutationOutcome::Deferred);

    assert!(harness.engine.get_row(&RowId::from(1)).is_some());
    assert!(harness.engine.get_row(&RowId::from(10)).is_none());
    assert_eq!(harness.engine.get_row_models().len(), 6);
    assert_eq!(
        harness.engine.get_cell_value(&RowId::from(1), "region"),
        CellValue::text("North")
    );

    harness.clock.advance_ms(100);
    assert!(harness.engine.poll_pending_rows().unwrap());
    assert!(harness.engine.get_row(&RowId::from(1)).is_none());
    assert_eq!(harness.engine.get_row_models().len(), 1);
}

#[test]
fn test_pending_update_rows_stay_staged() {
    let mut harness = throttled_harness(100);
    harness
        .engine
        .update_rows(&[RowUpdate::delete(RowModel::new().with("id", 1))])
        .unwrap();
    harness
        .engine
        .update_rows(&[RowUpdate::upsert(sales_row(7, "West", "Plums", 5.0))])
        .unwrap();

    assert!(harness.engine.get_row(&RowId::from(1)).is_some());
    assert!(harness.engine.get_row(&RowId::from(7)).is_none());

    harness.clock.advance_ms(100);
    assert!(harness.engine.poll_pending_rows().unwrap());
    assert_eq!(harness.engine.get_all_row_ids(), ids(&[2, 3, 4, 5, 6, 7]).as_slice());
}

#[test]
fn test_cancel_pending_rows_discards_staged_data() {
    let mut harness = throttled_harness(100);
    harness.engine.set_rows(vec![sales_row(10, "West", "Kiwis", 1.0)]).unwrap();

    assert!(harness.engine.cancel_pending_rows());
    assert!(!harness.engine.has_pending_rows());
    assert!(!harness.engine.cancel_pending_rows());

    harness
        .engine
        .set_row_grouping_strategy(RowGroupingStrategy::ByFields(vec!["region".to_string()]))
        .unwrap();
    assert_eq!(harness.engine.get_rows_count(), 6);
}

// ============================================================================
// GROUPING AND EXPANSION TESTS
// ============================================================================

#[test]
fn test_groups_collapsed_by_default() {
    let harness = grouped_harness();
    let expected = vec![region_group("North"), region_group("South"), region_group("East")];
    assert_eq!(harness.engine.get_visible_rows(), expected.as_slice());
    assert_eq!(harness.engine.get_rows_count(), 6);
    assert_eq!(harness.engine.state().rows.total_top_level_row_count, 3);
}

#[test]
fn test_expansion_survives_rebuild() {
    let mut harness = grouped_harness();
    let south = region_group("South");
    harness.engine.set_row_children_expansion(&south, true).unwrap();

    assert_eq!(
        harness.take_events().last(),
        Some(&GridEvent::RowExpansionChange {
            id: south.clone(),
            expanded: true
        })
    );

    harness
        .engine
        .update_rows(&[RowUpdate::upsert(sales_row(7, "South", "Plums", 1.0))])
        .unwrap();

    let visible = harness.engine.get_visible_rows();
    let expected = vec![
        region_group("North"),
        south,
        RowId::from(3),
        RowId::from(4),
        RowId::from(5),
        RowId::from(7),
        region_group("East"),
    ];
    assert_eq!(visible, expected.as_slice());
}

#[test]
fn test_expansion_errors() {
    let mut harness = grouped_harness();
    assert!(matches!(
        harness.engine.set_row_children_expansion(&RowId::from(1), true),
        Err(GridError::NotAGroup(_))
    ));
    assert!(matches!(
        harness.engine.set_row_children_expansion(&RowId::from(99), true),
        Err(GridError::MissingRow(_))
    ));
}

#[test]
fn test_default_expansion_depth() {
    let harness = TestHarness::from_builder(|builder| {
        builder
            .config(GridConfig {
                default_group_expansion_depth: -1,
                ..GridConfig::default()
            })
            .grouping(RowGroupingStrategy::ByFields(vec!["region".to_string(), "product".to_string()]))
    });

    // Every group expanded: 3 regions, 5 region/product groups, 6 rows.
    assert_eq!(harness.engine.get_visible_rows().len(), 14);
}

#[test]
fn test_group_children_queries() {
    let mut harness = grouped_harness();
    let south = region_group("South");

    let children = harness.engine.get_row_group_children(&GroupChildrenParams::new(south.clone())).unwrap();
    assert_eq!(children, ids(&[3, 4, 5]));

    harness.engine.set_sort_order(Some(ids(&[5, 4, 3])));
    let sorted = harness
        .engine
        .get_row_group_children(&GroupChildrenParams {
            apply_sorting: true,
            ..GroupChildrenParams::new(south.clone())
        })
        .unwrap();
    assert_eq!(sorted, ids(&[5, 4, 3]));

    let mut filtered_rows = FxHashMap::default();
    filtered_rows.insert(RowId::from(4), false);
    harness.engine.set_filtered_rows(filtered_rows).unwrap();
    let filtered = harness
        .engine
        .get_row_group_children(&GroupChildrenParams {
            apply_sorting: true,
            apply_filtering: true,
            ..GroupChildrenParams::new(south)
        })
        .unwrap();
    assert_eq!(filtered, ids(&[5, 3]));

    assert!(matches!(
        harness.engine.get_row_group_children(&GroupChildrenParams::new(RowId::from("nope"))),
        Err(GridError::MissingRow(_))
    ));
}

#[test]
fn test_tree_data_auto_generated_parents() {
    let rows = vec![
        RowModel::new().with("id", 1).with("path", "docs/readme"),
        RowModel::new().with("id", 2).with("path", "docs"),
        RowModel::new().with("id", 3).with("path", "src/lib/mod"),
    ];
    let harness = TestHarness::from_builder(|builder| {
        builder
            .rows(rows)
            .grouping(RowGroupingStrategy::tree_data(|row| {
                row.get("path").display_value().split('/').map(str::to_string).collect()
            }))
    });

    let tree = &harness.engine.state().rows.tree;
    let docs = harness.engine.get_row_node(&RowId::from(2)).unwrap();
    assert!(docs.is_group());
    assert!(!docs.is_auto_generated());
    assert_eq!(harness.engine.get_row_node(&RowId::from(1)).unwrap().parent, Some(RowId::from(2)));

    let lib = RowId::from("auto-generated-row-src/lib");
    assert!(tree.get(&lib).unwrap().is_auto_generated());
    assert_eq!(harness.engine.get_row_node(&RowId::from(3)).unwrap().parent, Some(lib));
    assert!(tree.validate().is_ok());
}

// ============================================================================
// PINNED ROWS TESTS
// ============================================================================

#[test]
fn test_pinned_rows_outside_visible_rows() {
    let mut harness = TestHarness::new();
    harness
        .engine
        .set_pinned_rows(vec![sales_row(100, "Top", "Total", 0.0)], vec![sales_row(200, "Bottom", "Total", 0.0)])
        .unwrap();

    let node = harness.engine.get_row_node(&RowId::from(100)).unwrap();
    assert!(matches!(node.kind, RowNodeKind::Pinned { .. }));
    assert_eq!(node.depth, -1);
    assert!(harness.engine.get_row(&RowId::from(200)).is_some());
    assert!(!harness.engine.get_visible_rows().contains(&RowId::from(100)));
    assert_eq!(harness.engine.get_rows_count(), 6);
}

#[test]
fn test_pinned_row_colliding_with_data_row_is_dropped() {
    let mut harness = TestHarness::new();
    harness
        .engine
        .set_pinned_rows(vec![sales_row(1, "Top", "Total", 0.0)], Vec::new())
        .unwrap();

    assert!(harness.engine.get_pinned_rows().top.is_empty());
    let node = harness.engine.get_row_node(&RowId::from(1)).unwrap();
    assert!(matches!(node.kind, RowNodeKind::Leaf));
}

// ============================================================================
// FEATURE TIER TESTS
// ============================================================================

#[test]
fn test_community_grid_refusals() {
    let mut harness = TestHarness::with_config(GridConfig {
        signature: GridSignature::DataGrid,
        ..GridConfig::default()
    });

    let two_rows = [
        RowUpdate::upsert(sales_row(7, "West", "Plums", 1.0)),
        RowUpdate::upsert(sales_row(8, "West", "Plums", 1.0)),
    ];
    assert_eq!(harness.engine.update_rows(&two_rows).unwrap(), MutationOutcome::Refused);
    assert_eq!(harness.engine.get_rows_count(), 6);

    assert_eq!(
        harness.engine.update_rows(&two_rows[..1]).unwrap(),
        MutationOutcome::Applied
    );
    assert_eq!(
        harness.engine.set_pinned_rows(vec![sales_row(100, "Top", "Total", 0.0)], Vec::new()).unwrap(),
        MutationOutcome::Refused
    );
    assert_eq!(
        harness
            .engine
            .set_row_grouping_strategy(RowGroupingStrategy::tree_data(|_| Vec::new()))
            .unwrap(),
        MutationOutcome::Refused
    );
    assert_eq!(harness.engine.set_row_index(&RowId::from(1), 3).unwrap(), MutationOutcome::Refused);
    assert_eq!(harness.engine.get_visible_rows()[0], RowId::from(1));
}

#[test]
fn test_grouping_by_fields_requires_premium() {
    let mut harness = TestHarness::with_config(GridConfig {
        signature: GridSignature::DataGridPro,
        ..GridConfig::default()
    });
    let outcome = harness
        .engine
        .set_row_grouping_strategy(RowGroupingStrategy::ByFields(vec!["region".to_string()]))
        .unwrap();
    assert_eq!(outcome, MutationOutcome::Refused);
    assert_eq!(harness.engine.get_visible_rows().len(), 6);
}

#[test]
fn test_builder_rejects_unavailable_features() {
    let result = grid_engine::GridEngine::builder()
        .config(GridConfig {
            signature: GridSignature::DataGrid,
            ..GridConfig::default()
        })
        .pinned_rows(vec![sales_row(1, "Top", "Total", 0.0)], Vec::new())
        .build();
    assert!(matches!(result, Err(GridError::Configuration(_))));
}

// ============================================================================
// PAGINATION TESTS
// ============================================================================

#[test]
fn test_current_page_rows() {
    let mut harness = TestHarness::with_config(GridConfig {
        pagination: true,
        pagination_model: grid_engine::PaginationModel { page: 0, page_size: 4 },
        ..GridConfig::default()
    });

    assert_eq!(harness.engine.get_current_page_rows(), ids(&[1, 2, 3, 4]).as_slice());
    harness
        .engine
        .set_pagination_model(grid_engine::PaginationModel { page: 1, page_size: 4 });
    assert_eq!(harness.engine.get_current_page_rows(), ids(&[5, 6]).as_slice());
}
