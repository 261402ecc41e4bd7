//! FILENAME: core/engine/src/aggregation/footer.rs
//! PURPOSE: Synthetic footer rows that carry aggregated values.

use crate::rows::builder::{HydrateRowsValue, PinnedRow};
use crate::rows::tree::{RowNode, RowNodeKind, FOOTER_ROW_PREFIX};
use crate::value::{RowId, RowModel};

/// Id of the footer of `group_id`; `None` is the root.
pub fn footer_row_id(group_id: Option<&RowId>) -> RowId {
    match group_id {
        Some(id) => RowId::Text(format!("{}{}", FOOTER_ROW_PREFIX, id)),
        None => RowId::Text(format!("{}root", FOOTER_ROW_PREFIX)),
    }
}

/// Adds a footer to every group. The root footer is pinned at the bottom
/// instead of being linked into the tree.
pub fn add_footer_rows(mut value: HydrateRowsValue) -> HydrateRowsValue {
    let groups: Vec<(RowId, i32)> = value
        .tree
        .nodes()
        .filter(|node| node.is_group() && !node.is_root() && node.footer_id().is_none())
        .map(|node| (node.id.clone(), node.depth))
        .collect();

    for (group_id, depth) in groups {
        let footer = RowNode {
            id: footer_row_id(Some(&group_id)),
            parent: Some(group_id.clone()),
            depth: depth + 1,
            kind: RowNodeKind::Footer,
        };
        if let Err(e) = value.tree.insert_node(footer) {
            crate::log_warn!("AGGREGATION", "cannot add footer to group #{}: {}", group_id, e);
        }
    }

    let root_footer = footer_row_id(None);
    if !value.tree.contains(&root_footer) {
        let node = RowNode {
            id: root_footer.clone(),
            parent: None,
            depth: -1,
            kind: RowNodeKind::Footer,
        };
        if value.tree.insert_node(node).is_ok() {
            value.pinned_rows.bottom.push(PinnedRow {
                id: root_footer,
                model: RowModel::new(),
            });
        }
    }

    value
}
