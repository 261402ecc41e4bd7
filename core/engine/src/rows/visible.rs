//! FILENAME: core/engine/src/rows/visible.rs
//! PURPOSE: Materializes the visible row sequence and the current page.
//! CONTEXT: Sorting and filtering are external collaborators. The host hands
//! in a sort order (ids ranked among their siblings) and a filter lookup
//! (`false` = filtered out). This module only combines them with the tree
//! and its expansion state.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::config::PaginationModel;
use crate::rows::tree::{RowNode, RowTree};
use crate::value::RowId;

/// Tree rows in display order with siblings ranked by `sort_order`.
/// Ids absent from the order keep their relative position after the ranked ones.
pub fn sorted_row_ids(tree: &RowTree, sort_order: Option<&[RowId]>) -> Vec<RowId> {
    let rank: Option<FxHashMap<&RowId, usize>> =
        sort_order.map(|order| order.iter().enumerate().map(|(i, id)| (id, i)).collect());

    let mut result = Vec::with_capacity(tree.len());
    push_sorted(tree, tree.root(), rank.as_ref(), &mut result);
    result
}

fn push_sorted(
    tree: &RowTree,
    node: &RowNode,
    rank: Option<&FxHashMap<&RowId, usize>>,
    out: &mut Vec<RowId>,
) {
    let mut children: Vec<&RowId> = node.children().iter().collect();
    if let Some(rank) = rank {
        // Stable sort keeps unranked ids in source order.
        children.sort_by_key(|id| rank.get(id).copied().unwrap_or(usize::MAX));
    }
    for child_id in children {
        out.push(child_id.clone());
        if let Some(child) = tree.get(child_id) {
            push_sorted(tree, child, rank, out);
        }
    }
    if !node.is_root() {
        if let Some(footer) = node.footer_id() {
            out.push(footer.clone());
        }
    }
}

/// Ids hidden by the filter. An auto-generated group whose descendants are
/// all filtered out is hidden as well, together with its footer.
pub fn filtered_out_ids(tree: &RowTree, filtered_rows: &FxHashMap<RowId, bool>) -> FxHashSet<RowId> {
    let mut hidden = FxHashSet::default();
    if !filtered_rows.is_empty() {
        collect_filtered(tree, tree.root(), filtered_rows, &mut hidden);
    }
    hidden
}

fn collect_filtered(
    tree: &RowTree,
    node: &RowNode,
    filtered_rows: &FxHashMap<RowId, bool>,
    hidden: &mut FxHashSet<RowId>,
) -> bool {
    let mut any_child_passes = false;
    for child_id in node.children() {
        if let Some(child) = tree.get(child_id) {
            if collect_filtered(tree, child, filtered_rows, hidden) {
                any_child_passes = true;
            }
        }
    }

    if node.is_root() {
        return true;
    }

    let explicitly_hidden = filtered_rows.get(&node.id) == Some(&false);
    let emptied_group =
        node.is_auto_generated() && !node.children().is_empty() && !any_child_passes;
    let passes = !explicitly_hidden && !emptied_group;

    if !passes {
        hidden.insert(node.id.clone());
        if let Some(footer) = node.footer_id() {
            hidden.insert(footer.clone());
        }
    }
    passes
}

/// Rows visible to the user: passing the filter and under expanded groups.
/// Pinned rows are not part of this sequence.
pub fn visible_row_ids(
    tree: &RowTree,
    sorted_ids: &[RowId],
    filtered_rows: &FxHashMap<RowId, bool>,
) -> Vec<RowId> {
    let hidden = filtered_out_ids(tree, filtered_rows);

    sorted_ids
        .iter()
        .filter(|id| !hidden.contains(*id))
        .filter(|id| ancestors_expanded(tree, id, &hidden))
        .cloned()
        .collect()
}

fn ancestors_expanded(tree: &RowTree, id: &RowId, hidden: &FxHashSet<RowId>) -> bool {
    let mut current = tree.get(id).and_then(|node| node.parent.clone());
    while let Some(parent_id) = current {
        let Some(parent) = tree.get(&parent_id) else {
            return false;
        };
        if parent.is_root() {
            return true;
        }
        if !parent.children_expanded() || hidden.contains(&parent_id) {
            return false;
        }
        current = parent.parent.clone();
    }
    // Pinned rows and the root footer have no parent.
    false
}

// ============================================================================
// PAGINATION
// ============================================================================

/// Inclusive index range into the visible rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub first_row_index: usize,
    pub last_row_index: usize,
}

impl PageRange {
    pub fn contains(&self, index: usize) -> bool {
        index >= self.first_row_index && index <= self.last_row_index
    }
}

/// The range of the current page, or `None` when there is nothing to show.
/// Without pagination the whole visible sequence is one page.
pub fn page_range(visible_count: usize, pagination: bool, model: &PaginationModel) -> Option<PageRange> {
    if visible_count == 0 {
        return None;
    }
    if !pagination || model.page_size == 0 {
        return Some(PageRange {
            first_row_index: 0,
            last_row_index: visible_count - 1,
        });
    }

    let page_count = visible_count.div_ceil(model.page_size);
    let page = model.page.min(page_count - 1);
    let first = page * model.page_size;
    let last = (first + model.page_size).min(visible_count) - 1;
    Some(PageRange {
        first_row_index: first,
        last_row_index: last,
    })
}
