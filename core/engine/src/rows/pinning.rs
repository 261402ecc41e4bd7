//! FILENAME: core/engine/src/rows/pinning.rs
//! PURPOSE: `hydrateRows` contribution that injects pinned rows.
//! CONTEXT: Pinned rows sit at depth -1 without a parent. They are not part
//! of the grouping and never appear in the visible (paged) row sequence.

use crate::rows::builder::{HydrateRowsValue, PinnedRow, PinnedRows};
use crate::rows::tree::{PinnedPosition, RowNode, RowNodeKind};

/// Adds the host's pinned rows to the hydrated value. A pinned row whose id
/// collides with a row already in the tree is dropped with a warning.
pub fn add_pinned_rows(mut value: HydrateRowsValue, pinned: &PinnedRows) -> HydrateRowsValue {
    if pinned.is_empty() {
        return value;
    }

    let mut result = PinnedRows::default();
    for position in [PinnedPosition::Top, PinnedPosition::Bottom] {
        for row in pinned.rows(position) {
            if value.tree.contains(&row.id) {
                crate::log_warn!(
                    "PINNING",
                    "pinned row #{} collides with an existing row and is ignored",
                    row.id
                );
                continue;
            }
            let node = RowNode {
                id: row.id.clone(),
                parent: None,
                depth: -1,
                kind: RowNodeKind::Pinned { position },
            };
            if let Err(e) = value.tree.insert_node(node) {
                crate::log_warn!("PINNING", "failed to pin row #{}: {}", row.id, e);
                continue;
            }
            let target = match position {
                PinnedPosition::Top => &mut result.top,
                PinnedPosition::Bottom => &mut result.bottom,
            };
            target.push(PinnedRow {
                id: row.id.clone(),
                model: row.model.clone(),
            });
        }
    }

    // Rows pinned by other processors (e.g. the root footer) stay after ours.
    result.top.extend(value.pinned_rows.top.drain(..));
    result.bottom.extend(value.pinned_rows.bottom.drain(..));
    value.pinned_rows = result;
    value
}
