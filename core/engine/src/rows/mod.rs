//! FILENAME: core/engine/src/rows/mod.rs
//! PURPOSE: Row state: cache of row models, the row tree and its builders.

pub mod builder;
pub mod cache;
pub mod pinning;
pub mod tree;
pub mod visible;

pub use builder::{
    build_row_tree, group_row_id, BuildRowTreeParams, HydrateRowsValue, PinnedRow, PinnedRows,
    RowGroupingStrategy, TreeDataPath,
};
pub use cache::{field_row_id, GetRowId, PartialUpdateAction, PartialUpdates, RowUpdate, RowUpdateAction, RowsCache};
pub use tree::{root_id, PinnedPosition, RowNode, RowNodeKind, RowTree, FOOTER_ROW_PREFIX, ROOT_GROUP_ID};
pub use visible::{page_range, sorted_row_ids, visible_row_ids, PageRange};
