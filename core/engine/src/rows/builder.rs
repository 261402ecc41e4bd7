//! FILENAME: core/engine/src/rows/builder.rs
//! PURPOSE: Row Tree Builder - turns the flat row cache into a row tree.
//! CONTEXT: Three strategies are supported:
//! - `Flat`: every data row is a leaf directly under the root
//! - `ByFields`: one synthetic group per distinct value path over the fields
//! - `TreeData`: each row carries its own path; missing ancestors are synthesized
//!
//! The builder only knows about data rows. Pinned rows and aggregation
//! footers are added afterwards by `hydrateRows` processors.

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::{GridError, GridResult};
use crate::rows::cache::RowsCache;
use crate::rows::tree::{root_id, PinnedPosition, RowNode, RowNodeKind, RowTree, AUTO_GENERATED_ROW_PREFIX};
use crate::value::{CellValue, RowId, RowModel};

/// Returns the hierarchical path of a row for tree data.
pub type TreeDataPath = Rc<dyn Fn(&RowModel) -> Vec<String>>;

#[derive(Clone)]
pub enum RowGroupingStrategy {
    Flat,
    ByFields(Vec<String>),
    TreeData(TreeDataPath),
}

impl RowGroupingStrategy {
    pub fn tree_data(path: impl Fn(&RowModel) -> Vec<String> + 'static) -> Self {
        RowGroupingStrategy::TreeData(Rc::new(path))
    }

    pub fn name(&self) -> &'static str {
        match self {
            RowGroupingStrategy::Flat => "flat",
            RowGroupingStrategy::ByFields(_) => "grouping-columns",
            RowGroupingStrategy::TreeData(_) => "tree-data",
        }
    }
}

impl Default for RowGroupingStrategy {
    fn default() -> Self {
        RowGroupingStrategy::Flat
    }
}

impl fmt::Debug for RowGroupingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowGroupingStrategy::Flat => write!(f, "Flat"),
            RowGroupingStrategy::ByFields(fields) => write!(f, "ByFields({:?})", fields),
            RowGroupingStrategy::TreeData(_) => write!(f, "TreeData(..)"),
        }
    }
}

// ============================================================================
// HYDRATION VALUE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct PinnedRow {
    pub id: RowId,
    pub model: RowModel,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PinnedRows {
    pub top: Vec<PinnedRow>,
    pub bottom: Vec<PinnedRow>,
}

impl PinnedRows {
    pub fn get(&self, id: &RowId) -> Option<&PinnedRow> {
        self.top.iter().chain(self.bottom.iter()).find(|row| &row.id == id)
    }

    pub fn rows(&self, position: PinnedPosition) -> &[PinnedRow] {
        match position {
            PinnedPosition::Top => &self.top,
            PinnedPosition::Bottom => &self.bottom,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.top.is_empty() && self.bottom.is_empty()
    }
}

/// The value threaded through the `hydrateRows` pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct HydrateRowsValue {
    pub tree: RowTree,
    /// Data row ids in source order (no synthetic or pinned rows).
    pub data_row_ids: Vec<RowId>,
    pub pinned_rows: PinnedRows,
}

impl HydrateRowsValue {
    /// Number of nodes in the tree, root excluded.
    pub fn total_row_count(&self) -> usize {
        self.tree.len() - 1
    }
}

pub struct BuildRowTreeParams<'a> {
    pub cache: &'a RowsCache,
    pub strategy: &'a RowGroupingStrategy,
    pub previous_tree: Option<&'a RowTree>,
    pub default_group_expansion_depth: i32,
}

/// Builds the row tree for the active strategy.
pub fn build_row_tree(params: BuildRowTreeParams<'_>) -> GridResult<HydrateRowsValue> {
    let tree = match params.strategy {
        RowGroupingStrategy::Flat => build_flat_tree(params.cache, params.previous_tree)?,
        RowGroupingStrategy::ByFields(fields) if fields.is_empty() => {
            build_flat_tree(params.cache, None)?
        }
        RowGroupingStrategy::ByFields(fields) => {
            let mut tree = build_grouped_tree(params.cache, fields)?;
            apply_expansion(&mut tree, params.previous_tree, params.default_group_expansion_depth);
            tree
        }
        RowGroupingStrategy::TreeData(path) => {
            let mut tree = build_tree_data_tree(params.cache, path)?;
            apply_expansion(&mut tree, params.previous_tree, params.default_group_expansion_depth);
            tree
        }
    };

    Ok(HydrateRowsValue {
        tree,
        data_row_ids: params.cache.data_row_ids.clone(),
        pinned_rows: PinnedRows::default(),
    })
}

// ============================================================================
// FLAT STRATEGY
// ============================================================================

fn build_flat_tree(cache: &RowsCache, previous_tree: Option<&RowTree>) -> GridResult<RowTree> {
    if let (Some(previous), Some(partial)) = (previous_tree, cache.partial_updates.as_ref()) {
        if is_flat(previous) {
            let mut tree = strip_processor_rows(previous);
            for id in &partial.delete {
                if tree.contains(id) {
                    tree.remove_node(id)?;
                }
            }
            for id in &partial.insert {
                if !tree.contains(id) {
                    tree.insert_node(RowNode::leaf(id.clone(), root_id(), 0))?;
                }
            }
            // Modified rows keep their node; only their model changed.
            return Ok(tree);
        }
    }

    let mut tree = RowTree::new();
    for id in &cache.data_row_ids {
        tree.insert_node(RowNode::leaf(id.clone(), root_id(), 0))?;
    }
    Ok(tree)
}

fn is_flat(tree: &RowTree) -> bool {
    tree.nodes()
        .all(|node| node.is_root() || !node.is_group())
}

/// Copy of `tree` without the rows contributed by hydration processors.
fn strip_processor_rows(tree: &RowTree) -> RowTree {
    let mut stripped = tree.clone();
    let extra: Vec<RowId> = tree
        .nodes()
        .filter(|node| node.is_pinned() || node.is_footer())
        .map(|node| node.id.clone())
        .collect();
    for id in extra {
        let _ = stripped.remove_node(&id);
    }
    stripped
}

// ============================================================================
// GROUPING BY FIELDS
// ============================================================================

/// Id of the synthetic group for a value path over grouping fields.
pub fn group_row_id(path: &[(&str, &CellValue)]) -> RowId {
    let key = path
        .iter()
        .map(|(field, value)| format!("{}/{}", field, value.display_value()))
        .collect::<Vec<_>>()
        .join("-");
    RowId::Text(format!("{}{}", AUTO_GENERATED_ROW_PREFIX, key))
}

fn build_grouped_tree(cache: &RowsCache, fields: &[String]) -> GridResult<RowTree> {
    let mut tree = RowTree::new();

    for id in &cache.data_row_ids {
        let model = cache
            .get(id)
            .ok_or_else(|| GridError::MissingRow(id.clone()))?;

        let mut path: SmallVec<[(&str, &CellValue); 4]> = SmallVec::new();
        let mut parent = root_id();

        for (level, field) in fields.iter().enumerate() {
            let value = model.get(field);
            path.push((field.as_str(), value));
            let group_id = group_row_id(&path);

            if !tree.contains(&group_id) {
                tree.insert_node(RowNode {
                    id: group_id.clone(),
                    parent: Some(parent.clone()),
                    depth: level as i32,
                    kind: RowNodeKind::Group {
                        children: Vec::new(),
                        is_auto_generated: true,
                        grouping_field: Some(field.clone()),
                        grouping_key: Some(value.clone()),
                        footer_id: None,
                        children_expanded: false,
                    },
                })?;
            }
            parent = group_id;
        }

        tree.insert_node(RowNode::leaf(id.clone(), parent, fields.len() as i32))?;
    }

    Ok(tree)
}

// ============================================================================
// TREE DATA
// ============================================================================

fn tree_data_group_id(path: &[String]) -> RowId {
    RowId::Text(format!("{}{}", AUTO_GENERATED_ROW_PREFIX, path.join("/")))
}

fn build_tree_data_tree(cache: &RowsCache, get_path: &TreeDataPath) -> GridResult<RowTree> {
    let mut paths: Vec<(RowId, Vec<String>)> = Vec::with_capacity(cache.len());
    let mut path_to_id: FxHashMap<Vec<String>, RowId> = FxHashMap::default();

    for id in &cache.data_row_ids {
        let model = cache
            .get(id)
            .ok_or_else(|| GridError::MissingRow(id.clone()))?;
        let path = get_path(model);
        if !path.is_empty() {
            path_to_id.insert(path.clone(), id.clone());
        }
        paths.push((id.clone(), path));
    }

    let mut tree = RowTree::new();

    for (id, path) in &paths {
        let mut parent = root_id();

        for depth in 0..path.len().saturating_sub(1) {
            let prefix = &path[..=depth];
            let node_id = match path_to_id.get(prefix) {
                Some(real_id) => real_id.clone(),
                None => tree_data_group_id(prefix),
            };

            if !tree.contains(&node_id) {
                let kind = if path_to_id.contains_key(prefix) {
                    RowNodeKind::Leaf
                } else {
                    RowNodeKind::Group {
                        children: Vec::new(),
                        is_auto_generated: true,
                        grouping_field: None,
                        grouping_key: Some(CellValue::Text(prefix[depth].clone())),
                        footer_id: None,
                        children_expanded: false,
                    }
                };
                tree.insert_node(RowNode {
                    id: node_id.clone(),
                    parent: Some(parent.clone()),
                    depth: depth as i32,
                    kind,
                })?;
            }
            parent = node_id;
        }

        if !tree.contains(id) {
            let depth = path.len().saturating_sub(1) as i32;
            tree.insert_node(RowNode::leaf(id.clone(), parent, depth))?;
        }
    }

    Ok(tree)
}

// ============================================================================
// EXPANSION
// ============================================================================

/// Carries over expansion of groups that already existed, and applies the
/// default expansion depth to new groups.
fn apply_expansion(tree: &mut RowTree, previous: Option<&RowTree>, default_depth: i32) {
    let group_ids: Vec<(RowId, i32)> = tree
        .nodes()
        .filter(|node| node.is_group() && !node.is_root())
        .map(|node| (node.id.clone(), node.depth))
        .collect();

    for (id, depth) in group_ids {
        let expanded = previous
            .and_then(|prev| prev.get(&id))
            .filter(|node| node.is_group())
            .map(|node| node.children_expanded())
            .unwrap_or(default_depth == -1 || depth < default_depth);

        if let Some(RowNodeKind::Group { children_expanded, .. }) =
            tree.get_mut(&id).map(|node| &mut node.kind)
        {
            *children_expanded = expanded;
        }
    }
}
