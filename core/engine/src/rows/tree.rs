//! FILENAME: core/engine/src/rows/tree.rs
//! PURPOSE: The hierarchical row tree (arena keyed by row id).
//! CONTEXT: Nodes reference their parent and children by id, never by
//! pointer, so the tree has no ownership cycles. The root node is reserved
//! (`ROOT_GROUP_ID`) and owns every top-level node. Root-level pinned rows
//! and the root footer live at depth -1 without a parent.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{GridError, GridResult};
use crate::value::{CellValue, RowId};

/// Id of the synthetic root group.
pub const ROOT_GROUP_ID: &str = "auto-generated-group-node-root";

/// Prefix of synthetic group rows produced by the grouping strategies.
pub const AUTO_GENERATED_ROW_PREFIX: &str = "auto-generated-row-";

/// Prefix of synthetic footer rows produced by the aggregation feature.
pub const FOOTER_ROW_PREFIX: &str = "auto-generated-group-footer-";

pub fn root_id() -> RowId {
    RowId::Text(ROOT_GROUP_ID.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinnedPosition {
    Top,
    Bottom,
}

// ============================================================================
// ROW NODES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RowNodeKind {
    Leaf,
    Group {
        children: Vec<RowId>,
        /// True for synthetic groups that have no caller row behind them.
        is_auto_generated: bool,
        grouping_field: Option<String>,
        grouping_key: Option<CellValue>,
        footer_id: Option<RowId>,
        children_expanded: bool,
    },
    Footer,
    Pinned {
        position: PinnedPosition,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowNode {
    pub id: RowId,
    pub parent: Option<RowId>,
    /// -1 for the root and root-level pinned/footer rows.
    pub depth: i32,
    pub kind: RowNodeKind,
}

impl RowNode {
    pub fn leaf(id: RowId, parent: RowId, depth: i32) -> Self {
        RowNode {
            id,
            parent: Some(parent),
            depth,
            kind: RowNodeKind::Leaf,
        }
    }

    pub fn root() -> Self {
        RowNode {
            id: root_id(),
            parent: None,
            depth: -1,
            kind: RowNodeKind::Group {
                children: Vec::new(),
                is_auto_generated: true,
                grouping_field: None,
                grouping_key: None,
                footer_id: None,
                children_expanded: true,
            },
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(&self.id, RowId::Text(s) if s == ROOT_GROUP_ID)
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, RowNodeKind::Group { .. })
    }

    pub fn is_footer(&self) -> bool {
        matches!(self.kind, RowNodeKind::Footer)
    }

    pub fn is_pinned(&self) -> bool {
        matches!(self.kind, RowNodeKind::Pinned { .. })
    }

    /// Synthetic rows not present in caller data.
    pub fn is_auto_generated(&self) -> bool {
        match &self.kind {
            RowNodeKind::Group { is_auto_generated, .. } => *is_auto_generated,
            RowNodeKind::Footer => true,
            RowNodeKind::Leaf | RowNodeKind::Pinned { .. } => false,
        }
    }

    pub fn children(&self) -> &[RowId] {
        match &self.kind {
            RowNodeKind::Group { children, .. } => children,
            _ => &[],
        }
    }

    pub fn footer_id(&self) -> Option<&RowId> {
        match &self.kind {
            RowNodeKind::Group { footer_id, .. } => footer_id.as_ref(),
            _ => None,
        }
    }

    pub fn children_expanded(&self) -> bool {
        match &self.kind {
            RowNodeKind::Group { children_expanded, .. } => *children_expanded,
            _ => false,
        }
    }
}

// ============================================================================
// ROW TREE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RowTree {
    nodes: FxHashMap<RowId, RowNode>,
}

impl Default for RowTree {
    fn default() -> Self {
        Self::new()
    }
}

impl RowTree {
    /// Creates a tree holding only the root group.
    pub fn new() -> Self {
        let mut nodes = FxHashMap::default();
        nodes.insert(root_id(), RowNode::root());
        RowTree { nodes }
    }

    pub fn get(&self, id: &RowId) -> Option<&RowNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &RowId) -> Option<&mut RowNode> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &RowId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn root(&self) -> &RowNode {
        // The root is inserted by `new` and never removed.
        &self.nodes[&root_id()]
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn nodes(&self) -> impl Iterator<Item = &RowNode> {
        self.nodes.values()
    }

    /// Inserts `node`. If it has a parent, it is linked as the parent's last
    /// child (or as the parent's footer for footer nodes). Re-inserting an
    /// existing id replaces the node in place without relinking it.
    pub fn insert_node(&mut self, node: RowNode) -> GridResult<()> {
        let already_present = self.nodes.contains_key(&node.id);
        if !already_present {
            if let Some(parent_id) = &node.parent {
                let parent = self
                    .nodes
                    .get_mut(parent_id)
                    .ok_or_else(|| GridError::MissingRow(parent_id.clone()))?;
                link_child(parent, &node);
            }
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Removes `id` and its whole subtree, unlinking it from its parent.
    pub fn remove_node(&mut self, id: &RowId) -> GridResult<RowNode> {
        let node = self
            .nodes
            .remove(id)
            .ok_or_else(|| GridError::MissingRow(id.clone()))?;

        if let Some(parent) = node.parent.as_ref().and_then(|p| self.nodes.get_mut(p)) {
            if let RowNodeKind::Group { children, footer_id, .. } = &mut parent.kind {
                children.retain(|child| child != id);
                if footer_id.as_ref() == Some(id) {
                    *footer_id = None;
                }
            }
        }

        let mut stack: Vec<RowId> = node.children().to_vec();
        if let Some(footer) = node.footer_id() {
            stack.push(footer.clone());
        }
        while let Some(child_id) = stack.pop() {
            if let Some(child) = self.nodes.remove(&child_id) {
                stack.extend(child.children().iter().cloned());
                if let Some(footer) = child.footer_id() {
                    stack.push(footer.clone());
                }
            }
        }

        Ok(node)
    }

    /// Descendants of `id` in depth-first pre-order. Auto-generated nodes are
    /// skipped when `skip_auto_generated` is set, but their subtrees are still
    /// walked. Footers are not descendants.
    pub fn descendants(&self, id: &RowId, skip_auto_generated: bool) -> Vec<RowId> {
        let mut result = Vec::new();
        if let Some(node) = self.nodes.get(id) {
            self.collect_descendants(node, skip_auto_generated, &mut result);
        }
        result
    }

    fn collect_descendants(&self, node: &RowNode, skip_auto_generated: bool, out: &mut Vec<RowId>) {
        for child_id in node.children() {
            let Some(child) = self.nodes.get(child_id) else {
                continue;
            };
            if !skip_auto_generated || !child.is_auto_generated() {
                out.push(child_id.clone());
            }
            self.collect_descendants(child, skip_auto_generated, out);
        }
    }

    /// All nodes below the root in display order: each group is followed by
    /// its children and then its footer. Expansion state is ignored.
    pub fn flatten(&self) -> Vec<RowId> {
        let mut result = Vec::with_capacity(self.nodes.len());
        self.flatten_into(self.root(), &mut result);
        result
    }

    fn flatten_into(&self, node: &RowNode, out: &mut Vec<RowId>) {
        for child_id in node.children() {
            out.push(child_id.clone());
            if let Some(child) = self.nodes.get(child_id) {
                self.flatten_into(child, out);
            }
        }
        if !node.is_root() {
            if let Some(footer) = node.footer_id() {
                out.push(footer.clone());
            }
        }
    }

    /// Number of nodes per depth (root excluded).
    pub fn depth_counts(&self) -> FxHashMap<i32, usize> {
        let mut counts = FxHashMap::default();
        for node in self.nodes.values() {
            if !node.is_root() {
                *counts.entry(node.depth).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Checks the structural invariants of the tree.
    pub fn validate(&self) -> GridResult<()> {
        for node in self.nodes.values() {
            match &node.parent {
                Some(parent_id) => {
                    let parent = self.nodes.get(parent_id).ok_or_else(|| {
                        GridError::Configuration(format!(
                            "Row #{} references missing parent #{}",
                            node.id, parent_id
                        ))
                    })?;
                    let linked = parent.children().contains(&node.id)
                        || parent.footer_id() == Some(&node.id);
                    if !linked {
                        return Err(GridError::Configuration(format!(
                            "Row #{} is not linked from its parent #{}",
                            node.id, parent_id
                        )));
                    }
                }
                None => {
                    let root_level = node.is_root() || node.is_pinned() || node.is_footer();
                    if !root_level || node.depth != -1 {
                        return Err(GridError::Configuration(format!(
                            "Row #{} has no parent but is not a root-level row",
                            node.id
                        )));
                    }
                }
            }

            for child_id in node.children() {
                let child = self
                    .nodes
                    .get(child_id)
                    .ok_or_else(|| GridError::MissingRow(child_id.clone()))?;
                if child.parent.as_ref() != Some(&node.id) {
                    return Err(GridError::Configuration(format!(
                        "Child #{} of #{} points to another parent",
                        child_id, node.id
                    )));
                }
            }
        }

        // Every node reachable from the root at most once means no cycles.
        let mut seen = rustc_hash::FxHashSet::default();
        let mut stack = vec![root_id()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                return Err(GridError::Configuration(format!("Cycle detected at row #{}", id)));
            }
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.children().iter().cloned());
            }
        }

        Ok(())
    }
}

fn link_child(parent: &mut RowNode, child: &RowNode) {
    let is_footer = child.is_footer();
    match &mut parent.kind {
        RowNodeKind::Group { children, footer_id, .. } => {
            if is_footer {
                *footer_id = Some(child.id.clone());
            } else {
                children.push(child.id.clone());
            }
        }
        kind => {
            // A leaf gaining a child becomes a (caller-backed) group.
            let children = if is_footer { Vec::new() } else { vec![child.id.clone()] };
            let footer_id = if is_footer { Some(child.id.clone()) } else { None };
            *kind = RowNodeKind::Group {
                children,
                is_auto_generated: false,
                grouping_field: None,
                grouping_key: None,
                footer_id,
                children_expanded: false,
            };
        }
    }
}
