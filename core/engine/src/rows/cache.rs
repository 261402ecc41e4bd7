//! FILENAME: core/engine/src/rows/cache.rs
//! PURPOSE: Internal cache of row models keyed by row id.
//! CONTEXT: The cache is replaced (never patched in place) on every row-set
//! change. Partial updates record which ids were inserted, modified or
//! deleted since the last full hydration so that the flat tree builder can
//! keep unaffected rows where they are.

use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{GridError, GridResult};
use crate::value::{CellValue, RowId, RowModel};

/// Extracts the id of a row. `None` means the row has no usable id.
pub type GetRowId = Rc<dyn Fn(&RowModel) -> Option<RowId>>;

/// Row-id extraction reading a single field (numbers and text only).
/// Whole numbers become numeric ids. Fractional numbers keep their text form
/// so that `1.5` and `1.7` stay distinct. NaN and infinities have no id.
pub fn field_row_id(field: impl Into<String>) -> GetRowId {
    let field = field.into();
    Rc::new(move |row: &RowModel| match row.get(&field) {
        CellValue::Number(n) => number_row_id(*n),
        CellValue::Text(s) => Some(RowId::Text(s.clone())),
        _ => None,
    })
}

fn number_row_id(n: f64) -> Option<RowId> {
    if !n.is_finite() {
        return None;
    }
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return Some(RowId::Number(n as i64));
    }
    Some(RowId::Text(n.to_string()))
}

pub(crate) fn row_id_from_model(row: &RowModel, get_row_id: &GetRowId) -> GridResult<RowId> {
    get_row_id(row).ok_or_else(|| GridError::MissingRowId(format!("{:?}", row)))
}

// ============================================================================
// PARTIAL UPDATES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartialUpdateAction {
    Insert,
    Modify,
    Delete,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialUpdates {
    pub insert: Vec<RowId>,
    pub modify: Vec<RowId>,
    pub delete: Vec<RowId>,
    pub id_to_action: FxHashMap<RowId, PartialUpdateAction>,
}

impl PartialUpdates {
    fn remove(&mut self, action: PartialUpdateAction, id: &RowId) {
        let list = match action {
            PartialUpdateAction::Insert => &mut self.insert,
            PartialUpdateAction::Modify => &mut self.modify,
            PartialUpdateAction::Delete => &mut self.delete,
        };
        list.retain(|existing| existing != id);
    }

    fn push(&mut self, action: PartialUpdateAction, id: RowId) {
        match action {
            PartialUpdateAction::Insert => self.insert.push(id.clone()),
            PartialUpdateAction::Modify => self.modify.push(id.clone()),
            PartialUpdateAction::Delete => self.delete.push(id.clone()),
        }
        self.id_to_action.insert(id, action);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowUpdateAction {
    Upsert,
    Delete,
}

/// One entry of an `update_rows` batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    pub row: RowModel,
    pub action: RowUpdateAction,
}

impl RowUpdate {
    /// Inserts the row, or merges its fields into the existing row.
    pub fn upsert(row: RowModel) -> Self {
        RowUpdate {
            row,
            action: RowUpdateAction::Upsert,
        }
    }

    /// Deletes the row whose id is extracted from `row`.
    pub fn delete(row: RowModel) -> Self {
        RowUpdate {
            row,
            action: RowUpdateAction::Delete,
        }
    }
}

// ============================================================================
// ROWS CACHE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowsCache {
    pub data_row_id_to_model: FxHashMap<RowId, RowModel>,
    /// Data row ids in source order.
    pub data_row_ids: Vec<RowId>,
    pub partial_updates: Option<PartialUpdates>,
}

impl RowsCache {
    /// Builds a cache from a full row set. A duplicate id keeps the position
    /// of its first occurrence and the model of its last one.
    pub fn from_rows(rows: &[RowModel], get_row_id: &GetRowId) -> GridResult<Self> {
        let mut cache = RowsCache::default();
        for row in rows {
            let id = row_id_from_model(row, get_row_id)?;
            if cache.data_row_id_to_model.insert(id.clone(), row.clone()).is_none() {
                cache.data_row_ids.push(id);
            }
        }
        Ok(cache)
    }

    pub fn get(&self, id: &RowId) -> Option<&RowModel> {
        self.data_row_id_to_model.get(id)
    }

    pub fn len(&self) -> usize {
        self.data_row_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_row_ids.is_empty()
    }

    /// Returns a new cache with `updates` applied, accumulating the partial
    /// update actions on top of the ones not yet hydrated.
    pub fn with_updates(&self, updates: &[RowUpdate], get_row_id: &GetRowId) -> GridResult<Self> {
        // A server can batch several updates for the same row in one call.
        let mut uniq_order: Vec<RowId> = Vec::new();
        let mut uniq: FxHashMap<RowId, RowUpdate> = FxHashMap::default();
        for update in updates {
            let id = row_id_from_model(&update.row, get_row_id)?;
            match uniq.get_mut(&id) {
                Some(existing) => {
                    existing.row.merge(&update.row);
                    if update.action == RowUpdateAction::Delete {
                        existing.action = RowUpdateAction::Delete;
                    }
                }
                None => {
                    uniq_order.push(id.clone());
                    uniq.insert(id, update.clone());
                }
            }
        }

        let mut partial = self.partial_updates.clone().unwrap_or_default();
        let mut lookup = self.data_row_id_to_model.clone();
        let mut ids = self.data_row_ids.clone();
        let mut deleted: FxHashSet<RowId> = FxHashSet::default();

        for id in uniq_order {
            let Some(update) = uniq.remove(&id) else {
                continue;
            };
            let already_applied = partial.id_to_action.get(&id).copied();

            if update.action == RowUpdateAction::Delete {
                if already_applied == Some(PartialUpdateAction::Delete) || !lookup.contains_key(&id) {
                    continue;
                }
                if let Some(previous) = already_applied {
                    partial.remove(previous, &id);
                }
                partial.push(PartialUpdateAction::Delete, id.clone());
                lookup.remove(&id);
                deleted.insert(id);
                continue;
            }

            if let Some(old_row) = lookup.get_mut(&id) {
                match already_applied {
                    Some(PartialUpdateAction::Delete) => {
                        partial.remove(PartialUpdateAction::Delete, &id);
                        partial.push(PartialUpdateAction::Modify, id.clone());
                    }
                    None => partial.push(PartialUpdateAction::Modify, id.clone()),
                    Some(_) => {}
                }
                old_row.merge(&update.row);
                continue;
            }

            match already_applied {
                Some(PartialUpdateAction::Delete) => {
                    partial.remove(PartialUpdateAction::Delete, &id);
                    partial.push(PartialUpdateAction::Insert, id.clone());
                }
                None => partial.push(PartialUpdateAction::Insert, id.clone()),
                Some(_) => {}
            }
            lookup.insert(id.clone(), update.row);
            ids.push(id);
        }

        // Ids are unique within a batch, so an inserted id is never in `deleted`.
        if !deleted.is_empty() {
            ids.retain(|existing| !deleted.contains(existing));
        }

        Ok(RowsCache {
            data_row_id_to_model: lookup,
            data_row_ids: ids,
            partial_updates: Some(partial),
        })
    }
}
