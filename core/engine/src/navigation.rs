//! FILENAME: core/engine/src/navigation.rs
//! PURPOSE: Keyboard navigation over cells and column headers.
//! CONTEXT: Navigation is a pure transition function: given the current
//! focus, a key and the page/column geometry it returns the new focus plus
//! the effects the host must perform (scroll, focus, toggle menu). Row
//! indexes are positions in the visible row sequence, not page-relative.
//! Landing on a cell covered by a span is redirected to the spanning cell
//! (vertical and backward moves) or past it (forward moves).

use serde::{Deserialize, Serialize};

use crate::cell_meta::CellMeta;
use crate::rows::visible::PageRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GridFocus {
    #[default]
    None,
    Cell {
        row_index: usize,
        col_index: usize,
    },
    ColumnHeader {
        col_index: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NavigationKey {
    ArrowDown,
    ArrowUp,
    ArrowLeft,
    ArrowRight,
    Enter,
    Tab,
    PageDown,
    PageUp,
    Home,
    End,
    Space,
    /// Any key without a navigation meaning.
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyModifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub meta: bool,
}

impl KeyModifiers {
    pub const NONE: KeyModifiers = KeyModifiers {
        shift: false,
        ctrl: false,
        meta: false,
    };

    pub fn shift() -> Self {
        KeyModifiers {
            shift: true,
            ..Self::NONE
        }
    }

    pub fn ctrl() -> Self {
        KeyModifiers {
            ctrl: true,
            ..Self::NONE
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavigationEffect {
    ScrollToIndexes {
        row_index: Option<usize>,
        col_index: usize,
    },
    FocusCell {
        row_index: usize,
        col_index: usize,
    },
    FocusColumnHeader {
        col_index: usize,
    },
    ToggleColumnMenu {
        col_index: usize,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationOutcome {
    pub effects: Vec<NavigationEffect>,
    /// True when the key was consumed (the host should suppress its default).
    pub handled: bool,
}

/// Geometry of the current view.
pub struct NavigationContext<'a> {
    pub page_range: Option<PageRange>,
    /// Number of visible columns.
    pub col_count: usize,
    pub viewport_page_size: usize,
    /// Cell meta by (visible row index, visible column index).
    pub cell_meta: &'a dyn Fn(usize, usize) -> Option<CellMeta>,
}

impl NavigationContext<'_> {
    fn left_of_span(&self, row_index: usize, col_index: usize) -> usize {
        match (self.cell_meta)(row_index, col_index) {
            Some(CellMeta::Spanned {
                left_visible_cell_index,
                ..
            }) => left_visible_cell_index,
            _ => col_index,
        }
    }

    fn right_of_span(&self, row_index: usize, col_index: usize) -> usize {
        match (self.cell_meta)(row_index, col_index) {
            Some(CellMeta::Spanned {
                right_visible_cell_index,
                ..
            }) => right_visible_cell_index,
            _ => col_index,
        }
    }
}

struct Transition {
    effects: Vec<NavigationEffect>,
    focus: Option<GridFocus>,
}

impl Transition {
    fn new() -> Self {
        Transition {
            effects: Vec::new(),
            focus: None,
        }
    }

    fn go_to_cell(&mut self, col_index: usize, row_index: usize) {
        crate::log_debug!("NAVIGATION", "navigating to cell row {}, col {}", row_index, col_index);
        self.effects.push(NavigationEffect::ScrollToIndexes {
            row_index: Some(row_index),
            col_index,
        });
        self.effects.push(NavigationEffect::FocusCell { row_index, col_index });
        self.focus = Some(GridFocus::Cell { row_index, col_index });
    }

    fn go_to_header(&mut self, col_index: usize) {
        crate::log_debug!("NAVIGATION", "navigating to header col {}", col_index);
        self.effects.push(NavigationEffect::ScrollToIndexes {
            row_index: None,
            col_index,
        });
        self.effects.push(NavigationEffect::FocusColumnHeader { col_index });
        self.focus = Some(GridFocus::ColumnHeader { col_index });
    }
}

/// Applies `key` to `focus`. Returns the new focus and what the host must do.
pub fn navigate(
    focus: GridFocus,
    key: NavigationKey,
    modifiers: KeyModifiers,
    context: &NavigationContext<'_>,
) -> (GridFocus, NavigationOutcome) {
    let (transition, handled) = match focus {
        GridFocus::None => return (focus, NavigationOutcome::default()),
        GridFocus::Cell { row_index, col_index } => {
            handle_cell_key(row_index, col_index, key, modifiers, context)
        }
        GridFocus::ColumnHeader { col_index } => handle_column_header_key(col_index, key, modifiers, context),
    };
    let next = transition.focus.unwrap_or(focus);
    (
        next,
        NavigationOutcome {
            effects: transition.effects,
            handled,
        },
    )
}

fn handle_cell_key(
    row_index: usize,
    col_index: usize,
    key: NavigationKey,
    modifiers: KeyModifiers,
    context: &NavigationContext<'_>,
) -> (Transition, bool) {
    let mut t = Transition::new();
    let Some(range) = context.page_range else {
        return (t, false);
    };
    if context.col_count == 0 {
        return (t, false);
    }

    let first_row = range.first_row_index;
    let last_row = range.last_row_index;
    let last_col = context.col_count - 1;
    let page_size = context.viewport_page_size;

    match key {
        NavigationKey::ArrowDown | NavigationKey::Enter => {
            if row_index < last_row {
                let next_row = row_index + 1;
                t.go_to_cell(context.left_of_span(next_row, col_index), next_row);
            }
        }
        NavigationKey::ArrowUp => {
            if row_index > first_row {
                let next_row = row_index - 1;
                t.go_to_cell(context.left_of_span(next_row, col_index), next_row);
            } else {
                t.go_to_header(col_index);
            }
        }
        NavigationKey::ArrowRight => {
            if col_index < last_col {
                t.go_to_cell(context.right_of_span(row_index, col_index + 1), row_index);
            }
        }
        NavigationKey::ArrowLeft => {
            if col_index > 0 {
                t.go_to_cell(context.left_of_span(row_index, col_index - 1), row_index);
            }
        }
        NavigationKey::Tab => {
            if modifiers.shift {
                if col_index > 0 {
                    t.go_to_cell(context.left_of_span(row_index, col_index - 1), row_index);
                }
            } else if col_index < last_col {
                t.go_to_cell(context.right_of_span(row_index, col_index + 1), row_index);
            }
        }
        NavigationKey::PageDown | NavigationKey::Space => {
            if row_index < last_row {
                let next_row = (row_index + page_size).min(last_row);
                t.go_to_cell(context.left_of_span(next_row, col_index), next_row);
            }
        }
        NavigationKey::PageUp => {
            // First row of the page before the header.
            let next_row = row_index.saturating_sub(page_size).max(first_row);
            if next_row != row_index {
                t.go_to_cell(context.left_of_span(next_row, col_index), next_row);
            } else {
                t.go_to_header(col_index);
            }
        }
        NavigationKey::Home => {
            if modifiers.ctrl || modifiers.meta || modifiers.shift {
                t.go_to_cell(0, first_row);
            } else {
                t.go_to_cell(0, row_index);
            }
        }
        NavigationKey::End => {
            if modifiers.ctrl || modifiers.meta || modifiers.shift {
                t.go_to_cell(last_col, last_row);
            } else {
                t.go_to_cell(last_col, row_index);
            }
        }
        NavigationKey::Other => return (t, false),
    }

    (t, true)
}

fn handle_column_header_key(
    col_index: usize,
    key: NavigationKey,
    modifiers: KeyModifiers,
    context: &NavigationContext<'_>,
) -> (Transition, bool) {
    let mut t = Transition::new();
    if context.col_count == 0 {
        return (t, false);
    }
    let last_col = context.col_count - 1;
    let range = context.page_range;

    match key {
        NavigationKey::ArrowDown => {
            if let Some(range) = range {
                let row = range.first_row_index;
                t.go_to_cell(context.left_of_span(row, col_index), row);
            }
        }
        NavigationKey::ArrowRight => {
            if col_index < last_col {
                t.go_to_header(col_index + 1);
            }
        }
        NavigationKey::ArrowLeft => {
            if col_index > 0 {
                t.go_to_header(col_index - 1);
            }
        }
        NavigationKey::PageDown => {
            if let Some(range) = range {
                let row = (range.first_row_index + context.viewport_page_size).min(range.last_row_index);
                t.go_to_cell(col_index, row);
            }
        }
        NavigationKey::Home => t.go_to_header(0),
        NavigationKey::End => t.go_to_header(last_col),
        NavigationKey::Enter => {
            if modifiers.ctrl || modifiers.meta {
                t.effects.push(NavigationEffect::ToggleColumnMenu { col_index });
            }
        }
        // Consumed so that the viewport does not scroll.
        NavigationKey::Space => {}
        _ => return (t, false),
    }

    (t, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_meta(_: usize, _: usize) -> Option<CellMeta> {
        None
    }

    fn context(meta: &dyn Fn(usize, usize) -> Option<CellMeta>) -> NavigationContext<'_> {
        NavigationContext {
            page_range: Some(PageRange {
                first_row_index: 0,
                last_row_index: 9,
            }),
            col_count: 4,
            viewport_page_size: 5,
            cell_meta: meta,
        }
    }

    fn cell(row_index: usize, col_index: usize) -> GridFocus {
        GridFocus::Cell { row_index, col_index }
    }

    #[test]
    fn test_arrow_down_clamped_at_last_row() {
        let ctx = context(&no_meta);
        let (focus, outcome) = navigate(cell(9, 1), NavigationKey::ArrowDown, KeyModifiers::NONE, &ctx);
        assert_eq!(focus, cell(9, 1));
        assert!(outcome.effects.is_empty());
        assert!(outcome.handled);
    }

    #[test]
    fn test_arrow_up_escapes_to_header() {
        let ctx = context(&no_meta);
        let (focus, outcome) = navigate(cell(0, 2), NavigationKey::ArrowUp, KeyModifiers::NONE, &ctx);
        assert_eq!(focus, GridFocus::ColumnHeader { col_index: 2 });
        assert_eq!(
            outcome.effects,
            vec![
                NavigationEffect::ScrollToIndexes {
                    row_index: None,
                    col_index: 2
                },
                NavigationEffect::FocusColumnHeader { col_index: 2 },
            ]
        );
    }

    #[test]
    fn test_scroll_precedes_focus() {
        let ctx = context(&no_meta);
        let (_, outcome) = navigate(cell(3, 1), NavigationKey::ArrowRight, KeyModifiers::NONE, &ctx);
        assert!(matches!(outcome.effects[0], NavigationEffect::ScrollToIndexes { .. }));
        assert_eq!(outcome.effects[1], NavigationEffect::FocusCell { row_index: 3, col_index: 2 });
    }

    #[test]
    fn test_page_keys() {
        let ctx = context(&no_meta);
        let (focus, _) = navigate(cell(7, 0), NavigationKey::PageDown, KeyModifiers::NONE, &ctx);
        assert_eq!(focus, cell(9, 0));
        let (focus, _) = navigate(cell(7, 0), NavigationKey::PageUp, KeyModifiers::NONE, &ctx);
        assert_eq!(focus, cell(2, 0));
        let (focus, _) = navigate(cell(0, 0), NavigationKey::PageUp, KeyModifiers::NONE, &ctx);
        assert_eq!(focus, GridFocus::ColumnHeader { col_index: 0 });
        let (focus, _) = navigate(cell(2, 0), NavigationKey::Space, KeyModifiers::NONE, &ctx);
        assert_eq!(focus, cell(7, 0));
    }

    #[test]
    fn test_home_end() {
        let ctx = context(&no_meta);
        let (focus, _) = navigate(cell(4, 2), NavigationKey::Home, KeyModifiers::NONE, &ctx);
        assert_eq!(focus, cell(4, 0));
        let (focus, _) = navigate(cell(4, 2), NavigationKey::End, KeyModifiers::ctrl(), &ctx);
        assert_eq!(focus, cell(9, 3));
    }

    #[test]
    fn test_tab_noop_at_bounds() {
        let ctx = context(&no_meta);
        let (focus, outcome) = navigate(cell(1, 3), NavigationKey::Tab, KeyModifiers::NONE, &ctx);
        assert_eq!(focus, cell(1, 3));
        assert!(outcome.effects.is_empty());
        let (focus, _) = navigate(cell(1, 0), NavigationKey::Tab, KeyModifiers::shift(), &ctx);
        assert_eq!(focus, cell(1, 0));
    }

    #[test]
    fn test_span_redirect() {
        // Row 1: column 0 spans columns 0..=2.
        let meta = |row: usize, col: usize| {
            if row == 1 && (col == 1 || col == 2) {
                Some(CellMeta::Spanned {
                    left_visible_cell_index: 0,
                    right_visible_cell_index: 3,
                })
            } else {
                None
            }
        };
        let ctx = context(&meta);
        let (focus, _) = navigate(cell(0, 2), NavigationKey::ArrowDown, KeyModifiers::NONE, &ctx);
        assert_eq!(focus, cell(1, 0));
        let (focus, _) = navigate(cell(1, 0), NavigationKey::ArrowRight, KeyModifiers::NONE, &ctx);
        assert_eq!(focus, cell(1, 3));
        let (focus, _) = navigate(cell(1, 3), NavigationKey::ArrowLeft, KeyModifiers::NONE, &ctx);
        assert_eq!(focus, cell(1, 0));
    }

    #[test]
    fn test_header_keys() {
        let ctx = context(&no_meta);
        let header = GridFocus::ColumnHeader { col_index: 1 };
        let (focus, _) = navigate(header, NavigationKey::ArrowDown, KeyModifiers::NONE, &ctx);
        assert_eq!(focus, cell(0, 1));
        let (focus, _) = navigate(header, NavigationKey::End, KeyModifiers::NONE, &ctx);
        assert_eq!(focus, GridFocus::ColumnHeader { col_index: 3 });

        let (focus, outcome) = navigate(header, NavigationKey::Enter, KeyModifiers::ctrl(), &ctx);
        assert_eq!(focus, header);
        assert_eq!(outcome.effects, vec![NavigationEffect::ToggleColumnMenu { col_index: 1 }]);

        let (_, outcome) = navigate(header, NavigationKey::Space, KeyModifiers::NONE, &ctx);
        assert!(outcome.handled);
        assert!(outcome.effects.is_empty());

        let (_, outcome) = navigate(header, NavigationKey::Tab, KeyModifiers::NONE, &ctx);
        assert!(!outcome.handled);
    }

    #[test]
    fn test_no_page_means_unhandled() {
        let ctx = NavigationContext {
            page_range: None,
            col_count: 4,
            viewport_page_size: 5,
            cell_meta: &no_meta,
        };
        let (_, outcome) = navigate(cell(0, 0), NavigationKey::ArrowDown, KeyModifiers::NONE, &ctx);
        assert!(!outcome.handled);
    }
}
