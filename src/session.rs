//! Interactive selection state: the tree, the cursor and the undo history.

use crate::cursor::{Cursor, Navigator};
use crate::diff::ChangeSet;
use crate::patch::{self, Patch};
use crate::selection::{Edit, SelectionTree};
use std::collections::BTreeSet;

/// User intent, independent of the key that triggered it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Next,
    Previous,
    First,
    Last,
    Open,
    Close,
    Toggle,
    SelectAll,
    SelectNone,
    Undo,
    Redo,
    Confirm,
    Quit,
}

/// What the caller should do after an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Confirm,
    Abort,
}

/// A selection edit with the view it was made from
#[derive(Debug, Clone)]
struct HistoryEntry {
    edit: Edit,
    open: BTreeSet<usize>,
    cursor: Cursor,
}

#[derive(Debug, Clone)]
pub struct Session {
    tree: SelectionTree,
    navigator: Navigator,
    undo: Vec<HistoryEntry>,
    redo: Vec<HistoryEntry>,
}

impl Session {
    pub fn new(changes: ChangeSet) -> Self {
        Self {
            tree: SelectionTree::new(changes),
            navigator: Navigator::new(),
            undo: Vec::new(),
            redo: Vec::new(),
        }
    }

    pub fn tree(&self) -> &SelectionTree {
        &self.tree
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn changes(&self) -> &ChangeSet {
        self.tree.changes()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Process one action to completion
    pub fn handle(&mut self, action: Action) -> Flow {
        tracing::trace!(?action, cursor = ?self.navigator.cursor(), "action");
        let changes = self.tree.changes();

        match action {
            Action::Next => self.navigator.next(changes),
            Action::Previous => self.navigator.previous(changes),
            Action::First => self.navigator.first(changes),
            Action::Last => self.navigator.last(changes),
            Action::Open => self.navigator.open(changes),
            Action::Close => self.navigator.close(),
            Action::Toggle => {
                let node = self.navigator.cursor().node();
                let edit = self.tree.toggle(node);
                self.record(edit);
            }
            Action::SelectAll => {
                let edit = self.tree.select_all();
                self.record(edit);
            }
            Action::SelectNone => {
                let edit = self.tree.select_none();
                self.record(edit);
            }
            Action::Undo => self.undo(),
            Action::Redo => self.redo(),
            Action::Confirm => return Flow::Confirm,
            Action::Quit => return Flow::Abort,
        }

        Flow::Continue
    }

    /// Push an edit onto the history; empty edits are not recorded
    fn record(&mut self, edit: Edit) {
        if edit.is_empty() {
            return;
        }
        self.redo.clear();
        self.undo.push(HistoryEntry {
            edit,
            open: self.navigator.open_files().clone(),
            cursor: self.navigator.cursor(),
        });
    }

    fn undo(&mut self) {
        let Some(entry) = self.undo.pop() else {
            return;
        };
        self.tree.revert(&entry.edit);
        let current = self.swap_view(&entry);
        self.redo.push(current);
    }

    fn redo(&mut self) {
        let Some(entry) = self.redo.pop() else {
            return;
        };
        self.tree.reapply(&entry.edit);
        let current = self.swap_view(&entry);
        self.undo.push(current);
    }

    /// Restore the view stored in `entry`, returning an entry for the view
    /// being replaced
    fn swap_view(&mut self, entry: &HistoryEntry) -> HistoryEntry {
        let current = HistoryEntry {
            edit: entry.edit.clone(),
            open: self.navigator.open_files().clone(),
            cursor: self.navigator.cursor(),
        };
        self.navigator
            .restore(entry.open.clone(), entry.cursor, self.tree.changes());
        current
    }

    /// Patch of the current selection
    pub fn build(&self) -> Patch {
        patch::build(&self.tree)
    }
}
