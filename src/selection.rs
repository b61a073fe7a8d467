//! Tri-state selection over a [`ChangeSet`].
//!
//! Only leaves carry a stored state: the rename and mode facets of a file,
//! each added or removed line of a text hunk, and the single whole-content
//! leaf of added, deleted and binary files. Every other node derives its
//! state from a tally of its children, so a leaf update touches only its
//! ancestors.

use crate::diff::{ChangeSet, FileChange, LineKind};

/// Selection state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Selection {
    #[default]
    None,
    Partial,
    Full,
}

impl Selection {
    pub fn from_bool(selected: bool) -> Self {
        if selected {
            Selection::Full
        } else {
            Selection::None
        }
    }

    /// Target state of a toggle: Full goes to None, anything else to Full
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Selection::Full => Selection::None,
            Selection::None | Selection::Partial => Selection::Full,
        }
    }
}

/// Address of a node in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    Root,
    File(usize),
    /// Rename facet of a file
    Rename(usize),
    /// Mode facet of a file
    Mode(usize),
    /// All content of a file
    Content(usize),
    Hunk(usize, usize),
    /// Index into the hunk's lines, context included
    Line(usize, usize, usize),
}

impl NodeId {
    pub fn file(self) -> Option<usize> {
        match self {
            NodeId::Root => None,
            NodeId::File(f)
            | NodeId::Rename(f)
            | NodeId::Mode(f)
            | NodeId::Content(f)
            | NodeId::Hunk(f, _)
            | NodeId::Line(f, _, _) => Some(f),
        }
    }
}

/// A node that stores its own state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leaf {
    Rename(usize),
    Mode(usize),
    /// Content that is selected as a whole
    Whole(usize),
    Line(usize, usize, usize),
}

impl Leaf {
    pub fn file(self) -> usize {
        match self {
            Leaf::Rename(f) | Leaf::Mode(f) | Leaf::Whole(f) | Leaf::Line(f, _, _) => f,
        }
    }
}

/// One leaf changed by a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafChange {
    pub leaf: Leaf,
    pub before: bool,
    pub after: bool,
}

/// Journal of a single mutation, used to undo and redo it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Edit {
    pub changes: Vec<LeafChange>,
}

impl Edit {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
    full: usize,
    partial: usize,
    none: usize,
}

impl Tally {
    fn slot(&mut self, state: Selection) -> &mut usize {
        match state {
            Selection::Full => &mut self.full,
            Selection::Partial => &mut self.partial,
            Selection::None => &mut self.none,
        }
    }

    fn add(&mut self, state: Selection) {
        *self.slot(state) += 1;
    }

    /// Move one child from `before` to `after`
    fn shift(&mut self, before: Selection, after: Selection) {
        if before != after {
            let slot = self.slot(before);
            *slot = slot.saturating_sub(1);
            self.add(after);
        }
    }

    fn total(&self) -> usize {
        self.full + self.partial + self.none
    }

    fn state(&self) -> Selection {
        let total = self.total();
        if total == 0 || self.none == total {
            Selection::None
        } else if self.full == total {
            Selection::Full
        } else {
            Selection::Partial
        }
    }
}

#[derive(Debug, Clone)]
struct HunkNode {
    /// `None` for context lines
    lines: Vec<Option<bool>>,
    tally: Tally,
}

#[derive(Debug, Clone)]
enum ContentNode {
    Absent,
    Whole(bool),
    Hunks { hunks: Vec<HunkNode>, tally: Tally },
}

impl ContentNode {
    fn state(&self) -> Option<Selection> {
        match self {
            ContentNode::Absent => None,
            ContentNode::Whole(selected) => Some(Selection::from_bool(*selected)),
            ContentNode::Hunks { tally, .. } => Some(tally.state()),
        }
    }
}

#[derive(Debug, Clone)]
struct FileNode {
    rename: Option<bool>,
    mode: Option<bool>,
    content: ContentNode,
    /// Over the facets and the content node
    tally: Tally,
}

impl FileNode {
    fn new(change: &FileChange) -> Self {
        let content = if change.is_coarse() {
            ContentNode::Whole(false)
        } else if change.hunks.is_empty() {
            ContentNode::Absent
        } else {
            let hunks: Vec<HunkNode> = change
                .hunks
                .iter()
                .map(|hunk| {
                    let lines: Vec<Option<bool>> = hunk
                        .lines
                        .iter()
                        .map(|line| line.is_change().then_some(false))
                        .collect();
                    let mut tally = Tally::default();
                    lines.iter().flatten().for_each(|_| tally.add(Selection::None));
                    HunkNode { lines, tally }
                })
                .collect();
            let mut tally = Tally::default();
            hunks.iter().for_each(|h| tally.add(h.tally.state()));
            ContentNode::Hunks { hunks, tally }
        };

        let rename = change.has_rename().then_some(false);
        let mode = change.has_mode_change().then_some(false);

        let mut tally = Tally::default();
        rename.iter().chain(mode.iter()).for_each(|_| tally.add(Selection::None));
        if let Some(state) = content.state() {
            tally.add(state);
        }

        Self {
            rename,
            mode,
            content,
            tally,
        }
    }
}

/// Selection state of every node of a change set
#[derive(Debug, Clone)]
pub struct SelectionTree {
    changes: ChangeSet,
    files: Vec<FileNode>,
    /// Over files that have at least one leaf
    tally: Tally,
}

impl SelectionTree {
    /// Create a tree with nothing selected
    pub fn new(changes: ChangeSet) -> Self {
        let files: Vec<FileNode> = changes.files.iter().map(FileNode::new).collect();
        let mut tally = Tally::default();
        files
            .iter()
            .filter(|f| f.tally.total() > 0)
            .for_each(|f| tally.add(f.tally.state()));
        Self {
            changes,
            files,
            tally,
        }
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub fn file(&self, f: usize) -> Option<&FileChange> {
        self.changes.files.get(f)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn state(&self, node: NodeId) -> Selection {
        self.try_state(node).unwrap_or_default()
    }

    fn try_state(&self, node: NodeId) -> Option<Selection> {
        if let NodeId::Root = node {
            return Some(self.tally.state());
        }
        let file = self.files.get(node.file()?)?;
        match node {
            NodeId::Root => None,
            NodeId::File(_) => Some(file.tally.state()),
            NodeId::Rename(_) => file.rename.map(Selection::from_bool),
            NodeId::Mode(_) => file.mode.map(Selection::from_bool),
            NodeId::Content(_) => file.content.state(),
            NodeId::Hunk(_, h) => match &file.content {
                ContentNode::Hunks { hunks, .. } => Some(hunks.get(h)?.tally.state()),
                content => content.state(),
            },
            NodeId::Line(_, h, l) => match &file.content {
                ContentNode::Hunks { hunks, .. } => {
                    hunks.get(h)?.lines.get(l)?.map(Selection::from_bool)
                }
                content => content.state(),
            },
        }
    }

    /// Stored value of a leaf, `None` if it does not exist
    pub fn leaf_value(&self, leaf: Leaf) -> Option<bool> {
        let file = self.files.get(leaf.file())?;
        match leaf {
            Leaf::Rename(_) => file.rename,
            Leaf::Mode(_) => file.mode,
            Leaf::Whole(_) => match file.content {
                ContentNode::Whole(selected) => Some(selected),
                _ => None,
            },
            Leaf::Line(_, h, l) => match &file.content {
                ContentNode::Hunks { hunks, .. } => *hunks.get(h)?.lines.get(l)?,
                _ => None,
            },
        }
    }

    /// Every leaf below (or at) `node`
    pub fn leaves(&self, node: NodeId) -> Vec<Leaf> {
        let mut leaves = Vec::new();
        match node {
            NodeId::Root => {
                for f in 0..self.files.len() {
                    self.collect_file(f, &mut leaves);
                }
            }
            NodeId::File(f) => self.collect_file(f, &mut leaves),
            NodeId::Rename(f) | NodeId::Mode(f) => {
                let leaf = if let NodeId::Rename(_) = node {
                    Leaf::Rename(f)
                } else {
                    Leaf::Mode(f)
                };
                if self.leaf_value(leaf).is_some() {
                    leaves.push(leaf);
                }
            }
            NodeId::Content(f) => self.collect_content(f, None, &mut leaves),
            NodeId::Hunk(f, h) => self.collect_content(f, Some((h, None)), &mut leaves),
            NodeId::Line(f, h, l) => self.collect_content(f, Some((h, Some(l))), &mut leaves),
        }
        leaves
    }

    fn collect_file(&self, f: usize, leaves: &mut Vec<Leaf>) {
        let Some(file) = self.files.get(f) else {
            return;
        };
        if file.rename.is_some() {
            leaves.push(Leaf::Rename(f));
        }
        if file.mode.is_some() {
            leaves.push(Leaf::Mode(f));
        }
        self.collect_content(f, None, leaves);
    }

    /// `within` restricts collection to one hunk, and optionally one line
    fn collect_content(
        &self,
        f: usize,
        within: Option<(usize, Option<usize>)>,
        leaves: &mut Vec<Leaf>,
    ) {
        let Some(file) = self.files.get(f) else {
            return;
        };
        match &file.content {
            ContentNode::Absent => {}
            ContentNode::Whole(_) => leaves.push(Leaf::Whole(f)),
            ContentNode::Hunks { hunks, .. } => {
                for (h, hunk) in hunks.iter().enumerate() {
                    if within.is_some_and(|(only, _)| only != h) {
                        continue;
                    }
                    for (l, line) in hunk.lines.iter().enumerate() {
                        let wanted = match within {
                            Some((_, Some(only))) => only == l,
                            _ => true,
                        };
                        if wanted && line.is_some() {
                            leaves.push(Leaf::Line(f, h, l));
                        }
                    }
                }
            }
        }
    }

    /// Set every leaf below `node` to `state`.
    ///
    /// `Partial` is only ever derived, so setting it does nothing.
    pub fn set(&mut self, node: NodeId, state: Selection) -> Edit {
        let value = match state {
            Selection::Full => true,
            Selection::None => false,
            Selection::Partial => return Edit::default(),
        };

        let mut edit = Edit::default();
        for leaf in self.leaves(node) {
            if let Some(before) = self.leaf_value(leaf)
                && before != value
            {
                self.write_leaf(leaf, value);
                edit.changes.push(LeafChange {
                    leaf,
                    before,
                    after: value,
                });
            }
        }
        edit
    }

    /// Full becomes None; None and Partial become Full
    pub fn toggle(&mut self, node: NodeId) -> Edit {
        let target = self.state(node).toggled();
        self.set(node, target)
    }

    pub fn select_all(&mut self) -> Edit {
        self.set(NodeId::Root, Selection::Full)
    }

    pub fn select_none(&mut self) -> Edit {
        self.set(NodeId::Root, Selection::None)
    }

    /// Undo a mutation returned by this tree
    pub fn revert(&mut self, edit: &Edit) {
        for change in edit.changes.iter().rev() {
            self.write_leaf(change.leaf, change.before);
        }
    }

    /// Redo a mutation previously reverted
    pub fn reapply(&mut self, edit: &Edit) {
        for change in &edit.changes {
            self.write_leaf(change.leaf, change.after);
        }
    }

    /// Store a leaf value and update the tallies of its ancestors
    fn write_leaf(&mut self, leaf: Leaf, value: bool) {
        let Some(file) = self.files.get_mut(leaf.file()) else {
            return;
        };
        let file_before = file.tally.state();
        let after = Selection::from_bool(value);

        match leaf {
            Leaf::Rename(_) | Leaf::Mode(_) => {
                let slot = if let Leaf::Rename(_) = leaf {
                    &mut file.rename
                } else {
                    &mut file.mode
                };
                let Some(stored) = slot.as_mut() else {
                    return;
                };
                file.tally.shift(Selection::from_bool(*stored), after);
                *stored = value;
            }
            Leaf::Whole(_) => {
                let ContentNode::Whole(stored) = &mut file.content else {
                    return;
                };
                file.tally.shift(Selection::from_bool(*stored), after);
                *stored = value;
            }
            Leaf::Line(_, h, l) => {
                let ContentNode::Hunks { hunks, tally } = &mut file.content else {
                    return;
                };
                let Some(hunk) = hunks.get_mut(h) else {
                    return;
                };
                let Some(Some(stored)) = hunk.lines.get_mut(l) else {
                    return;
                };
                let content_before = tally.state();
                let hunk_before = hunk.tally.state();
                hunk.tally.shift(Selection::from_bool(*stored), after);
                *stored = value;
                tally.shift(hunk_before, hunk.tally.state());
                file.tally.shift(content_before, tally.state());
            }
        }

        let file_after = file.tally.state();
        if file.tally.total() > 0 {
            self.tally.shift(file_before, file_after);
        }
    }

    /// Whether a line of a text hunk is selectable
    pub fn is_selectable_line(&self, f: usize, h: usize, l: usize) -> bool {
        self.file(f)
            .filter(|change| !change.is_coarse())
            .and_then(|change| change.hunks.get(h))
            .and_then(|hunk| hunk.lines.get(l))
            .is_some_and(|line| line.kind != LineKind::Context)
    }
}
