//! Cursor over the flattened change tree.
//!
//! Files are always visible. An open file expands into its sections (rename
//! and mode facets, then its hunks), and each text hunk into its changed
//! lines. The cursor sits on one row of one level and moves between rows of
//! that same level.

use crate::diff::{ChangeSet, FileChange};
use crate::selection::NodeId;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Level {
    File,
    Hunk,
    Line,
}

impl Level {
    /// The next coarser level, if any
    pub fn coarser(self) -> Option<Level> {
        match self {
            Level::File => None,
            Level::Hunk => Some(Level::File),
            Level::Line => Some(Level::Hunk),
        }
    }
}

/// A row of an open file at Hunk level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Rename,
    Mode,
    /// A text hunk, or the whole content of an added, deleted or binary file
    Hunk(usize),
}

/// Rows of a file at Hunk level, in display order
pub fn sections(change: &FileChange) -> Vec<Section> {
    let mut sections = Vec::new();
    if change.has_rename() {
        sections.push(Section::Rename);
    }
    if change.has_mode_change() {
        sections.push(Section::Mode);
    }
    if change.is_coarse() {
        sections.push(Section::Hunk(0));
    } else {
        sections.extend((0..change.hunks.len()).map(Section::Hunk));
    }
    sections
}

/// Position of the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cursor {
    File { file: usize },
    Hunk { file: usize, section: Section },
    Line { file: usize, hunk: usize, line: usize },
}

impl Cursor {
    pub fn level(self) -> Level {
        match self {
            Cursor::File { .. } => Level::File,
            Cursor::Hunk { .. } => Level::Hunk,
            Cursor::Line { .. } => Level::Line,
        }
    }

    pub fn file(self) -> usize {
        match self {
            Cursor::File { file } | Cursor::Hunk { file, .. } | Cursor::Line { file, .. } => file,
        }
    }

    /// Selection node the cursor points at
    pub fn node(self) -> NodeId {
        match self {
            Cursor::File { file } => NodeId::File(file),
            Cursor::Hunk {
                file,
                section: Section::Rename,
            } => NodeId::Rename(file),
            Cursor::Hunk {
                file,
                section: Section::Mode,
            } => NodeId::Mode(file),
            Cursor::Hunk {
                file,
                section: Section::Hunk(hunk),
            } => NodeId::Hunk(file, hunk),
            Cursor::Line { file, hunk, line } => NodeId::Line(file, hunk, line),
        }
    }
}

/// Cursor plus the set of expanded files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigator {
    open: BTreeSet<usize>,
    cursor: Cursor,
}

impl Default for Navigator {
    fn default() -> Self {
        Self {
            open: BTreeSet::new(),
            cursor: Cursor::File { file: 0 },
        }
    }
}

impl Navigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn level(&self) -> Level {
        self.cursor.level()
    }

    pub fn is_open(&self, file: usize) -> bool {
        self.open.contains(&file)
    }

    pub fn open_files(&self) -> &BTreeSet<usize> {
        &self.open
    }

    /// Replace the whole state, as when undoing
    pub fn restore(&mut self, open: BTreeSet<usize>, cursor: Cursor, changes: &ChangeSet) {
        self.open = open;
        self.cursor = cursor;
        self.relocate(changes);
    }

    /// Every row at `level`, in display order
    pub fn rows(&self, changes: &ChangeSet, level: Level) -> Vec<Cursor> {
        let open_files = || {
            self.open
                .iter()
                .copied()
                .filter_map(|file| changes.files.get(file).map(|change| (file, change)))
        };

        match level {
            Level::File => (0..changes.files.len())
                .map(|file| Cursor::File { file })
                .collect(),
            Level::Hunk => open_files()
                .flat_map(|(file, change)| {
                    sections(change)
                        .into_iter()
                        .map(move |section| Cursor::Hunk { file, section })
                })
                .collect(),
            Level::Line => open_files()
                .filter(|(_, change)| !change.is_coarse())
                .flat_map(|(file, change)| {
                    change.hunks.iter().enumerate().flat_map(move |(hunk, h)| {
                        h.lines
                            .iter()
                            .enumerate()
                            .filter(|(_, line)| line.is_change())
                            .map(move |(line, _)| Cursor::Line { file, hunk, line })
                    })
                })
                .collect(),
        }
    }

    pub fn next(&mut self, changes: &ChangeSet) {
        self.step(changes, 1);
    }

    pub fn previous(&mut self, changes: &ChangeSet) {
        self.step(changes, -1);
    }

    /// Move one row at the current level, without wrapping
    fn step(&mut self, changes: &ChangeSet, direction: isize) {
        let rows = self.rows(changes, self.level());
        let Some(position) = rows.iter().position(|row| *row == self.cursor) else {
            self.relocate(changes);
            return;
        };
        if let Some(row) = position
            .checked_add_signed(direction)
            .and_then(|target| rows.get(target))
        {
            self.cursor = *row;
        }
    }

    /// First row at the current level. At Hunk level a file's rename and mode
    /// rows come before its hunks, so this can land on a facet.
    pub fn first(&mut self, changes: &ChangeSet) {
        self.jump(changes, |rows| rows.first().copied());
    }

    /// Last row at the current level, which can be a facet row when the last
    /// open file has no content change.
    pub fn last(&mut self, changes: &ChangeSet) {
        self.jump(changes, |rows| rows.last().copied());
    }

    /// Pick a row at the current level, falling back to coarser levels
    fn jump(&mut self, changes: &ChangeSet, pick: impl Fn(&[Cursor]) -> Option<Cursor>) {
        let mut level = Some(self.level());
        while let Some(current) = level {
            if let Some(row) = pick(&self.rows(changes, current)) {
                self.cursor = row;
                return;
            }
            level = current.coarser();
        }
    }

    /// Descend one level
    pub fn open(&mut self, changes: &ChangeSet) {
        match self.cursor {
            Cursor::File { file } => {
                let Some(change) = changes.files.get(file) else {
                    return;
                };
                self.open.insert(file);
                if let Some(section) = sections(change).first() {
                    self.cursor = Cursor::Hunk {
                        file,
                        section: *section,
                    };
                }
            }
            Cursor::Hunk {
                file,
                section: Section::Hunk(hunk),
            } => {
                let first_line = changes
                    .files
                    .get(file)
                    .filter(|change| !change.is_coarse())
                    .and_then(|change| change.hunks.get(hunk))
                    .and_then(|h| h.lines.iter().position(|line| line.is_change()));
                if let Some(line) = first_line {
                    self.cursor = Cursor::Line { file, hunk, line };
                }
            }
            Cursor::Hunk { .. } | Cursor::Line { .. } => {}
        }
    }

    /// Ascend one level
    pub fn close(&mut self) {
        match self.cursor {
            Cursor::Line { file, hunk, .. } => {
                self.cursor = Cursor::Hunk {
                    file,
                    section: Section::Hunk(hunk),
                };
            }
            Cursor::Hunk { file, .. } => {
                self.open.remove(&file);
                self.cursor = Cursor::File { file };
            }
            Cursor::File { file } => {
                self.open.remove(&file);
            }
        }
    }

    /// Move to the file row if the current row no longer exists
    pub fn relocate(&mut self, changes: &ChangeSet) {
        if self.rows(changes, self.level()).contains(&self.cursor) {
            return;
        }
        let last = changes.files.len().saturating_sub(1);
        self.cursor = Cursor::File {
            file: self.cursor.file().min(last),
        };
    }
}
