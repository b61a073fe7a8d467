//! Turning a selection back into an applicable patch.

use crate::diff::{ChangeKind, FileChange};
use crate::selection::{NodeId, Selection, SelectionTree};
use std::io::{self, Write};

/// Exactly the selected subset of a change set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    pub files: Vec<FileChange>,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl std::fmt::Display for Patch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for file in &self.files {
            write!(f, "{file}")?;
        }
        Ok(())
    }
}

/// Build the patch for the current selection.
///
/// Fully selected files are emitted exactly as parsed. For partially selected
/// files the hunks are filtered line by line (see [`crate::diff::Hunk::retain`])
/// and the `index`/`similarity` headers are dropped, since they describe the
/// complete change. Selected binary content keeps the object range of its
/// `index` header, which `git apply` needs to locate the blobs.
pub fn build(tree: &SelectionTree) -> Patch {
    let files: Vec<FileChange> = tree
        .changes()
        .files
        .iter()
        .enumerate()
        .filter_map(|(f, change)| build_file(tree, f, change))
        .collect();

    tracing::debug!(files = files.len(), "built patch");
    Patch { files }
}

fn build_file(tree: &SelectionTree, f: usize, change: &FileChange) -> Option<FileChange> {
    match tree.state(NodeId::File(f)) {
        Selection::None => return None,
        Selection::Full => return Some(change.clone()),
        Selection::Partial => {}
    }

    let mut out = change.clone();
    out.index = None;
    out.similarity = None;

    if change.has_rename() && tree.state(NodeId::Rename(f)) != Selection::Full {
        out.path = change.old_path().to_string();
        out.previous_path = None;
    }
    if change.has_mode_change() && tree.state(NodeId::Mode(f)) != Selection::Full {
        out.new_mode = change.old_mode;
    }

    if change.is_coarse() {
        if tree.state(NodeId::Content(f)) == Selection::Full {
            out.index = change.index.as_deref().map(object_range);
        } else {
            out.hunks.clear();
            out.binary = None;
        }
    } else {
        let mut delta = 0i64;
        out.hunks = change
            .hunks
            .iter()
            .enumerate()
            .filter(|(h, _)| tree.state(NodeId::Hunk(f, *h)) != Selection::None)
            .filter_map(|(h, hunk)| {
                let kept = hunk.retain(
                    |l| tree.state(NodeId::Line(f, h, l)) == Selection::Full,
                    delta,
                )?;
                delta += kept.delta();
                Some(kept)
            })
            .collect();
    }

    // Add and Delete have no facets, so they are never partial
    out.kind = if out.previous_path.is_some() {
        ChangeKind::Rename
    } else if out.has_mode_change() {
        ChangeKind::ModeChange
    } else {
        ChangeKind::Modify
    };
    out.recount();

    Some(out)
}

/// `abc..def 100644` without the trailing mode
fn object_range(index: &str) -> String {
    index.split(' ').next().unwrap_or(index).to_string()
}

/// Write the patch for display, replacing the content of deprioritized files
/// with a one-line summary.
pub fn print<W: Write>(patch: &Patch, out: &mut W) -> io::Result<()> {
    for file in &patch.files {
        if file.deprioritized {
            writeln!(
                out,
                "{} | +{} -{} (content omitted)",
                file.path, file.added_count, file.removed_count
            )?;
        } else {
            write!(out, "{file}")?;
        }
    }
    Ok(())
}
