use super::hunk::{Hunk, LineKind};
use std::fmt;

/// What happened to a file.
///
/// Rename and ModeChange may carry content hunks as well; a rename that also
/// changes the mode is a Rename with differing `old_mode`/`new_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Delete,
    Modify,
    Rename,
    ModeChange,
}

impl ChangeKind {
    pub fn label(self) -> &'static str {
        match self {
            ChangeKind::Add => "add",
            ChangeKind::Delete => "delete",
            ChangeKind::Modify => "modify",
            ChangeKind::Rename => "rename",
            ChangeKind::ModeChange => "change mode",
        }
    }
}

/// Git-style file mode, e.g. `0o100644`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileMode(pub u32);

impl FileMode {
    pub const REGULAR: FileMode = FileMode(0o100644);
    pub const EXECUTABLE: FileMode = FileMode(0o100755);
    pub const SYMLINK: FileMode = FileMode(0o120000);

    pub fn is_executable(self) -> bool {
        self.0 & 0o111 != 0
    }

    pub fn is_symlink(self) -> bool {
        self.0 & 0o170000 == 0o120000
    }

    /// Permission bits only, suitable for `chmod`
    pub fn permissions(self) -> u32 {
        self.0 & 0o777
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06o}", self.0)
    }
}

/// Content of a file git could not express as text hunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryContent {
    /// `Binary files a/x and b/x differ`: no data, cannot be applied
    Opaque,
    /// Body of a `GIT binary patch` block, kept verbatim
    Literal(Vec<String>),
}

/// One file's change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Current path (the destination for renames)
    pub path: String,
    /// Source path of a rename
    pub previous_path: Option<String>,
    pub kind: ChangeKind,
    pub old_mode: Option<FileMode>,
    pub new_mode: Option<FileMode>,
    /// `similarity index` of a rename, in percent
    pub similarity: Option<u8>,
    /// Raw value of the `index` header
    pub index: Option<String>,
    pub hunks: Vec<Hunk>,
    pub binary: Option<BinaryContent>,
    pub added_count: usize,
    pub removed_count: usize,
    pub deprioritized: bool,
}

impl FileChange {
    /// Create a change with counts derived from `hunks`.
    pub fn new(path: impl Into<String>, kind: ChangeKind, hunks: Vec<Hunk>) -> Self {
        let mut change = Self {
            path: path.into(),
            previous_path: None,
            kind,
            old_mode: None,
            new_mode: None,
            similarity: None,
            index: None,
            hunks,
            binary: None,
            added_count: 0,
            removed_count: 0,
            deprioritized: false,
        };
        change.recount();
        change
    }

    #[must_use]
    pub fn renamed_from(mut self, previous: impl Into<String>) -> Self {
        self.previous_path = Some(previous.into());
        self
    }

    #[must_use]
    pub fn with_modes(mut self, old: Option<FileMode>, new: Option<FileMode>) -> Self {
        self.old_mode = old;
        self.new_mode = new;
        self
    }

    /// Recompute `added_count`/`removed_count` from the hunks
    pub fn recount(&mut self) {
        self.added_count = self.hunks.iter().map(Hunk::added_count).sum();
        self.removed_count = self.hunks.iter().map(Hunk::removed_count).sum();
    }

    /// Path on the old side of the diff
    pub fn old_path(&self) -> &str {
        self.previous_path.as_deref().unwrap_or(&self.path)
    }

    /// A rename that can be selected on its own
    pub fn has_rename(&self) -> bool {
        self.previous_path.is_some()
    }

    /// A mode change on a file that exists on both sides
    pub fn has_mode_change(&self) -> bool {
        !matches!(self.kind, ChangeKind::Add | ChangeKind::Delete)
            && matches!((self.old_mode, self.new_mode), (Some(old), Some(new)) if old != new)
    }

    /// Whether the content can only be selected as a whole
    pub fn is_coarse(&self) -> bool {
        matches!(self.kind, ChangeKind::Add | ChangeKind::Delete) || self.binary.is_some()
    }

    /// Whether there is any content change at all
    pub fn has_content(&self) -> bool {
        !self.hunks.is_empty() || self.binary.is_some()
    }

    /// Whether every line of every hunk agrees with the change kind
    pub fn lines_match_kind(&self) -> bool {
        let forbidden = match self.kind {
            ChangeKind::Add => Some(LineKind::Remove),
            ChangeKind::Delete => Some(LineKind::Add),
            _ => None,
        };
        let Some(forbidden) = forbidden else {
            return true;
        };
        self.hunks
            .iter()
            .flat_map(|h| &h.lines)
            .all(|l| l.kind != forbidden && l.kind != LineKind::Context)
    }
}

/// Quote a path the way git does when it contains special characters
pub fn quote_path(prefix: &str, path: &str) -> String {
    let needs_quoting = path
        .chars()
        .any(|c| c == '"' || c == '\\' || (c as u32) < 0x20 || c == '\x7f');
    if !needs_quoting {
        return format!("{prefix}{path}");
    }

    let mut quoted = String::with_capacity(path.len() + prefix.len() + 2);
    quoted.push('"');
    quoted.push_str(prefix);
    for c in path.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\t' => quoted.push_str("\\t"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\x07' => quoted.push_str("\\a"),
            '\x08' => quoted.push_str("\\b"),
            '\x0b' => quoted.push_str("\\v"),
            '\x0c' => quoted.push_str("\\f"),
            c if (c as u32) < 0x20 || c == '\x7f' => {
                quoted.push_str(&format!("\\{:03o}", c as u32));
            }
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Name as it appears on a `---`/`+++` line
fn side_name(prefix: &str, path: Option<&str>) -> String {
    match path {
        Some(path) => {
            let name = quote_path(prefix, path);
            // git disambiguates names containing spaces with a trailing tab
            if name.contains(' ') {
                format!("{name}\t")
            } else {
                name
            }
        }
        None => "/dev/null".to_string(),
    }
}

impl fmt::Display for FileChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let old_path = self.old_path();
        writeln!(
            f,
            "diff --git {} {}",
            quote_path("a/", old_path),
            quote_path("b/", &self.path)
        )?;

        match (self.kind, self.old_mode, self.new_mode) {
            (ChangeKind::Add, _, Some(mode)) => writeln!(f, "new file mode {mode}")?,
            (ChangeKind::Delete, Some(mode), _) => writeln!(f, "deleted file mode {mode}")?,
            (_, Some(old), Some(new)) if self.has_mode_change() => {
                writeln!(f, "old mode {old}")?;
                writeln!(f, "new mode {new}")?;
            }
            _ => {}
        }

        if let Some(previous) = &self.previous_path {
            if let Some(similarity) = self.similarity {
                writeln!(f, "similarity index {similarity}%")?;
            }
            writeln!(f, "rename from {}", quote_path("", previous))?;
            writeln!(f, "rename to {}", quote_path("", &self.path))?;
        }

        if let Some(index) = &self.index {
            writeln!(f, "index {index}")?;
        }

        let old_side = (self.kind != ChangeKind::Add).then_some(old_path);
        let new_side = (self.kind != ChangeKind::Delete).then_some(self.path.as_str());

        match &self.binary {
            Some(BinaryContent::Opaque) => {
                let old = old_side.map_or("/dev/null".to_string(), |p| quote_path("a/", p));
                let new = new_side.map_or("/dev/null".to_string(), |p| quote_path("b/", p));
                writeln!(f, "Binary files {old} and {new} differ")?;
            }
            Some(BinaryContent::Literal(lines)) => {
                writeln!(f, "GIT binary patch")?;
                for line in lines {
                    writeln!(f, "{line}")?;
                }
            }
            None if !self.hunks.is_empty() => {
                writeln!(f, "--- {}", side_name("a/", old_side))?;
                writeln!(f, "+++ {}", side_name("b/", new_side))?;
                for hunk in &self.hunks {
                    write!(f, "{hunk}")?;
                }
            }
            None => {}
        }

        Ok(())
    }
}
