//! Where diffs come from and where patches go.
//!
//! A [`DiffSource`] produces git diff text; a [`PatchSink`] materializes a
//! [`Patch`]. The git backend is both. A directory target applies patches to
//! a plain directory tree, planning every file before touching the disk and
//! rolling back what it wrote if a later step fails.

use crate::diff::{ChangeKind, FileChange, FileMode, Hunk, LineKind};
use crate::patch::{self, Patch};
use error_set::error_set;
use std::collections::HashSet;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};

error_set! {
    /// Errors from reading diffs and applying patches
    ApplyError := {
        #[display("Failed to run git {command}: {message}")]
        SpawnFailed { command: String, message: String },
        #[display("Failed to get stdin handle for git apply")]
        StdinFailed,
        #[display("Failed to write patch to git apply: {message}")]
        WriteFailed { message: String },
        #[display("Failed to wait for git apply: {message}")]
        WaitFailed { message: String },
        /// Non-zero exit, with git's stderr verbatim
        #[display("git {command} failed: {stderr}")]
        GitFailed { command: String, stderr: String },
        #[display("Invalid UTF-8 in diff: {message}")]
        InvalidUtf8 { message: String },
        #[display("Failed to read diff from {origin}: {message}")]
        ReadFailed { origin: String, message: String },
        /// The tree on disk does not allow the change
        #[display("{path}: {message}")]
        Conflict { path: String, message: String },
        /// Removed or context lines do not match the file
        #[display("{path}: content does not match the patch at line {line}")]
        PreimageMismatch { path: String, line: usize },
        #[display("{path}: binary content cannot be applied to a directory")]
        UnsupportedBinary { path: String },
        #[display("{path}: {message}")]
        Io { path: String, message: String },
    }
}

/// Producer of git diff text
pub trait DiffSource {
    fn read_diff(&self) -> Result<String, ApplyError>;
}

/// Consumer of a built patch.
///
/// Applying an empty patch succeeds without doing anything.
pub trait PatchSink {
    fn apply(&mut self, patch: &Patch) -> Result<(), ApplyError>;
}

// =============================================================================
// git
// =============================================================================

/// A git repository: diffs the worktree, applies to the index
#[derive(Debug, Clone)]
pub struct GitBackend {
    repo: PathBuf,
    pathspecs: Vec<String>,
}

impl GitBackend {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            pathspecs: Vec::new(),
        }
    }

    /// Limit the diff to the given pathspecs
    #[must_use]
    pub fn with_pathspecs(mut self, pathspecs: Vec<String>) -> Self {
        self.pathspecs = pathspecs;
        self
    }

    fn git(&self) -> Command {
        let mut command = Command::new("git");
        command
            .arg("-c")
            .arg("core.quotePath=false")
            .arg("-C")
            .arg(&self.repo);
        command
    }
}

impl DiffSource for GitBackend {
    fn read_diff(&self) -> Result<String, ApplyError> {
        let mut command = self.git();
        command.args([
            "diff",
            "--no-ext-diff",
            "--no-color",
            "--binary",
            "-M",
            "--src-prefix=a/",
            "--dst-prefix=b/",
        ]);
        if !self.pathspecs.is_empty() {
            command.arg("--").args(&self.pathspecs);
        }

        let output = command.output().map_err(|e| ApplyError::SpawnFailed {
            command: "diff".to_string(),
            message: e.to_string(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ApplyError::GitFailed {
                command: "diff".to_string(),
                stderr: stderr.into_owned(),
            });
        }

        tracing::debug!(bytes = output.stdout.len(), repo = %self.repo.display(), "read git diff");
        String::from_utf8(output.stdout).map_err(|e| ApplyError::InvalidUtf8 {
            message: e.to_string(),
        })
    }
}

impl PatchSink for GitBackend {
    /// Stage the patch with `git apply --cached`, which applies all or nothing
    fn apply(&mut self, patch: &Patch) -> Result<(), ApplyError> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut child = self
            .git()
            .args(["apply", "--cached", "--unidiff-zero", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ApplyError::SpawnFailed {
                command: "apply".to_string(),
                message: e.to_string(),
            })?;

        child
            .stdin
            .take()
            .ok_or(ApplyError::StdinFailed)?
            .write_all(patch.to_string().as_bytes())
            .map_err(|e| ApplyError::WriteFailed {
                message: e.to_string(),
            })?;

        let output = child
            .wait_with_output()
            .map_err(|e| ApplyError::WaitFailed {
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ApplyError::GitFailed {
                command: "apply".to_string(),
                stderr: stderr.into_owned(),
            });
        }

        tracing::debug!(files = patch.files.len(), "applied patch to index");
        Ok(())
    }
}

// =============================================================================
// Diff file / stdin
// =============================================================================

/// Diff text stored in a file, or read from stdin when the path is `-`
#[derive(Debug, Clone)]
pub struct DiffFile {
    path: PathBuf,
}

impl DiffFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn is_stdin(&self) -> bool {
        self.path == Path::new("-")
    }
}

impl DiffSource for DiffFile {
    fn read_diff(&self) -> Result<String, ApplyError> {
        let read_failed = |e: io::Error| ApplyError::ReadFailed {
            origin: if self.is_stdin() {
                "stdin".to_string()
            } else {
                self.path.display().to_string()
            },
            message: e.to_string(),
        };

        let bytes = if self.is_stdin() {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf).map_err(read_failed)?;
            buf
        } else {
            fs::read(&self.path).map_err(read_failed)?
        };

        String::from_utf8(bytes).map_err(|e| ApplyError::InvalidUtf8 {
            message: e.to_string(),
        })
    }
}

// =============================================================================
// Printer
// =============================================================================

/// Writes the patch as text, eliding deprioritized files
#[derive(Debug)]
pub struct Printer<W: Write> {
    out: W,
}

impl<W: Write> Printer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> PatchSink for Printer<W> {
    fn apply(&mut self, patch: &Patch) -> Result<(), ApplyError> {
        if patch.is_empty() {
            return Ok(());
        }
        patch::print(patch, &mut self.out)
            .and_then(|()| self.out.flush())
            .map_err(|e| ApplyError::Io {
                path: "output".to_string(),
                message: e.to_string(),
            })
    }
}

// =============================================================================
// Directory
// =============================================================================

/// A plain directory tree that patches are applied to in place
#[derive(Debug, Clone)]
pub struct DirectoryTarget {
    root: PathBuf,
}

/// A file as found on disk before the patch
#[derive(Debug, Clone)]
struct Existing {
    /// File bytes, or the link target of a symlink
    content: Vec<u8>,
    permissions: u32,
    symlink: bool,
}

#[derive(Debug)]
struct Removal {
    display: String,
    path: PathBuf,
    existing: Existing,
}

#[derive(Debug)]
struct Placement {
    display: String,
    path: PathBuf,
    content: Vec<u8>,
    permissions: u32,
    symlink: bool,
    /// What is overwritten, for modifications in place
    replaces: Option<Existing>,
}

#[derive(Debug, Default)]
struct Plan {
    removals: Vec<Removal>,
    placements: Vec<Placement>,
}

/// Paths read from and written to so far. A path is read at most once and
/// written at most once; a delete and an add of the same path is a type change.
#[derive(Debug, Default)]
struct Claims {
    sources: HashSet<PathBuf>,
    targets: HashSet<PathBuf>,
}

impl Claims {
    fn source(&mut self, path: &Path, display: &str) -> Result<(), ApplyError> {
        claim(&mut self.sources, path, display)
    }

    fn target(&mut self, path: &Path, display: &str) -> Result<(), ApplyError> {
        claim(&mut self.targets, path, display)
    }
}

fn claim(claimed: &mut HashSet<PathBuf>, path: &Path, display: &str) -> Result<(), ApplyError> {
    if claimed.insert(path.to_path_buf()) {
        Ok(())
    } else {
        Err(conflict(display, "path is changed more than once"))
    }
}

/// Inverse of one completed step
#[derive(Debug)]
enum Undo {
    Restore { path: PathBuf, existing: Existing },
    Remove(PathBuf),
    RemoveDir(PathBuf),
    CreateDir(PathBuf),
}

fn io_error(path: &str) -> impl Fn(io::Error) -> ApplyError + '_ {
    move |e| ApplyError::Io {
        path: path.to_string(),
        message: e.to_string(),
    }
}

fn conflict(path: &str, message: impl Into<String>) -> ApplyError {
    ApplyError::Conflict {
        path: path.to_string(),
        message: message.into(),
    }
}

impl DirectoryTarget {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Join a repository-relative path onto the root, refusing escapes
    fn resolve(&self, relative: &str) -> Result<PathBuf, ApplyError> {
        let path = Path::new(relative);
        let normal = !relative.is_empty()
            && path
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if normal {
            Ok(self.root.join(path))
        } else {
            Err(conflict(relative, "path is outside the target directory"))
        }
    }

    fn plan(&self, patch: &Patch) -> Result<Plan, ApplyError> {
        // Paths emptied by the patch may be replaced by new content
        let mut vacated = HashSet::new();
        for change in &patch.files {
            if change.kind == ChangeKind::Delete || change.previous_path.is_some() {
                vacated.insert(self.resolve(change.old_path())?);
            }
        }

        let mut claims = Claims::default();
        let mut plan = Plan::default();
        for change in &patch.files {
            self.plan_file(change, &vacated, &mut claims, &mut plan)?;
        }
        Ok(plan)
    }

    fn plan_file(
        &self,
        change: &FileChange,
        vacated: &HashSet<PathBuf>,
        claims: &mut Claims,
        plan: &mut Plan,
    ) -> Result<(), ApplyError> {
        if change.binary.is_some() {
            return Err(ApplyError::UnsupportedBinary {
                path: change.path.clone(),
            });
        }

        match change.kind {
            ChangeKind::Add => {
                let target = self.resolve(&change.path)?;
                claims.target(&target, &change.path)?;
                self.check_target(&target, &change.path, vacated)?;
                let mode = change.new_mode.unwrap_or(FileMode::REGULAR);
                plan.placements.push(Placement {
                    display: change.path.clone(),
                    path: target,
                    content: apply_hunks(&change.path, b"", &change.hunks)?,
                    permissions: mode.permissions(),
                    symlink: mode.is_symlink(),
                    replaces: None,
                });
            }
            ChangeKind::Delete => {
                let source = self.resolve(&change.path)?;
                claims.source(&source, &change.path)?;
                let existing = read_existing(&source, &change.path)?;
                let rest = apply_hunks(&change.path, &existing.content, &change.hunks)?;
                if !rest.is_empty() {
                    return Err(conflict(
                        &change.path,
                        "file has content the patch does not delete",
                    ));
                }
                plan.removals.push(Removal {
                    display: change.path.clone(),
                    path: source,
                    existing,
                });
            }
            ChangeKind::Modify | ChangeKind::Rename | ChangeKind::ModeChange => {
                let old_path = change.old_path();
                let source = self.resolve(old_path)?;
                claims.source(&source, old_path)?;
                let existing = read_existing(&source, old_path)?;
                let content = apply_hunks(old_path, &existing.content, &change.hunks)?;

                let (permissions, symlink) = match change.new_mode {
                    Some(mode) if change.has_mode_change() => {
                        (mode.permissions(), mode.is_symlink())
                    }
                    _ => (existing.permissions, existing.symlink),
                };

                if change.previous_path.is_some() {
                    let target = self.resolve(&change.path)?;
                    claims.target(&target, &change.path)?;
                    self.check_target(&target, &change.path, vacated)?;
                    plan.removals.push(Removal {
                        display: old_path.to_string(),
                        path: source,
                        existing,
                    });
                    plan.placements.push(Placement {
                        display: change.path.clone(),
                        path: target,
                        content,
                        permissions,
                        symlink,
                        replaces: None,
                    });
                } else {
                    claims.target(&source, old_path)?;
                    plan.placements.push(Placement {
                        display: change.path.clone(),
                        path: source,
                        content,
                        permissions,
                        symlink,
                        replaces: Some(existing),
                    });
                }
            }
        }

        Ok(())
    }

    /// A new file may only be created where nothing is in the way
    fn check_target(
        &self,
        target: &Path,
        display: &str,
        vacated: &HashSet<PathBuf>,
    ) -> Result<(), ApplyError> {
        if fs::symlink_metadata(target).is_ok() && !vacated.contains(target) {
            return Err(conflict(display, "already exists"));
        }

        let mut ancestor = target.parent();
        while let Some(dir) = ancestor {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            let blocked = fs::symlink_metadata(dir)
                .map(|metadata| !metadata.is_dir())
                .unwrap_or(false);
            if blocked && !vacated.contains(dir) {
                let relative = dir.strip_prefix(&self.root).unwrap_or(dir);
                return Err(conflict(
                    display,
                    format!("{} is not a directory", relative.display()),
                ));
            }
            ancestor = dir.parent();
        }
        Ok(())
    }

    fn execute(&self, plan: Plan) -> Result<(), ApplyError> {
        let mut journal = Vec::new();
        let result = self.run(plan, &mut journal);
        if let Err(err) = &result {
            tracing::warn!(error = %err, steps = journal.len(), "apply failed, rolling back");
            rollback(journal);
        }
        result
    }

    fn run(&self, plan: Plan, journal: &mut Vec<Undo>) -> Result<(), ApplyError> {
        let mut removed = Vec::new();
        for removal in plan.removals {
            fs::remove_file(&removal.path).map_err(io_error(&removal.display))?;
            tracing::debug!(path = %removal.display, "removed");
            removed.push(removal.path.clone());
            journal.push(Undo::Restore {
                path: removal.path,
                existing: removal.existing,
            });
        }

        for placement in plan.placements {
            self.create_parents(&placement.path, journal)
                .map_err(io_error(&placement.display))?;
            write_entry(
                &placement.path,
                &placement.content,
                placement.permissions,
                placement.symlink,
            )
            .map_err(io_error(&placement.display))?;
            tracing::debug!(
                path = %placement.display,
                mode = %format_args!("{:o}", placement.permissions),
                "wrote"
            );
            journal.push(match placement.replaces {
                Some(existing) => Undo::Restore {
                    path: placement.path,
                    existing,
                },
                None => Undo::Remove(placement.path),
            });
        }

        for path in removed {
            self.prune_empty_parents(&path, journal);
        }
        Ok(())
    }

    fn create_parents(&self, path: &Path, journal: &mut Vec<Undo>) -> io::Result<()> {
        let mut missing = Vec::new();
        let mut ancestor = path.parent();
        while let Some(dir) = ancestor {
            if dir == self.root || fs::symlink_metadata(dir).is_ok() {
                break;
            }
            missing.push(dir.to_path_buf());
            ancestor = dir.parent();
        }

        for dir in missing.into_iter().rev() {
            fs::create_dir(&dir)?;
            journal.push(Undo::RemoveDir(dir));
        }
        Ok(())
    }

    /// Remove directories left empty by a removal, up to the root
    fn prune_empty_parents(&self, path: &Path, journal: &mut Vec<Undo>) {
        let mut ancestor = path.parent();
        while let Some(dir) = ancestor {
            if dir == self.root || !dir.starts_with(&self.root) || fs::remove_dir(dir).is_err() {
                break;
            }
            journal.push(Undo::CreateDir(dir.to_path_buf()));
            ancestor = dir.parent();
        }
    }
}

impl PatchSink for DirectoryTarget {
    fn apply(&mut self, patch: &Patch) -> Result<(), ApplyError> {
        if patch.is_empty() {
            return Ok(());
        }
        let plan = self.plan(patch)?;
        tracing::debug!(
            removals = plan.removals.len(),
            placements = plan.placements.len(),
            root = %self.root.display(),
            "applying to directory"
        );
        self.execute(plan)
    }
}

fn rollback(journal: Vec<Undo>) {
    for undo in journal.into_iter().rev() {
        let result = match &undo {
            Undo::Restore { path, existing } => write_entry(
                path,
                &existing.content,
                existing.permissions,
                existing.symlink,
            ),
            Undo::Remove(path) => fs::remove_file(path),
            Undo::RemoveDir(path) => fs::remove_dir(path),
            Undo::CreateDir(path) => fs::create_dir(path),
        };
        if let Err(e) = result {
            tracing::warn!(step = ?undo, error = %e, "rollback step failed");
        }
    }
}

fn read_existing(path: &Path, display: &str) -> Result<Existing, ApplyError> {
    let metadata = fs::symlink_metadata(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            conflict(display, "does not exist")
        } else {
            io_error(display)(e)
        }
    })?;

    if metadata.file_type().is_symlink() {
        let target = fs::read_link(path).map_err(io_error(display))?;
        return Ok(Existing {
            content: target.to_string_lossy().into_owned().into_bytes(),
            permissions: 0o777,
            symlink: true,
        });
    }
    if !metadata.is_file() {
        return Err(conflict(display, "is not a regular file"));
    }

    Ok(Existing {
        content: fs::read(path).map_err(io_error(display))?,
        permissions: permissions_of(&metadata),
        symlink: false,
    })
}

#[cfg(unix)]
fn permissions_of(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permissions_of(_metadata: &fs::Metadata) -> u32 {
    FileMode::REGULAR.permissions()
}

#[cfg(unix)]
fn set_permissions(path: &Path, permissions: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(permissions))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _permissions: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &[u8], path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path).is_ok() {
        fs::remove_file(path)?;
    }
    std::os::unix::fs::symlink(String::from_utf8_lossy(target).as_ref(), path)
}

#[cfg(not(unix))]
fn create_symlink(_target: &[u8], _path: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symbolic links are not supported on this platform",
    ))
}

/// Atomically replace `path` with the given content
fn write_entry(path: &Path, content: &[u8], permissions: u32, symlink: bool) -> io::Result<()> {
    if symlink {
        return create_symlink(content, path);
    }
    let parent = path.parent().unwrap_or(Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(parent)?;
    file.write_all(content)?;
    file.as_file().sync_all()?;
    set_permissions(file.path(), permissions)?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Apply hunks at their exact positions, verifying every old line.
fn apply_hunks(display: &str, original: &[u8], hunks: &[Hunk]) -> Result<Vec<u8>, ApplyError> {
    if hunks.is_empty() {
        return Ok(original.to_vec());
    }

    let text = std::str::from_utf8(original).map_err(|_| ApplyError::Io {
        path: display.to_string(),
        message: "not valid UTF-8 text".to_string(),
    })?;
    let old: Vec<(&str, bool)> = text
        .split_inclusive('\n')
        .map(|line| match line.strip_suffix('\n') {
            Some(body) => (body, true),
            None => (line, false),
        })
        .collect();

    let mismatch = |line: usize| ApplyError::PreimageMismatch {
        path: display.to_string(),
        line,
    };
    let mut out = String::with_capacity(text.len());
    let mut push = |body: &str, newline: bool| {
        out.push_str(body);
        if newline {
            out.push('\n');
        }
    };

    let mut next = 0;
    for hunk in hunks {
        // An empty old side points at the line before the insertion
        let start = if hunk.old_len == 0 {
            hunk.old_start as usize
        } else {
            (hunk.old_start as usize).saturating_sub(1)
        };
        if start < next || start > old.len() {
            return Err(mismatch(hunk.old_start as usize));
        }
        for (body, newline) in &old[next..start] {
            push(body, *newline);
        }

        let mut pos = start;
        for line in &hunk.lines {
            match line.kind {
                LineKind::Context | LineKind::Remove => {
                    let Some((body, newline)) = old.get(pos) else {
                        return Err(mismatch(pos + 1));
                    };
                    if *body != line.text || *newline == line.no_newline {
                        return Err(mismatch(pos + 1));
                    }
                    if line.kind == LineKind::Context {
                        push(body, *newline);
                    }
                    pos += 1;
                }
                LineKind::Add => push(&line.text, !line.no_newline),
            }
        }
        next = pos;
    }

    for (body, newline) in &old[next..] {
        push(body, *newline);
    }
    Ok(out.into_bytes())
}
