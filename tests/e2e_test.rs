use diffpick::apply::{ApplyError, DiffSource, DirectoryTarget, GitBackend, PatchSink, Printer};
use diffpick::config::Config;
use diffpick::diff::ChangeSet;
use diffpick::patch::{self, Patch};
use diffpick::selection::{NodeId, Selection, SelectionTree};
use diffpick::{deprioritize::Deprioritizer, load_changes};
use git2::{Repository, Signature};
use similar_asserts::assert_eq;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// Test fixture for a git repository
struct Fixture {
    dir: TempDir,
    repo: Repository,
}

impl Fixture {
    /// Create a new empty repo with deterministic config
    fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let repo = Repository::init(dir.path()).expect("Failed to init repo");

        // Deterministic config
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test User").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
        config.set_bool("core.fileMode", true).unwrap();

        Self { dir, repo }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file to the repo
    fn write_file(&self, name: &str, content: impl AsRef<[u8]>) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[cfg(unix)]
    fn set_mode(&self, name: &str, mode: u32) {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(self.dir.path().join(name), fs::Permissions::from_mode(mode)).unwrap();
    }

    /// Stage a file
    fn stage_file(&self, name: &str) {
        let mut index = self.repo.index().unwrap();
        index.add_path(Path::new(name)).unwrap();
        index.write().unwrap();
    }

    /// Remove a file from the index
    fn unstage_file(&self, name: &str) {
        let mut index = self.repo.index().unwrap();
        index.remove_path(Path::new(name)).unwrap();
        index.write().unwrap();
    }

    /// Create a commit
    fn commit(&self, message: &str) {
        let sig = Signature::new(
            "Test User",
            "test@example.com",
            &git2::Time::new(1234567890, 0),
        )
        .unwrap();
        let tree_id = self.repo.index().unwrap().write_tree().unwrap();
        let tree = self.repo.find_tree(tree_id).unwrap();

        if self.repo.head().is_ok() {
            let parent = self.repo.head().unwrap().peel_to_commit().unwrap();
            self.repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
                .unwrap();
        } else {
            self.repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &[])
                .unwrap();
        }
    }

    /// Run git diff with the given extra arguments
    fn git_diff(&self, extra: &[&str]) -> String {
        let output = Command::new("git")
            .args(["-C", self.path().to_str().unwrap(), "diff"])
            .args(extra)
            .args([
                "--no-ext-diff", // Force standard diff, ignore external tools
                "--no-color",
                "--src-prefix=a/",
                "--dst-prefix=b/",
                "-M",
            ])
            .output()
            .expect("Failed to run git diff");
        assert!(output.status.success());
        String::from_utf8(output.stdout).unwrap()
    }

    /// Unstaged changes
    fn unstaged(&self) -> String {
        self.git_diff(&[])
    }

    /// Staged changes
    fn staged(&self) -> String {
        self.git_diff(&["--cached"])
    }

    fn backend(&self) -> GitBackend {
        GitBackend::new(self.path())
    }

    /// The pending changes as a selection tree
    fn tree(&self, deprioritizer: &Deprioritizer) -> SelectionTree {
        SelectionTree::new(load_changes(&self.backend(), deprioritizer).unwrap())
    }
}

fn file_index(tree: &SelectionTree, path: &str) -> usize {
    tree.changes()
        .files
        .iter()
        .position(|f| f.path == path)
        .unwrap()
}

fn numbered(range: std::ops::RangeInclusive<u32>) -> String {
    range.map(|i| format!("line {i}\n")).collect()
}

/// A repository with two committed files, both modified in the worktree
fn modified_pair() -> Fixture {
    let fixture = Fixture::new();
    fixture.write_file("a.txt", &numbered(1..=30));
    fixture.write_file("b/generated.log", "old entry\n");
    fixture.stage_file("a.txt");
    fixture.stage_file("b/generated.log");
    fixture.commit("initial");

    let edited = numbered(1..=30)
        .replace("line 2\n", "line two\n")
        .replace("line 25\n", "line 25\nline 25.5\n");
    fixture.write_file("a.txt", &edited);
    fixture.write_file("b/generated.log", "new entry\n");
    fixture
}

// =============================================================================
// Round trips through git
// =============================================================================

#[test]
fn select_all_reproduces_git_diff() {
    let fixture = modified_pair();
    let diff = fixture.backend().read_diff().unwrap();

    let mut tree = fixture.tree(&Deprioritizer::default());
    tree.select_all();
    assert_eq!(patch::build(&tree).to_string(), diff);
}

#[test]
fn select_all_stages_everything() {
    let fixture = modified_pair();
    let before = fixture.unstaged();

    let mut tree = fixture.tree(&Deprioritizer::default());
    tree.select_all();
    fixture.backend().apply(&patch::build(&tree)).unwrap();

    assert_eq!(fixture.staged(), before);
    assert_eq!(fixture.unstaged(), "");
}

#[test]
fn select_none_stages_nothing() {
    let fixture = modified_pair();
    let before = fixture.unstaged();

    let tree = fixture.tree(&Deprioritizer::default());
    let patch = patch::build(&tree);
    assert!(patch.is_empty());
    fixture.backend().apply(&patch).unwrap();

    assert_eq!(fixture.staged(), "");
    assert_eq!(fixture.unstaged(), before);
}

#[test]
fn single_line_is_staged_alone() {
    let fixture = modified_pair();
    let mut tree = fixture.tree(&Deprioritizer::default());
    let a = file_index(&tree, "a.txt");

    // The second hunk adds "line 25.5"; pick only that
    let hunk = &tree.changes().files[a].hunks[1];
    let line = hunk
        .lines
        .iter()
        .position(|l| l.text == "line 25.5")
        .unwrap();
    tree.set(NodeId::Line(a, 1, line), Selection::Full);
    fixture.backend().apply(&patch::build(&tree)).unwrap();

    let staged = fixture.staged();
    assert!(staged.contains("+line 25.5\n"));
    assert!(!staged.contains("line two"));
    assert!(!staged.contains("generated.log"));

    let unstaged = fixture.unstaged();
    assert!(unstaged.contains("-line 2\n+line two\n"));
    assert!(unstaged.contains("+new entry\n"));
    assert!(!unstaged.contains("line 25.5"));
}

#[test]
fn unselected_removal_stays_in_index() {
    let fixture = Fixture::new();
    fixture.write_file("a.txt", "keep\ndrop\nold\n");
    fixture.stage_file("a.txt");
    fixture.commit("initial");
    fixture.write_file("a.txt", "keep\nnew\n");

    let mut tree = fixture.tree(&Deprioritizer::default());
    let a = file_index(&tree, "a.txt");
    let lines = &tree.changes().files[a].hunks[0].lines;
    let added = lines.iter().position(|l| l.text == "new").unwrap();
    tree.set(NodeId::Line(a, 0, added), Selection::Full);
    fixture.backend().apply(&patch::build(&tree)).unwrap();

    let mut index = fixture.repo.index().unwrap();
    index.read(true).unwrap();
    let entry = index.get_path(Path::new("a.txt"), 0).unwrap();
    let blob = fixture.repo.find_blob(entry.id).unwrap();
    assert_eq!(std::str::from_utf8(blob.content()).unwrap(), "keep\ndrop\nold\nnew\n");
}

#[cfg(unix)]
#[test]
fn mode_facet_is_staged_without_content() {
    let fixture = Fixture::new();
    fixture.write_file("tool.sh", "echo one\n");
    fixture.set_mode("tool.sh", 0o644);
    fixture.stage_file("tool.sh");
    fixture.commit("initial");

    fixture.write_file("tool.sh", "echo two\n");
    fixture.set_mode("tool.sh", 0o755);

    let mut tree = fixture.tree(&Deprioritizer::default());
    let tool = file_index(&tree, "tool.sh");
    tree.set(NodeId::Mode(tool), Selection::Full);
    fixture.backend().apply(&patch::build(&tree)).unwrap();

    assert_eq!(
        fixture.staged(),
        "diff --git a/tool.sh b/tool.sh\nold mode 100644\nnew mode 100755\n"
    );
    let unstaged = fixture.unstaged();
    assert!(unstaged.contains("-echo one\n+echo two\n"));
    assert!(!unstaged.contains("old mode"));
}

#[cfg(unix)]
#[test]
fn binary_content_is_staged_without_mode() {
    let fixture = Fixture::new();
    fixture.write_file("img.bin", b"\x00\x01binary\x00data\n");
    fixture.set_mode("img.bin", 0o644);
    fixture.stage_file("img.bin");
    fixture.commit("initial");

    let updated: &[u8] = b"\x00\x02binary\x00other data\n";
    fixture.write_file("img.bin", updated);
    fixture.set_mode("img.bin", 0o755);

    let mut tree = fixture.tree(&Deprioritizer::default());
    let img = file_index(&tree, "img.bin");
    assert!(tree.changes().files[img].binary.is_some());
    tree.set(NodeId::Content(img), Selection::Full);
    fixture.backend().apply(&patch::build(&tree)).unwrap();

    let staged = fixture.staged();
    assert!(staged.contains("img.bin"));
    assert!(!staged.contains("old mode"));
    assert!(fixture.unstaged().contains("old mode 100644\nnew mode 100755\n"));

    let mut index = fixture.repo.index().unwrap();
    index.read(true).unwrap();
    let entry = index.get_path(Path::new("img.bin"), 0).unwrap();
    assert_eq!(entry.mode, 0o100644);
    assert_eq!(fixture.repo.find_blob(entry.id).unwrap().content(), updated);
}

#[test]
fn rejected_patch_reports_git_stderr() {
    let fixture = modified_pair();
    let stale = "diff --git a/a.txt b/a.txt\n--- a/a.txt\n+++ b/a.txt\n@@ -1,2 +1,2 @@\n-not in the file\n+something\n context\n";
    let mut tree = SelectionTree::new(ChangeSet::parse(stale, &Deprioritizer::default()).unwrap());
    tree.select_all();

    let err = fixture.backend().apply(&patch::build(&tree)).unwrap_err();
    assert!(
        matches!(&err, ApplyError::GitFailed { command, stderr }
            if command == "apply" && stderr.contains("a.txt")),
        "{err}"
    );
    assert_eq!(fixture.staged(), "");
}

#[test]
fn pathspecs_limit_the_diff() {
    let fixture = modified_pair();
    let backend = fixture.backend().with_pathspecs(vec!["b".to_string()]);
    let changes = load_changes(&backend, &Deprioritizer::default()).unwrap();

    assert_eq!(changes.len(), 1);
    assert_eq!(changes.files[0].path, "b/generated.log");
}

// =============================================================================
// Ordering policy
// =============================================================================

#[test]
fn deprioritized_file_is_last_and_elided() {
    let fixture = modified_pair();
    let config = Config::from_toml(
        "[diff]\ndeprioritize = [\"b/*.log\"]\n",
        Path::new("config.toml"),
    )
    .unwrap();

    let mut tree = fixture.tree(&config.deprioritizer().unwrap());
    let paths: Vec<_> = tree.changes().files.iter().map(|f| f.path.clone()).collect();
    assert_eq!(paths, vec!["a.txt", "b/generated.log"]);
    assert!(tree.changes().files[1].deprioritized);

    tree.select_all();
    let mut printer = Printer::new(Vec::new());
    printer.apply(&patch::build(&tree)).unwrap();
    let printed = String::from_utf8(printer.into_inner()).unwrap();
    assert!(printed.starts_with("diff --git a/a.txt b/a.txt\n"));
    assert!(printed.ends_with("b/generated.log | +1 -1 (content omitted)\n"));
}

// =============================================================================
// Directory targets
// =============================================================================

/// Stage a rename of `old/dir/f.txt` to `new/dir2/f.txt` with an edit
fn staged_rename() -> Fixture {
    let fixture = Fixture::new();
    fixture.write_file("old/dir/f.txt", &numbered(1..=10));
    fixture.stage_file("old/dir/f.txt");
    fixture.commit("initial");

    fixture.write_file("new/dir2/f.txt", &numbered(1..=10).replace("line 5\n", "line five\n"));
    fs::remove_file(fixture.path().join("old/dir/f.txt")).unwrap();
    fixture.unstage_file("old/dir/f.txt");
    fixture.stage_file("new/dir2/f.txt");
    fixture
}

/// A plain directory holding the committed tree
fn checkout(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, content) in files {
        let path = dir.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    dir
}

fn staged_tree(fixture: &Fixture) -> SelectionTree {
    let text = fixture.staged();
    SelectionTree::new(ChangeSet::parse(&text, &Deprioritizer::default()).unwrap())
}

#[test]
fn rename_into_new_directory_creates_parent() {
    let fixture = staged_rename();
    let mut tree = staged_tree(&fixture);
    assert!(tree.changes().files[0].has_rename());
    tree.select_all();

    let original = numbered(1..=10);
    let dir = checkout(&[("old/dir/f.txt", &original)]);
    DirectoryTarget::new(dir.path())
        .apply(&patch::build(&tree))
        .unwrap();

    let moved = fs::read_to_string(dir.path().join("new/dir2/f.txt")).unwrap();
    assert_eq!(moved, original.replace("line 5\n", "line five\n"));
    assert!(!dir.path().join("old").exists());
}

#[test]
fn unselected_rename_leaves_directory_untouched() {
    let fixture = staged_rename();
    let tree = staged_tree(&fixture);

    let original = numbered(1..=10);
    let dir = checkout(&[("old/dir/f.txt", &original)]);
    DirectoryTarget::new(dir.path())
        .apply(&patch::build(&tree))
        .unwrap();

    assert_eq!(fs::read_to_string(dir.path().join("old/dir/f.txt")).unwrap(), original);
    assert!(!dir.path().join("new").exists());
}

#[test]
fn rename_facet_alone_moves_unchanged_content() {
    let fixture = staged_rename();
    let mut tree = staged_tree(&fixture);
    tree.set(NodeId::Rename(0), Selection::Full);

    let original = numbered(1..=10);
    let dir = checkout(&[("old/dir/f.txt", &original)]);
    DirectoryTarget::new(dir.path())
        .apply(&patch::build(&tree))
        .unwrap();

    assert_eq!(fs::read_to_string(dir.path().join("new/dir2/f.txt")).unwrap(), original);
    assert!(!dir.path().join("old/dir/f.txt").exists());
}

#[cfg(unix)]
#[test]
fn added_executable_is_created_executable() {
    use std::os::unix::fs::PermissionsExt;

    let fixture = Fixture::new();
    fixture.write_file("README", "hello\n");
    fixture.stage_file("README");
    fixture.commit("initial");

    fixture.write_file("bin/run.sh", "#!/bin/sh\necho hi\n");
    fixture.set_mode("bin/run.sh", 0o755);
    fixture.stage_file("bin/run.sh");

    let mut tree = staged_tree(&fixture);
    assert!(fixture.staged().contains("new file mode 100755\n"));
    tree.select_all();

    let dir = checkout(&[("README", "hello\n")]);
    DirectoryTarget::new(dir.path())
        .apply(&patch::build(&tree))
        .unwrap();

    let path = dir.path().join("bin/run.sh");
    assert_eq!(fs::read_to_string(&path).unwrap(), "#!/bin/sh\necho hi\n");
    assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o755);
}

#[test]
fn empty_patch_touches_nothing() {
    let dir = checkout(&[("a.txt", "a\n")]);
    DirectoryTarget::new(dir.path()).apply(&Patch::default()).unwrap();
    assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "a\n");
}
