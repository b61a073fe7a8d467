use super::file::FileChange;
use crate::deprioritize::Deprioritizer;
use crate::parse::{ParseError, parse_diff};

/// All changes of a session, in canonical display order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub files: Vec<FileChange>,
}

impl ChangeSet {
    /// Mark deprioritized files and sort by `(deprioritized, path)`
    pub fn new(mut files: Vec<FileChange>, deprioritizer: &Deprioritizer) -> Self {
        for file in &mut files {
            file.deprioritized = deprioritizer.matches(&file.path);
        }
        files.sort_by(|a, b| {
            (a.deprioritized, a.path.as_str()).cmp(&(b.deprioritized, b.path.as_str()))
        });

        tracing::debug!(
            files = files.len(),
            deprioritized = files.iter().filter(|f| f.deprioritized).count(),
            "ordered change set"
        );

        Self { files }
    }

    /// Parse git diff output into an ordered change set
    pub fn parse(text: &str, deprioritizer: &Deprioritizer) -> Result<Self, ParseError> {
        Ok(Self::new(parse_diff(text)?, deprioritizer))
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

impl std::fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for file in &self.files {
            write!(f, "{file}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    const TWO_FILES: &str = r#"diff --git a/flake.nix b/flake.nix
index abc1234..def5678 100644
--- a/flake.nix
+++ b/flake.nix
@@ -136,0 +137 @@
+      debug = true;
diff --git a/Cargo.lock b/Cargo.lock
index 111..222 100644
--- a/Cargo.lock
+++ b/Cargo.lock
@@ -11,0 +12 @@
+checksum = "00"
"#;

    #[test]
    fn parse_empty_diff() {
        let set = ChangeSet::parse("", &Deprioritizer::default()).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn sorts_by_path() {
        let set = ChangeSet::parse(TWO_FILES, &Deprioritizer::default()).unwrap();
        let paths: Vec<_> = set.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["Cargo.lock", "flake.nix"]);
    }

    #[test]
    fn deprioritized_files_sort_last() {
        let deprioritizer = Deprioritizer::new(&["*.lock".to_string()]).unwrap();
        let set = ChangeSet::parse(TWO_FILES, &deprioritizer).unwrap();
        let paths: Vec<_> = set
            .files
            .iter()
            .map(|f| (f.path.as_str(), f.deprioritized))
            .collect();
        assert_eq!(paths, vec![("flake.nix", false), ("Cargo.lock", true)]);
    }

    #[test]
    fn render_in_canonical_order() {
        let set = ChangeSet::parse(TWO_FILES, &Deprioritizer::default()).unwrap();
        insta::assert_snapshot!(set.to_string(), @r#"
        diff --git a/Cargo.lock b/Cargo.lock
        index 111..222 100644
        --- a/Cargo.lock
        +++ b/Cargo.lock
        @@ -11,0 +12 @@
        +checksum = "00"
        diff --git a/flake.nix b/flake.nix
        index abc1234..def5678 100644
        --- a/flake.nix
        +++ b/flake.nix
        @@ -136,0 +137 @@
        +      debug = true;
        "#);
    }
}
