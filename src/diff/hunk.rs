use std::fmt;

/// Which side(s) of the diff a hunk line belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineKind {
    /// Present on both sides, never selectable
    Context,
    /// Present only in the new version
    Add,
    /// Present only in the old version
    Remove,
}

/// One line of a hunk body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub kind: LineKind,
    /// Raw content without the leading marker; tabs are kept verbatim
    pub text: String,
    /// Followed by `\ No newline at end of file`
    pub no_newline: bool,
}

impl Line {
    pub fn context(text: impl Into<String>) -> Self {
        Self::new(LineKind::Context, text)
    }

    pub fn add(text: impl Into<String>) -> Self {
        Self::new(LineKind::Add, text)
    }

    pub fn remove(text: impl Into<String>) -> Self {
        Self::new(LineKind::Remove, text)
    }

    fn new(kind: LineKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            no_newline: false,
        }
    }

    /// Mark the line as the last one of its side, lacking a final newline
    #[must_use]
    pub fn without_newline(mut self) -> Self {
        self.no_newline = true;
        self
    }

    /// Whether the line carries its own selection state
    pub fn is_change(&self) -> bool {
        self.kind != LineKind::Context
    }

    pub fn marker(&self) -> char {
        match self.kind {
            LineKind::Context => ' ',
            LineKind::Add => '+',
            LineKind::Remove => '-',
        }
    }
}

/// A contiguous region of change within a file, with surrounding context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: u32,
    pub old_len: u32,
    pub new_start: u32,
    pub new_len: u32,
    /// Everything after the closing `@@`, usually ` fn name()` or empty
    pub heading: String,
    pub lines: Vec<Line>,
}

impl Hunk {
    /// Build a hunk whose lengths are derived from its lines.
    ///
    /// `delta` is the net line count change of the hunks emitted before this
    /// one in the same file; the new start position is derived from it.
    pub fn from_lines(old_start: u32, delta: i64, heading: String, lines: Vec<Line>) -> Self {
        let old_len = lines.iter().filter(|l| l.kind != LineKind::Add).count() as u32;
        let new_len = lines.iter().filter(|l| l.kind != LineKind::Remove).count() as u32;

        // An empty side points at the line *before* the change, so the
        // start of the other side is shifted by one.
        let base = i64::from(old_start) + delta;
        let new_start = if old_len == 0 {
            base + 1
        } else if new_len == 0 {
            base - 1
        } else {
            base
        };

        Self {
            old_start,
            old_len,
            new_start: new_start.max(0) as u32,
            new_len,
            heading,
            lines,
        }
    }

    pub fn added_count(&self) -> usize {
        self.lines.iter().filter(|l| l.kind == LineKind::Add).count()
    }

    pub fn removed_count(&self) -> usize {
        self.lines.iter().filter(|l| l.kind == LineKind::Remove).count()
    }

    /// The `@@ -a,b +c,d @@` line, with the heading
    pub fn header(&self) -> String {
        format!(
            "@@ -{} +{} @@{}",
            range(self.old_start, self.old_len),
            range(self.new_start, self.new_len),
            self.heading
        )
    }

    /// Net number of lines this hunk adds to the file
    pub fn delta(&self) -> i64 {
        i64::from(self.new_len) - i64::from(self.old_len)
    }

    /// Filter the change lines of the hunk, returning a new valid hunk.
    ///
    /// `keep` receives the index of each Add/Remove line. Context is always
    /// kept. A removal that is not kept turns into context, since the old
    /// line stays in place; an addition that is not kept disappears. The
    /// hunk keeps its whole context window, it is never split.
    ///
    /// Returns `None` if no change survives.
    pub fn retain<F>(&self, mut keep: F, delta: i64) -> Option<Self>
    where
        F: FnMut(usize) -> bool,
    {
        let mut lines: Vec<Line> = Vec::with_capacity(self.lines.len());
        // Position of an old last line (no final newline) demoted to context
        let mut demoted_last: Option<usize> = None;

        for (i, line) in self.lines.iter().enumerate() {
            match line.kind {
                LineKind::Context => lines.push(line.clone()),
                LineKind::Remove if keep(i) => lines.push(line.clone()),
                LineKind::Remove => {
                    if line.no_newline {
                        demoted_last = Some(lines.len());
                    }
                    lines.push(Line {
                        kind: LineKind::Context,
                        ..line.clone()
                    });
                }
                LineKind::Add if keep(i) => {
                    // Appending after an old last line that lacks a newline:
                    // the line has to be rewritten to gain one.
                    if let Some(pos) = demoted_last.take() {
                        lines[pos].kind = LineKind::Remove;
                        let bridge = Line::add(lines[pos].text.clone());
                        lines.push(bridge);
                    }
                    lines.push(line.clone());
                }
                LineKind::Add => {}
            }
        }

        if !lines.iter().any(Line::is_change) {
            return None;
        }

        Some(Self::from_lines(
            self.old_start,
            delta,
            self.heading.clone(),
            lines,
        ))
    }
}

fn range(start: u32, len: u32) -> String {
    if len == 1 {
        start.to_string()
    } else {
        format!("{start},{len}")
    }
}

impl fmt::Display for Hunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.header())?;

        for line in &self.lines {
            writeln!(f, "{}{}", line.marker(), line.text)?;
            if line.no_newline {
                writeln!(f, "\\ No newline at end of file")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    fn mixed_hunk() -> Hunk {
        Hunk {
            old_start: 10,
            old_len: 4,
            new_start: 10,
            new_len: 5,
            heading: " fn theme()".to_string(),
            lines: vec![
                Line::context("line 9"),
                Line::remove("    gtk.theme.name = \"Adwaita\";"),
                Line::remove("    gtk.iconTheme.name = \"Papirus\";"),
                Line::add("    # Theme managed by Stylix"),
                Line::add("    gtk.iconTheme.name = \"Papirus-Dark\";"),
                Line::add("    gtk.cursorTheme.size = 24;"),
                Line::context("line 12"),
            ],
        }
    }

    #[test]
    fn render_with_heading() {
        assert_eq!(
            mixed_hunk().to_string(),
            "@@ -10,4 +10,5 @@ fn theme()\n line 9\n-    gtk.theme.name = \"Adwaita\";\n-    gtk.iconTheme.name = \"Papirus\";\n+    # Theme managed by Stylix\n+    gtk.iconTheme.name = \"Papirus-Dark\";\n+    gtk.cursorTheme.size = 24;\n line 12\n"
        );
    }

    #[test]
    fn render_single_line_ranges() {
        let hunk = Hunk::from_lines(3, 0, String::new(), vec![Line::remove("a"), Line::add("b")]);
        assert_eq!(hunk.to_string(), "@@ -3 +3 @@\n-a\n+b\n");
    }

    #[test]
    fn render_missing_newline_marker() {
        let hunk = Hunk::from_lines(
            1,
            0,
            String::new(),
            vec![Line::remove("old").without_newline(), Line::add("new").without_newline()],
        );
        assert_eq!(
            hunk.to_string(),
            "@@ -1 +1 @@\n-old\n\\ No newline at end of file\n+new\n\\ No newline at end of file\n"
        );
    }

    #[test]
    fn from_lines_whole_file_addition() {
        let hunk = Hunk::from_lines(0, 0, String::new(), vec![Line::add("a"), Line::add("b")]);
        assert_eq!((hunk.old_start, hunk.old_len), (0, 0));
        assert_eq!((hunk.new_start, hunk.new_len), (1, 2));
    }

    #[test]
    fn from_lines_whole_file_deletion() {
        let lines = vec![Line::remove("a"), Line::remove("b")];
        let hunk = Hunk::from_lines(1, 0, String::new(), lines);
        assert_eq!(hunk.to_string(), "@@ -1,2 +0,0 @@\n-a\n-b\n");
    }

    #[test]
    fn retain_everything_is_identity() {
        let hunk = mixed_hunk();
        assert_eq!(hunk.retain(|_| true, 0).unwrap(), hunk);
    }

    #[test]
    fn retain_nothing_returns_none() {
        assert!(mixed_hunk().retain(|_| false, 0).is_none());
    }

    #[test]
    fn retain_single_addition_keeps_context_window() {
        let filtered = mixed_hunk().retain(|i| i == 5, 0).unwrap();
        assert_eq!(
            filtered.to_string(),
            "@@ -10,4 +10,5 @@ fn theme()\n line 9\n     gtk.theme.name = \"Adwaita\";\n     gtk.iconTheme.name = \"Papirus\";\n+    gtk.cursorTheme.size = 24;\n line 12\n"
        );
    }

    #[test]
    fn retain_single_deletion() {
        let filtered = mixed_hunk().retain(|i| i == 1, 0).unwrap();
        assert_eq!(filtered.old_len, 4);
        assert_eq!(filtered.new_len, 3);
        assert_eq!(
            filtered.to_string(),
            "@@ -10,4 +10,3 @@ fn theme()\n line 9\n-    gtk.theme.name = \"Adwaita\";\n     gtk.iconTheme.name = \"Papirus\";\n line 12\n"
        );
    }

    #[test]
    fn retain_shifts_new_start_by_delta() {
        let filtered = mixed_hunk().retain(|_| true, -3).unwrap();
        assert_eq!(filtered.old_start, 10);
        assert_eq!(filtered.new_start, 7);
    }

    #[test]
    fn retain_non_contiguous_changes_stay_one_hunk() {
        let hunk = Hunk::from_lines(
            5,
            0,
            String::new(),
            vec![
                Line::context("a"),
                Line::add("one"),
                Line::context("b"),
                Line::add("two"),
                Line::context("c"),
                Line::add("three"),
                Line::context("d"),
            ],
        );
        let filtered = hunk.retain(|i| i == 1 || i == 5, 0).unwrap();
        assert_eq!(
            filtered.to_string(),
            "@@ -5,4 +5,6 @@\n a\n+one\n b\n c\n+three\n d\n"
        );
    }

    #[test]
    fn retain_bridges_missing_newline_when_appending() {
        // File "last" without trailing newline gets a new final line.
        let hunk = Hunk::from_lines(
            3,
            0,
            String::new(),
            vec![
                Line::remove("last").without_newline(),
                Line::add("last"),
                Line::add("appended").without_newline(),
            ],
        );

        // Only the appended line is selected.
        let filtered = hunk.retain(|i| i == 2, 0).unwrap();
        assert_eq!(
            filtered.to_string(),
            "@@ -3 +3,2 @@\n-last\n\\ No newline at end of file\n+last\n+appended\n\\ No newline at end of file\n"
        );
    }

    #[test]
    fn retain_without_selection_leaves_old_last_line() {
        let hunk = Hunk::from_lines(
            3,
            0,
            String::new(),
            vec![
                Line::remove("last").without_newline(),
                Line::add("last"),
                Line::add("appended").without_newline(),
            ],
        );

        // Nothing after the old last line is selected: it stays untouched.
        assert!(hunk.retain(|_| false, 0).is_none());
    }

    #[test]
    fn counts() {
        let hunk = mixed_hunk();
        assert_eq!(hunk.added_count(), 3);
        assert_eq!(hunk.removed_count(), 2);
        assert_eq!(hunk.delta(), 1);
    }
}
