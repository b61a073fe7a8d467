//! Parsing of git's extended unified diff format into [`FileChange`]s.
//!
//! The parser understands what `git diff -M --binary` emits: the `diff --git`
//! line, extended headers (modes, renames, similarity, `index`), the
//! `---`/`+++` names, `@@` hunks with their `\ No newline at end of file`
//! markers, and both forms of binary content.
//!
//! Malformed input is rejected as a whole; there is no partial recovery.
//!
//! # Examples
//!
//! ```
//! use diffpick::parse::parse_diff;
//! use diffpick::diff::ChangeKind;
//!
//! let text = "diff --git a/old.txt b/dir/new.txt\n\
//!             similarity index 100%\n\
//!             rename from old.txt\n\
//!             rename to dir/new.txt\n";
//! let files = parse_diff(text).unwrap();
//! assert_eq!(files[0].kind, ChangeKind::Rename);
//! assert_eq!(files[0].path, "dir/new.txt");
//! assert_eq!(files[0].previous_path.as_deref(), Some("old.txt"));
//! ```

use crate::diff::{BinaryContent, ChangeKind, FileChange, FileMode, Hunk, Line};
use error_set::error_set;
use nom::{
    IResult, Parser,
    bytes::complete::tag,
    character::complete::{char, u32 as decimal},
    combinator::opt,
    sequence::preceded,
};

error_set! {
    /// Errors from parsing diff text
    ParseError := {
        /// A line that belongs to no known construct
        #[display("line {line}: unexpected content '{content}'")]
        UnexpectedLine { line: usize, content: String },
        /// `diff --git` line whose paths cannot be recovered
        #[display("line {line}: invalid file header '{content}'")]
        InvalidFileHeader { line: usize, content: String },
        /// `@@` line that does not follow `@@ -a,b +c,d @@`
        #[display("line {line}: invalid hunk header '{content}'")]
        InvalidHunkHeader { line: usize, content: String },
        /// Hunk body does not contain the line counts announced by its header
        #[display("line {line}: hunk body does not match its header")]
        HunkLengthMismatch { line: usize },
        /// Hunk without any added or removed line
        #[display("line {line}: hunk has no changed lines")]
        EmptyHunk { line: usize },
        /// Mode that is not an octal number
        #[display("line {line}: invalid file mode '{value}'")]
        InvalidMode { line: usize, value: String },
        /// Added file with removed lines, or deleted file with added lines
        #[display("{path}: lines do not match a {kind} change")]
        InconsistentKind { path: String, kind: String },
        /// Change git reports as a copy
        #[display("{path}: copies are not supported")]
        UnsupportedCopy { path: String },
    }
}

/// Line-oriented reader over the input that keeps `\r` intact
struct Reader<'a> {
    lines: Vec<&'a str>,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(text: &'a str) -> Self {
        let mut lines: Vec<&str> = text.split('\n').collect();
        if text.is_empty() || text.ends_with('\n') {
            lines.pop();
        }
        Self { lines, pos: 0 }
    }

    fn peek(&self) -> Option<&'a str> {
        self.lines.get(self.pos).copied()
    }

    fn next_line(&mut self) -> Option<&'a str> {
        let line = self.peek()?;
        self.pos += 1;
        Some(line)
    }

    /// 1-based number of the line most recently returned by `next_line`
    fn line_number(&self) -> usize {
        self.pos
    }
}

/// Parse git diff output into file changes, in input order.
///
/// Empty input yields no changes.
///
/// # Errors
///
/// Returns [`ParseError`] on any malformed or unsupported construct.
pub fn parse_diff(text: &str) -> Result<Vec<FileChange>, ParseError> {
    let mut reader = Reader::new(text);
    let mut files = Vec::new();

    while let Some(line) = reader.peek() {
        if line.is_empty() {
            reader.next_line();
        } else if line.starts_with("diff --git ") {
            files.push(parse_file(&mut reader)?);
        } else {
            return Err(ParseError::UnexpectedLine {
                line: reader.line_number() + 1,
                content: line.to_string(),
            });
        }
    }

    tracing::debug!(files = files.len(), "parsed diff");
    Ok(files)
}

/// Header fields collected before the hunks
#[derive(Default)]
struct Header {
    old_mode: Option<FileMode>,
    new_mode: Option<FileMode>,
    index_mode: Option<FileMode>,
    added: bool,
    deleted: bool,
    similarity: Option<u8>,
    rename_from: Option<String>,
    rename_to: Option<String>,
    index: Option<String>,
    minus: Option<Option<String>>,
    plus: Option<Option<String>>,
    binary: Option<BinaryContent>,
}

fn parse_file(reader: &mut Reader<'_>) -> Result<FileChange, ParseError> {
    let first = reader.next_line().unwrap_or_default();
    let header_line = reader.line_number();
    let (git_old, git_new) = first
        .strip_prefix("diff --git ")
        .and_then(split_git_paths)
        .ok_or_else(|| ParseError::InvalidFileHeader {
            line: header_line,
            content: first.to_string(),
        })?;

    let mut header = Header::default();
    while let Some(line) = reader.peek() {
        if line.is_empty() || line.starts_with("diff --git ") || line.starts_with("@@") {
            break;
        }
        reader.next_line();
        let number = reader.line_number();

        if let Some(rest) = line.strip_prefix("old mode ") {
            header.old_mode = Some(parse_mode(rest, number)?);
        } else if let Some(rest) = line.strip_prefix("new mode ") {
            header.new_mode = Some(parse_mode(rest, number)?);
        } else if let Some(rest) = line.strip_prefix("deleted file mode ") {
            header.deleted = true;
            header.old_mode = Some(parse_mode(rest, number)?);
        } else if let Some(rest) = line.strip_prefix("new file mode ") {
            header.added = true;
            header.new_mode = Some(parse_mode(rest, number)?);
        } else if let Some(rest) = line.strip_prefix("similarity index ") {
            header.similarity = rest.strip_suffix('%').and_then(|p| p.parse().ok());
        } else if line.starts_with("dissimilarity index ") {
            // Only meaningful for rewrites, which are emitted as plain hunks
        } else if let Some(rest) = line.strip_prefix("rename from ") {
            header.rename_from = Some(unquote(rest));
        } else if let Some(rest) = line.strip_prefix("rename to ") {
            header.rename_to = Some(unquote(rest));
        } else if line.starts_with("copy from ") || line.starts_with("copy to ") {
            return Err(ParseError::UnsupportedCopy { path: git_new });
        } else if let Some(rest) = line.strip_prefix("index ") {
            if let Some((_, mode)) = rest.split_once(' ') {
                header.index_mode = Some(parse_mode(mode, number)?);
            }
            header.index = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("--- ") {
            header.minus = Some(side_name(rest, "a/"));
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            header.plus = Some(side_name(rest, "b/"));
        } else if line == "GIT binary patch" {
            header.binary = Some(BinaryContent::Literal(binary_body(reader)));
        } else if line.starts_with("Binary files ") && line.ends_with(" differ") {
            header.binary = Some(BinaryContent::Opaque);
        } else {
            return Err(ParseError::UnexpectedLine {
                line: number,
                content: line.to_string(),
            });
        }
    }

    let mut hunks = Vec::new();
    while reader.peek().is_some_and(|line| line.starts_with("@@")) {
        hunks.push(parse_hunk(reader)?);
    }

    build_change(header, git_old, git_new, hunks)
}

fn build_change(
    header: Header,
    git_old: String,
    git_new: String,
    hunks: Vec<Hunk>,
) -> Result<FileChange, ParseError> {
    let old_name = header
        .rename_from
        .clone()
        .or_else(|| header.minus.clone().flatten())
        .unwrap_or(git_old);
    let new_name = header
        .rename_to
        .clone()
        .or_else(|| header.plus.clone().flatten())
        .unwrap_or(git_new);

    let (kind, path, previous_path, old_mode, new_mode) = if header.added {
        (ChangeKind::Add, new_name, None, None, header.new_mode)
    } else if header.deleted {
        (ChangeKind::Delete, old_name, None, header.old_mode, None)
    } else {
        let (old_mode, new_mode) = match (header.old_mode, header.new_mode) {
            (Some(old), Some(new)) => (Some(old), Some(new)),
            _ => (header.index_mode, header.index_mode),
        };
        if header.rename_from.is_some() && old_name != new_name {
            (ChangeKind::Rename, new_name, Some(old_name), old_mode, new_mode)
        } else if old_mode != new_mode {
            (ChangeKind::ModeChange, new_name, None, old_mode, new_mode)
        } else {
            (ChangeKind::Modify, new_name, None, old_mode, new_mode)
        }
    };

    let mut change = FileChange::new(path, kind, hunks).with_modes(old_mode, new_mode);
    change.previous_path = previous_path;
    change.similarity = header.similarity.filter(|_| change.previous_path.is_some());
    change.index = header.index;
    change.binary = header.binary;

    if !change.lines_match_kind() {
        return Err(ParseError::InconsistentKind {
            path: change.path,
            kind: kind.label().to_string(),
        });
    }

    Ok(change)
}

fn parse_mode(value: &str, line: usize) -> Result<FileMode, ParseError> {
    u32::from_str_radix(value.trim(), 8)
        .map(FileMode)
        .map_err(|_| ParseError::InvalidMode {
            line,
            value: value.to_string(),
        })
}

/// Body of a `GIT binary patch`, up to the next file
fn binary_body(reader: &mut Reader<'_>) -> Vec<String> {
    let mut body = Vec::new();
    while let Some(line) = reader.peek() {
        if line.starts_with("diff --git ") {
            break;
        }
        body.push(line.to_string());
        reader.next_line();
    }
    // Blank separators between files are not part of the patch
    while body.len() >= 2 && body[body.len() - 1].is_empty() && body[body.len() - 2].is_empty() {
        body.pop();
    }
    body
}

fn range(input: &str) -> IResult<&str, (u32, u32)> {
    (decimal, opt(preceded(char(','), decimal)))
        .map(|(start, len)| (start, len.unwrap_or(1)))
        .parse(input)
}

/// `@@ -old_start[,old_len] +new_start[,new_len] @@heading`
fn hunk_header(input: &str) -> IResult<&str, (u32, u32, u32, u32)> {
    (tag("@@ -"), range, tag(" +"), range, tag(" @@"))
        .map(|(_, (old_start, old_len), _, (new_start, new_len), _)| {
            (old_start, old_len, new_start, new_len)
        })
        .parse(input)
}

fn parse_hunk(reader: &mut Reader<'_>) -> Result<Hunk, ParseError> {
    let header = reader.next_line().unwrap_or_default();
    let header_line = reader.line_number();
    let (heading, (old_start, old_len, new_start, new_len)) =
        hunk_header(header).map_err(|_| ParseError::InvalidHunkHeader {
            line: header_line,
            content: header.to_string(),
        })?;

    let mismatch = || ParseError::HunkLengthMismatch { line: header_line };
    let mut old_remaining = old_len;
    let mut new_remaining = new_len;
    let mut lines: Vec<Line> = Vec::new();

    while old_remaining > 0 || new_remaining > 0 {
        let line = reader.next_line().ok_or_else(mismatch)?;
        let (marker, text) = match line.chars().next() {
            // Some tools strip the single space of an empty context line
            None => (' ', ""),
            Some(marker) => (marker, &line[marker.len_utf8()..]),
        };

        match marker {
            ' ' => {
                old_remaining = old_remaining.checked_sub(1).ok_or_else(mismatch)?;
                new_remaining = new_remaining.checked_sub(1).ok_or_else(mismatch)?;
                lines.push(Line::context(text));
            }
            '-' => {
                old_remaining = old_remaining.checked_sub(1).ok_or_else(mismatch)?;
                lines.push(Line::remove(text));
            }
            '+' => {
                new_remaining = new_remaining.checked_sub(1).ok_or_else(mismatch)?;
                lines.push(Line::add(text));
            }
            '\\' => lines.last_mut().ok_or_else(mismatch)?.no_newline = true,
            _ => return Err(mismatch()),
        }
    }

    if reader.peek().is_some_and(|line| line.starts_with('\\')) {
        reader.next_line();
        if let Some(last) = lines.last_mut() {
            last.no_newline = true;
        }
    }

    if !lines.iter().any(Line::is_change) {
        return Err(ParseError::EmptyHunk { line: header_line });
    }

    Ok(Hunk {
        old_start,
        old_len,
        new_start,
        new_len,
        heading: heading.to_string(),
        lines,
    })
}

/// Name from a `---`/`+++` line; `None` for `/dev/null`
fn side_name(rest: &str, prefix: &str) -> Option<String> {
    let rest = rest.strip_suffix('\t').unwrap_or(rest);
    if rest == "/dev/null" {
        return None;
    }
    let name = unquote(rest);
    Some(name.strip_prefix(prefix).map(str::to_string).unwrap_or(name))
}

/// Recover `(old, new)` from the `a/X b/Y` part of `diff --git`
fn split_git_paths(rest: &str) -> Option<(String, String)> {
    let strip = |name: String, prefix: &str| {
        name.strip_prefix(prefix).map(str::to_string).unwrap_or(name)
    };

    if rest.starts_with('"') {
        let (old, remainder) = quoted_token(rest)?;
        let new = unquote(remainder.strip_prefix(' ')?);
        return Some((strip(old, "a/"), strip(new, "b/")));
    }

    if let Some((old, new)) = rest.split_once(" \"") {
        let new = unquote(&format!("\"{new}"));
        return Some((strip(old.to_string(), "a/"), strip(new, "b/")));
    }

    // Unquoted names may contain spaces; both sides are equal unless the file
    // was renamed, and renames carry their own headers.
    let mid = rest.len().checked_sub(1)? / 2;
    if rest.len() % 2 == 1 && rest.is_char_boundary(mid) && rest.as_bytes()[mid] == b' ' {
        let (old, new) = (&rest[..mid], &rest[mid + 1..]);
        if old.strip_prefix("a/").is_some_and(|o| Some(o) == new.strip_prefix("b/")) {
            return Some((old[2..].to_string(), new[2..].to_string()));
        }
    }

    let (old, new) = rest.split_once(" b/")?;
    Some((strip(old.to_string(), "a/"), new.to_string()))
}

/// Undo git's C-style quoting; unquoted input is returned as is
fn unquote(name: &str) -> String {
    match quoted_token(name) {
        Some((unquoted, "")) => unquoted,
        _ => name.to_string(),
    }
}

/// Parse a leading `"..."` token, returning it and the remaining input
fn quoted_token(input: &str) -> Option<(String, &str)> {
    let body = input.strip_prefix('"')?;
    let mut bytes: Vec<u8> = Vec::with_capacity(body.len());
    let mut chars = body.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                return Some((text, &body[i + 1..]));
            }
            '\\' => {
                let (_, escaped) = chars.next()?;
                let byte = match escaped {
                    'a' => 0x07,
                    'b' => 0x08,
                    't' => b'\t',
                    'n' => b'\n',
                    'v' => 0x0b,
                    'f' => 0x0c,
                    'r' => b'\r',
                    '"' => b'"',
                    '\\' => b'\\',
                    '0'..='7' => {
                        let mut value = escaped.to_digit(8)?;
                        for _ in 0..2 {
                            let (_, digit) = chars.next()?;
                            value = value * 8 + digit.to_digit(8)?;
                        }
                        u8::try_from(value).ok()?
                    }
                    _ => return None,
                };
                bytes.push(byte);
            }
            c => {
                let mut buf = [0; 4];
                bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }

    None
}
