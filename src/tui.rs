//! Terminal front end: draws the session and feeds it key presses.

use crate::cursor::{Cursor, Section, sections};
use crate::diff::{FileChange, LineKind};
use crate::keys;
use crate::selection::{NodeId, Selection, SelectionTree};
use crate::session::{Flow, Session};
use crossterm::event::{self, Event};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use error_set::error_set;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::{Frame, Terminal};
use std::io::{self, Stderr};
use unicode_width::UnicodeWidthChar;

error_set! {
    TerminalError := {
        #[display("Terminal error: {message}")]
        Io { message: String },
    }
}

impl From<io::Error> for TerminalError {
    fn from(e: io::Error) -> Self {
        TerminalError::Io {
            message: e.to_string(),
        }
    }
}

/// Run an interactive session until the user confirms or aborts.
///
/// Draws on stderr so that stdout stays free for printed patches. A `notice`
/// replaces the key help in the status bar until the first key press.
pub fn run(
    session: &mut Session,
    tab_width: u8,
    notice: Option<String>,
) -> Result<Flow, TerminalError> {
    let mut screen = Screen::enter()?;
    let mut view = View::new(tab_width);
    view.notice = notice;

    loop {
        screen.terminal.draw(|frame| view.render(frame, session))?;

        let Event::Key(key) = event::read()? else {
            continue;
        };
        let Some(action) = keys::action_for(key) else {
            continue;
        };
        view.notice = None;
        match session.handle(action) {
            Flow::Continue => {}
            flow => {
                tracing::debug!(?flow, "session finished");
                return Ok(flow);
            }
        }
    }
}

/// Raw mode and the alternate screen, restored on drop
struct Screen {
    terminal: Terminal<CrosstermBackend<Stderr>>,
}

impl Screen {
    fn enter() -> Result<Self, TerminalError> {
        enable_raw_mode()?;
        let mut out = io::stderr();
        let entered = execute!(out, EnterAlternateScreen)
            .and_then(|()| Terminal::new(CrosstermBackend::new(out)));
        match entered {
            Ok(terminal) => Ok(Self { terminal }),
            Err(e) => {
                restore();
                Err(e.into())
            }
        }
    }
}

impl Drop for Screen {
    fn drop(&mut self) {
        if let Err(e) = self.terminal.show_cursor() {
            tracing::warn!(error = %e, "failed to show cursor");
        }
        restore();
    }
}

fn restore() {
    if let Err(e) = disable_raw_mode().and_then(|()| execute!(io::stderr(), LeaveAlternateScreen)) {
        tracing::warn!(error = %e, "failed to restore terminal");
    }
}

/// Rendering state that outlives a single frame
#[derive(Debug, Clone)]
pub struct View {
    tab_width: u8,
    scroll: usize,
    notice: Option<String>,
}

/// One screen line; `target` is set when the cursor can rest on it
struct Row {
    target: Option<Cursor>,
    line: Line<'static>,
}

impl View {
    pub fn new(tab_width: u8) -> Self {
        Self {
            tab_width,
            scroll: 0,
            notice: None,
        }
    }

    pub fn render(&mut self, frame: &mut Frame, session: &Session) {
        let [body, status] =
            Layout::vertical([Constraint::Min(0), Constraint::Length(1)]).areas(frame.area());

        let rows = self.rows(session);
        let cursor = session.navigator().cursor();
        let current = rows
            .iter()
            .position(|row| row.target == Some(cursor))
            .unwrap_or(0);
        self.scroll_to(current, usize::from(body.height));

        let lines: Vec<Line> = rows
            .into_iter()
            .enumerate()
            .skip(self.scroll)
            .take(usize::from(body.height))
            .map(|(i, row)| {
                if i == current {
                    row.line
                        .patch_style(Style::default().add_modifier(Modifier::REVERSED))
                } else {
                    row.line
                }
            })
            .collect();

        frame.render_widget(Paragraph::new(lines), body);
        frame.render_widget(status_bar(session, self.notice.as_deref()), status);
    }

    /// Keep `row` inside the visible window
    fn scroll_to(&mut self, row: usize, height: usize) {
        if height == 0 {
            return;
        }
        if row < self.scroll {
            self.scroll = row;
        } else if row >= self.scroll + height {
            self.scroll = row + 1 - height;
        }
    }

    fn rows(&self, session: &Session) -> Vec<Row> {
        let tree = session.tree();
        let navigator = session.navigator();
        let mut rows = Vec::new();

        for (file, change) in session.changes().files.iter().enumerate() {
            rows.push(Row {
                target: Some(Cursor::File { file }),
                line: file_line(change, tree.state(NodeId::File(file))),
            });
            if !navigator.is_open(file) {
                continue;
            }

            for section in sections(change) {
                let target = Cursor::Hunk { file, section };
                rows.push(Row {
                    target: Some(target),
                    line: section_line(change, section, tree.state(target.node())),
                });
                match section {
                    Section::Hunk(hunk) if !change.is_coarse() => {
                        self.push_lines(&mut rows, tree, change, file, hunk);
                    }
                    _ => {}
                }
            }
        }
        rows
    }

    fn push_lines(
        &self,
        rows: &mut Vec<Row>,
        tree: &SelectionTree,
        change: &FileChange,
        file: usize,
        hunk: usize,
    ) {
        let Some(h) = change.hunks.get(hunk) else {
            return;
        };
        for (line, l) in h.lines.iter().enumerate() {
            let text = format!("{}{}", l.marker(), expand_tabs(&l.text, self.tab_width));
            let row = match l.kind {
                LineKind::Context => Row {
                    target: None,
                    line: Line::from(vec![
                        Span::raw("        "),
                        Span::styled(text, Style::default().fg(Color::DarkGray)),
                    ]),
                },
                LineKind::Add | LineKind::Remove => {
                    let color = if l.kind == LineKind::Add {
                        Color::Green
                    } else {
                        Color::Red
                    };
                    Row {
                        target: Some(Cursor::Line { file, hunk, line }),
                        line: Line::from(vec![
                            Span::raw("    "),
                            marker(tree.state(NodeId::Line(file, hunk, line))),
                            Span::styled(text, Style::default().fg(color)),
                        ]),
                    }
                }
            };
            rows.push(row);
        }
    }
}

fn marker(state: Selection) -> Span<'static> {
    match state {
        Selection::Full => Span::styled("[x] ", Style::default().fg(Color::Green)),
        Selection::Partial => Span::styled("[~] ", Style::default().fg(Color::Yellow)),
        Selection::None => Span::raw("[ ] "),
    }
}

fn file_line(change: &FileChange, state: Selection) -> Line<'static> {
    let name = match &change.previous_path {
        Some(previous) if change.has_rename() => format!("{previous} -> {}", change.path),
        _ => change.path.clone(),
    };
    let style = if change.deprioritized {
        Style::default().add_modifier(Modifier::DIM)
    } else {
        Style::default().add_modifier(Modifier::BOLD)
    };
    let summary = format!(
        "  {} +{} -{}",
        change.kind.label(),
        change.added_count,
        change.removed_count
    );

    Line::from(vec![
        marker(state),
        Span::styled(name, style),
        Span::styled(summary, Style::default().fg(Color::DarkGray)),
    ])
}

fn section_line(change: &FileChange, section: Section, state: Selection) -> Line<'static> {
    let label = match section {
        Section::Rename => format!("rename {} -> {}", change.old_path(), change.path),
        Section::Mode => format!(
            "mode {} -> {}",
            change.old_mode.map_or_else(String::new, |m| m.to_string()),
            change.new_mode.map_or_else(String::new, |m| m.to_string())
        ),
        Section::Hunk(_) if change.binary.is_some() => "binary content".to_string(),
        Section::Hunk(_) if change.is_coarse() => format!(
            "whole file {} (+{} -{})",
            change.kind.label(),
            change.added_count,
            change.removed_count
        ),
        Section::Hunk(hunk) => change
            .hunks
            .get(hunk)
            .map(|h| h.header())
            .unwrap_or_default(),
    };

    Line::from(vec![
        Span::raw("  "),
        marker(state),
        Span::styled(label, Style::default().fg(Color::Cyan)),
    ])
}

fn status_bar(session: &Session, notice: Option<&str>) -> Paragraph<'static> {
    let tree = session.tree();
    let total = tree.file_count();
    let selected = (0..total)
        .filter(|&f| tree.state(NodeId::File(f)) != Selection::None)
        .count();

    Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" {selected}/{total} files "),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        match notice {
            Some(text) => Span::styled(
                text.to_string(),
                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            ),
            None => Span::raw(keys::HELP),
        },
    ]))
    .style(Style::default().bg(Color::DarkGray).fg(Color::White))
}

/// Expand tabs to the next tab stop and make control characters visible
fn expand_tabs(text: &str, tab_width: u8) -> String {
    let tab = usize::from(tab_width.max(1));
    let mut out = String::with_capacity(text.len());
    let mut column = 0;

    for c in text.chars() {
        if c == '\t' {
            let pad = tab - column % tab;
            out.extend(std::iter::repeat_n(' ', pad));
            column += pad;
        } else if let Some(symbol) = control_picture(c) {
            out.push(symbol);
            column += 1;
        } else {
            out.push(c);
            column += c.width().unwrap_or(0);
        }
    }
    out
}

/// The Unicode "control picture" for C0 controls, e.g. `␍` for `\r`
fn control_picture(c: char) -> Option<char> {
    let code = u32::from(c);
    if code < 0x20 {
        char::from_u32(0x2400 + code)
    } else if code == 0x7f {
        Some('\u{2421}')
    } else {
        None
    }
}
