//! Key bindings.

use crate::session::Action;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// Map a key press to an action; unbound keys and key releases map to nothing
pub fn action_for(key: KeyEvent) -> Option<Action> {
    if key.kind == KeyEventKind::Release {
        return None;
    }

    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('a') => Some(Action::SelectAll),
            KeyCode::Char('c') => Some(Action::Quit),
            _ => None,
        };
    }

    let action = match key.code {
        KeyCode::Char('j') | KeyCode::Down | KeyCode::Tab => Action::Next,
        KeyCode::Char('k') | KeyCode::Up | KeyCode::BackTab => Action::Previous,
        KeyCode::Char('l') | KeyCode::Right => Action::Open,
        KeyCode::Char('h') | KeyCode::Left => Action::Close,
        KeyCode::Char(' ') => Action::Toggle,
        KeyCode::Char('a') => Action::SelectAll,
        KeyCode::Char('n') => Action::SelectNone,
        KeyCode::Char('g') | KeyCode::Home => Action::First,
        KeyCode::Char('G') | KeyCode::End => Action::Last,
        KeyCode::Char('u') => Action::Undo,
        KeyCode::Char('U') => Action::Redo,
        KeyCode::Enter => Action::Confirm,
        KeyCode::Char('q') | KeyCode::Esc => Action::Quit,
        _ => return None,
    };
    Some(action)
}

/// One-line summary of the bindings for the status bar
pub const HELP: &str =
    "j/k move  l/h open/close  space toggle  a/n all/none  u/U undo/redo  enter confirm  q quit";
