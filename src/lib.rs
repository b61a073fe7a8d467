//! Interactive selection of pending changes, down to single lines.
//!
//! A diff is parsed into a [`diff::ChangeSet`], explored through a
//! [`session::Session`] and turned back into a [`patch::Patch`] containing
//! exactly what was selected, which a [`apply::PatchSink`] then materializes.

use error_set::error_set;

pub mod apply;
pub mod config;
pub mod cursor;
pub mod deprioritize;
pub mod diff;
pub mod keys;
pub mod parse;
pub mod patch;
pub mod selection;
pub mod session;
pub mod tui;

use apply::{ApplyError, DiffSource};
use config::ConfigError;
use deprioritize::Deprioritizer;
use diff::ChangeSet;
use parse::ParseError;
use tui::TerminalError;

error_set! {
    /// Top-level error for diffpick operations
    DiffpickError := {
        #[display("Failed to set up logging: {message}")]
        LoggingFailed { message: String },
        ParseError(ParseError),
        ConfigError(ConfigError),
        ApplyError(ApplyError),
        TerminalError(TerminalError),
    }
}

/// Read the pending changes from `source` and put them in display order
pub fn load_changes(
    source: &dyn DiffSource,
    deprioritizer: &Deprioritizer,
) -> Result<ChangeSet, DiffpickError> {
    let text = source.read_diff()?;
    let changes = ChangeSet::parse(&text, deprioritizer)?;
    tracing::debug!(files = changes.len(), "loaded changes");
    Ok(changes)
}
