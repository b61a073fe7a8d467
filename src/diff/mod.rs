pub mod file;
pub mod full;
pub mod hunk;

pub use file::{BinaryContent, ChangeKind, FileChange, FileMode};
pub use full::ChangeSet;
pub use hunk::{Hunk, Line, LineKind};
