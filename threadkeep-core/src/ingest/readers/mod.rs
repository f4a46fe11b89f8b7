//! Source-specific readers
//!
//! Each supported host application has a reader module implementing
//! [`SourceReader`](super::SourceReader).
//!
//! | Source | Module | Store |
//! |--------|--------|-------|
//! | Cursor | [`cursor`] | SQLite key/value (`state.vscdb`) |
//! | Claude Code | [`claude`] | JSONL per session |

mod claude;
mod cursor;

pub use claude::{ClaudeReader, ClaudeSessionSummary};
pub use cursor::CursorReader;

use super::SourceReader;
use crate::config::SourcesConfig;
use crate::types::Source;

/// Create a reader for every supported source, in [`Source::ALL`] order.
pub fn create_all_readers(config: &SourcesConfig) -> Vec<Box<dyn SourceReader>> {
    Source::ALL
        .iter()
        .map(|&source| reader_for(source, config))
        .collect()
}

/// Create the reader for one source.
pub fn reader_for(source: Source, config: &SourcesConfig) -> Box<dyn SourceReader> {
    match source {
        Source::Cursor => Box::new(CursorReader::new(config.cursor_db_path())),
        Source::Claude => Box::new(ClaudeReader::new(config.claude_projects_path())),
    }
}
