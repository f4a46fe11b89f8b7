//! Source reader trait abstraction
//!
//! Every supported host application has a reader implementing
//! [`SourceReader`], giving the sync engine and the session service one
//! read-only view over very different on-disk formats.
//!
//! ## Design Principles
//!
//! 1. **Read-only**: readers never write to a source store
//! 2. **Cheap staleness checks**: [`SourceReader::session_timestamps`] must not
//!    load message lists, so a sync pass stays O(sessions)
//! 3. **Scoped failures**: a damaged session yields `DataCorruption` for that
//!    session only; store-wide failures use `StoreConnection`/`StoreLocked`

use crate::error::Result;
use crate::types::{SessionContent, Source};
use chrono::{DateTime, Utc};

/// One entry of a bulk timestamp map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStamp {
    pub native_id: String,
    /// Source-reported last modification
    pub modified_at: DateTime<Utc>,
}

/// Sort stamps newest-first and apply an optional cap.
pub fn newest_first(mut stamps: Vec<SessionStamp>, limit: Option<usize>) -> Vec<SessionStamp> {
    stamps.sort_by(|a, b| {
        b.modified_at
            .cmp(&a.modified_at)
            .then_with(|| a.native_id.cmp(&b.native_id))
    });
    if let Some(limit) = limit {
        stamps.truncate(limit);
    }
    stamps
}

/// Trait implemented by all source readers.
pub trait SourceReader: Send + Sync {
    /// Which source this reader handles
    fn source(&self) -> Source;

    /// Whether the backing store exists on disk
    fn is_available(&self) -> bool;

    /// Last-modified time of every known session, newest first.
    ///
    /// `limit` keeps only the N most recent.
    fn session_timestamps(&self, limit: Option<usize>) -> Result<Vec<SessionStamp>>;

    /// Load one session with its normalized messages.
    ///
    /// Returns `SessionNotFound` when the id is unknown. A session that exists
    /// but has no messages is returned with an empty message list.
    fn load_session(&self, native_id: &str) -> Result<SessionContent>;

    /// Whether the source knows this id, without loading messages.
    fn contains(&self, native_id: &str) -> Result<bool>;

    /// Number of sessions currently visible in the source.
    fn session_count(&self) -> Result<usize> {
        Ok(self.session_timestamps(None)?.len())
    }

    /// Release any open handle. Safe to call on a reader that never opened.
    fn close(&self) {}
}
