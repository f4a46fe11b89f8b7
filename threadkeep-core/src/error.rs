//! Error types for threadkeep-core

use thiserror::Error;

/// Main error type for the threadkeep-core library
#[derive(Error, Debug)]
pub enum Error {
    /// A backing store is missing or cannot be opened
    #[error("store unavailable: {0}")]
    StoreConnection(String),

    /// A backing store stayed busy after bounded retries
    #[error("store locked: {0}")]
    StoreLocked(String),

    /// Identifier or nickname resolves to nothing
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Stored JSON for one session could not be parsed
    #[error("corrupt data for session {id}: {message}")]
    DataCorruption { id: String, message: String },

    /// Nickname is already assigned to another session
    #[error("nickname '{nickname}' is already used by {owner}")]
    NicknameConflict { nickname: String, owner: String },

    /// Identifier matches more than one session or source
    #[error("identifier '{identifier}' is ambiguous: {}", candidates.join(", "))]
    AmbiguousIdentifier {
        identifier: String,
        candidates: Vec<String>,
    },

    /// Caller supplied an unusable argument
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Failures scoped to a single session.
    ///
    /// Bulk sync skips these and keeps going; everything else aborts the pass.
    pub fn is_per_session(&self) -> bool {
        matches!(
            self,
            Error::SessionNotFound(_) | Error::DataCorruption { .. }
        )
    }
}

/// Result type alias for threadkeep-core
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_session_classification() {
        assert!(Error::SessionNotFound("x".into()).is_per_session());
        assert!(Error::DataCorruption {
            id: "cursor:x".into(),
            message: "bad".into()
        }
        .is_per_session());
        assert!(!Error::StoreLocked("busy".into()).is_per_session());
        assert!(!Error::StoreConnection("gone".into()).is_per_session());
    }

    #[test]
    fn test_ambiguous_message_lists_candidates() {
        let err = Error::AmbiguousIdentifier {
            identifier: "abc".into(),
            candidates: vec!["cursor:abc1".into(), "cursor:abc2".into()],
        };
        assert_eq!(
            err.to_string(),
            "identifier 'abc' is ambiguous: cursor:abc1, cursor:abc2"
        );
    }
}
