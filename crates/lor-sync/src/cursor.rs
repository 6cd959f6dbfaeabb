//! Sync cursor parsing.
//!
//! A sync chunk carries a two-part cursor `"<syncId>:<remainder>"`. The sync
//! id names the snapshot sequence; an empty remainder marks its final chunk.

/// Parsed form of a sync cursor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncCursor {
    pub sync_id: String,
    pub remainder: String,
}

impl SyncCursor {
    /// Parse a cursor string on its first `:`. A cursor without a separator
    /// is treated as a bare sync id with an empty remainder.
    pub fn parse(cursor: &str) -> Self {
        match cursor.split_once(':') {
            Some((sync_id, remainder)) => SyncCursor {
                sync_id: sync_id.to_string(),
                remainder: remainder.to_string(),
            },
            None => SyncCursor {
                sync_id: cursor.to_string(),
                remainder: String::new(),
            },
        }
    }

    /// Whether this cursor marks the final chunk of its sequence.
    pub fn ends_sequence(&self) -> bool {
        self.remainder.is_empty()
    }
}
