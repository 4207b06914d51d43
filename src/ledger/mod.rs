//! Append-only history of allocation attempts.

mod sqlite;

pub use sqlite::SqliteLedger;

use crate::types::{AllocationAttempt, ChatId};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("history store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("history row {id} is unreadable: {reason}")]
    Corrupt { id: i64, reason: String },
}

pub trait Ledger: Send + Sync {
    /// Record an attempt. Store failures are logged and swallowed so a
    /// history fault never aborts an allocation in progress.
    fn append(&self, attempt: &AllocationAttempt);

    /// Most recent first. With `chat` set, only attempts recorded for that
    /// conversation are returned.
    fn recent(
        &self,
        limit: usize,
        chat: Option<ChatId>,
    ) -> Result<Vec<AllocationAttempt>, LedgerError>;
}
