use std::{
    path::Path,
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

use super::{Ledger, LedgerError};
use crate::types::{AllocationAttempt, ChatId, Origin, Outcome};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS allocations (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        origin      TEXT    NOT NULL,
        chat_id     INTEGER,
        client_id   TEXT    NOT NULL,
        range_token TEXT    NOT NULL,
        quantity    INTEGER NOT NULL,
        outcome     TEXT    NOT NULL,
        created_at  TEXT    NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_allocations_chat ON allocations (chat_id, id);
";

const SELECT_COLUMNS: &str =
    "SELECT id, origin, chat_id, client_id, range_token, quantity, outcome, created_at FROM allocations";

/// SQLite-backed ledger. One connection behind a mutex serialises writers,
/// which keeps `id` order equal to append order.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, attempt: &AllocationAttempt) -> Result<i64, LedgerError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO allocations
                 (origin, chat_id, client_id, range_token, quantity, outcome, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                attempt.origin.as_str(),
                attempt.chat_id.map(|c| c.0),
                attempt.client_id,
                attempt.range_token,
                attempt.quantity,
                attempt.outcome.to_string(),
                attempt.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    #[cfg(test)]
    fn break_store(&self) {
        self.lock()
            .execute_batch("DROP TABLE allocations;")
            .expect("drop table");
    }
}

struct RawRow {
    id: i64,
    origin: String,
    chat_id: Option<i64>,
    client_id: String,
    range_token: String,
    quantity: u32,
    outcome: String,
    created_at: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            origin: row.get(1)?,
            chat_id: row.get(2)?,
            client_id: row.get(3)?,
            range_token: row.get(4)?,
            quantity: row.get(5)?,
            outcome: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_attempt(self) -> Result<AllocationAttempt, LedgerError> {
        let id = self.id;
        let corrupt = move |reason: String| LedgerError::Corrupt { id, reason };
        let origin = Origin::parse(&self.origin)
            .ok_or_else(|| corrupt(format!("unknown origin `{}`", self.origin)))?;
        let outcome = Outcome::parse(&self.outcome)
            .ok_or_else(|| corrupt(format!("unknown outcome `{}`", self.outcome)))?;
        let timestamp = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt(format!("bad timestamp: {e}")))?
            .with_timezone(&Utc);
        Ok(AllocationAttempt {
            timestamp,
            origin,
            chat_id: self.chat_id.map(ChatId),
            client_id: self.client_id,
            range_token: self.range_token,
            quantity: self.quantity,
            outcome,
        })
    }
}

impl Ledger for SqliteLedger {
    fn append(&self, attempt: &AllocationAttempt) {
        match self.insert(attempt) {
            Ok(id) => tracing::debug!(id, outcome = %attempt.outcome, "allocation recorded"),
            Err(e) => tracing::error!(
                error = %e,
                client_id = %attempt.client_id,
                range_token = %attempt.range_token,
                outcome = %attempt.outcome,
                "failed to record allocation attempt"
            ),
        }
    }

    fn recent(
        &self,
        limit: usize,
        chat: Option<ChatId>,
    ) -> Result<Vec<AllocationAttempt>, LedgerError> {
        let conn = self.lock();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let raw: Vec<RawRow> = match chat {
            Some(chat) => {
                let mut stmt = conn.prepare(&format!(
                    "{SELECT_COLUMNS} WHERE chat_id = ?1 ORDER BY id DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![chat.0, limit], RawRow::from_row)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT ?1"))?;
                let rows = stmt.query_map(params![limit], RawRow::from_row)?;
                rows.collect::<rusqlite::Result<_>>()?
            }
        };
        drop(conn);
        raw.into_iter().map(RawRow::into_attempt).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::SqliteLedger;
    use crate::{
        ledger::Ledger,
        types::{AllocationAttempt, ChatId, Origin, Outcome},
    };

    fn attempt(client: &str, chat: Option<i64>, outcome: Outcome) -> AllocationAttempt {
        AllocationAttempt {
            timestamp: Utc::now(),
            origin: Origin::Manual,
            chat_id: chat.map(ChatId),
            client_id: client.to_string(),
            range_token: "tok".to_string(),
            quantity: 5,
            outcome,
        }
    }

    #[test]
    fn recent_is_newest_first_and_limited() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        for id in ["a", "b", "c"] {
            ledger.append(&attempt(id, None, Outcome::Success));
        }
        let recent = ledger.recent(2, None).unwrap();
        let ids: Vec<&str> = recent.iter().map(|a| a.client_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn attempts_read_back_intact() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let original = attempt("x", Some(42), Outcome::FailedHttp(503));
        ledger.append(&original);
        let back = ledger.recent(10, None).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].outcome, Outcome::FailedHttp(503));
        assert_eq!(back[0].chat_id, Some(ChatId(42)));
        assert_eq!(back[0].quantity, 5);
        assert_eq!(back[0].timestamp.timestamp(), original.timestamp.timestamp());
    }

    #[test]
    fn history_can_be_scoped_to_a_chat() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.append(&attempt("mine", Some(1), Outcome::Success));
        ledger.append(&attempt("theirs", Some(2), Outcome::Error));
        ledger.append(&attempt("untagged", None, Outcome::FailedHtml));
        let mine = ledger.recent(10, Some(ChatId(1))).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].client_id, "mine");
        assert_eq!(ledger.recent(10, None).unwrap().len(), 3);
    }

    #[test]
    fn write_failure_is_swallowed() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger.break_store();
        ledger.append(&attempt("lost", None, Outcome::Success));
        assert!(ledger.recent(10, None).is_err());
    }

    #[test]
    fn file_backed_ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        {
            let ledger = SqliteLedger::open(&path).unwrap();
            ledger.append(&attempt("kept", None, Outcome::Success));
        }
        let reopened = SqliteLedger::open(&path).unwrap();
        assert_eq!(reopened.recent(5, None).unwrap()[0].client_id, "kept");
    }
}
