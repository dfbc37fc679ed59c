//! Conversation transcript stored in SQLite.
//!
//! The rolling context the engine feeds back to the model is bounded and
//! token-level; this store keeps the full text of every finished turn so a
//! front end can show history and statistics across restarts.

use crate::engine::{StopReason, TurnReply, TurnStatus};
use rusqlite::{params, Connection, Result, Row};
use std::path::Path;

/// One stored turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub id: i64,
    pub timestamp: String,
    pub user_message: String,
    pub reply: String,
    pub generated_tokens: i64,
    pub outcome: String,
}

/// Aggregate numbers for monitoring.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptStats {
    pub total_turns: i64,
    pub generated_tokens: i64,
    pub aborted_turns: i64,
    pub db_size_bytes: u64,
}

pub struct TranscriptStore {
    conn: Connection,
}

impl TranscriptStore {
    /// Open (or create) the database at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::init(Connection::open(db_path)?)
    }

    /// Store that lives only as long as the value.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                user_message TEXT NOT NULL,
                reply TEXT NOT NULL,
                generated_tokens INTEGER NOT NULL,
                outcome TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    /// Store a finished turn. Skipped turns are not worth a row; callers
    /// filter them, but a skipped reply is still accepted.
    pub fn record_turn(&self, user_message: &str, reply: &TurnReply) -> Result<i64> {
        let timestamp = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO turns (timestamp, user_message, reply, generated_tokens, outcome)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                timestamp,
                user_message,
                reply.text,
                reply.tokens.len() as i64,
                outcome_label(&reply.status)
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Last `limit` turns, oldest first.
    pub fn recent(&self, limit: i64) -> Result<Vec<TranscriptEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, user_message, reply, generated_tokens, outcome
             FROM turns
             ORDER BY id DESC
             LIMIT ?1",
        )?;
        let mut entries = stmt.query_map([limit], entry_from_row)?.collect::<Result<Vec<_>>>()?;
        entries.reverse();
        Ok(entries)
    }

    /// Turns whose user text or reply contains `query`, newest first.
    pub fn search(&self, query: &str, limit: i64) -> Result<Vec<TranscriptEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, user_message, reply, generated_tokens, outcome
             FROM turns
             WHERE user_message LIKE ?1 OR reply LIKE ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let pattern = format!("%{}%", query);
        let entries = stmt
            .query_map(params![pattern, limit], entry_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn count(&self) -> Result<i64> {
        self.conn.query_row("SELECT COUNT(*) FROM turns", [], |row| row.get(0))
    }

    pub fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM turns", [])?;
        Ok(())
    }

    pub fn stats(&self) -> Result<TranscriptStats> {
        let (total_turns, generated_tokens, aborted_turns) = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(generated_tokens), 0),
                    COALESCE(SUM(CASE WHEN outcome LIKE 'aborted%' THEN 1 ELSE 0 END), 0)
             FROM turns",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let db_size_bytes = match self.conn.path() {
            Some(path) if !path.is_empty() => std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
            _ => 0,
        };

        Ok(TranscriptStats {
            total_turns,
            generated_tokens,
            aborted_turns,
            db_size_bytes,
        })
    }
}

fn entry_from_row(row: &Row<'_>) -> Result<TranscriptEntry> {
    Ok(TranscriptEntry {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        user_message: row.get(2)?,
        reply: row.get(3)?,
        generated_tokens: row.get(4)?,
        outcome: row.get(5)?,
    })
}

fn outcome_label(status: &TurnStatus) -> String {
    match status {
        TurnStatus::Completed(StopReason::EndOfSequence) => "completed:eos".to_string(),
        TurnStatus::Completed(StopReason::MaxNewTokens) => "completed:max_new_tokens".to_string(),
        TurnStatus::Skipped => "skipped".to_string(),
        TurnStatus::Cancelled => "cancelled".to_string(),
        TurnStatus::Aborted(err) => format!("aborted: {}", err),
    }
}
