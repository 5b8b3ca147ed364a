//! Finished-conversation archive backed by SQLite.
//!
//! Approved and unattended sessions are written here when they complete so
//! the transcript outlives the observer connection. Cancelled sessions are
//! never archived.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::error::ArchiveError;
use crate::model::{Outcome, Role, TurnRecord};

/// A completed session as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchivedConversation {
    pub session_id: String,
    pub task: String,
    pub participants: Vec<String>,
    pub iteration: u32,
    pub outcome: Outcome,
    pub completed_at: DateTime<Utc>,
    /// Empty in listings; filled by [`Archive::get`].
    pub transcript: Vec<TurnRecord>,
}

pub struct Archive {
    db: Mutex<Connection>,
}

impl Archive {
    /// Open or create an archive database.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let db = Connection::open(path)?;
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                session_id TEXT PRIMARY KEY,
                task TEXT NOT NULL,
                participants TEXT NOT NULL,
                iteration INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                completed_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS turns (
                session_id TEXT NOT NULL REFERENCES conversations(session_id),
                turn_index INTEGER NOT NULL,
                role TEXT NOT NULL,
                speaker TEXT NOT NULL,
                content TEXT NOT NULL,
                PRIMARY KEY (session_id, turn_index)
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_completed
                ON conversations(completed_at);",
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, ArchiveError> {
        Self::open(Path::new(":memory:"))
    }

    /// Store a conversation. Re-recording a session id replaces it.
    pub fn record(&self, conversation: &ArchivedConversation) -> Result<(), ArchiveError> {
        let participants = serde_json::to_string(&conversation.participants)?;
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM turns WHERE session_id = ?1",
            rusqlite::params![conversation.session_id],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO conversations
                (session_id, task, participants, iteration, outcome, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                conversation.session_id,
                conversation.task,
                participants,
                conversation.iteration,
                conversation.outcome.as_str(),
                conversation
                    .completed_at
                    .to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO turns (session_id, turn_index, role, speaker, content)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for turn in &conversation.transcript {
                stmt.execute(rusqlite::params![
                    conversation.session_id,
                    turn.turn_index as i64,
                    turn.role.as_str(),
                    turn.speaker,
                    turn.content,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Most recent conversations first, without transcripts.
    pub fn list(&self, limit: usize) -> Result<Vec<ArchivedConversation>, ArchiveError> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT session_id, task, participants, iteration, outcome, completed_at
             FROM conversations ORDER BY completed_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![limit as i64], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(decode).collect()
    }

    /// A single conversation with its full transcript.
    pub fn get(&self, session_id: &str) -> Result<Option<ArchivedConversation>, ArchiveError> {
        let db = self.db.lock();
        let row = db
            .query_row(
                "SELECT session_id, task, participants, iteration, outcome, completed_at
                 FROM conversations WHERE session_id = ?1",
                rusqlite::params![session_id],
                read_row,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut conversation = decode(row)?;

        let mut stmt = db.prepare(
            "SELECT turn_index, role, speaker, content FROM turns
             WHERE session_id = ?1 ORDER BY turn_index ASC",
        )?;
        let turns = stmt
            .query_map(rusqlite::params![session_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (index, role, speaker, content) in turns {
            let role = Role::parse(&role)
                .ok_or_else(|| ArchiveError::Corrupt(format!("unknown role '{role}'")))?;
            conversation.transcript.push(TurnRecord {
                turn_index: index as usize,
                role,
                speaker,
                content,
            });
        }
        Ok(Some(conversation))
    }
}

type Row = (String, String, String, u32, String, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode(row: Row) -> Result<ArchivedConversation, ArchiveError> {
    let (session_id, task, participants, iteration, outcome, completed_at) = row;
    let outcome = Outcome::parse(&outcome)
        .ok_or_else(|| ArchiveError::Corrupt(format!("unknown outcome '{outcome}'")))?;
    let completed_at = DateTime::parse_from_rfc3339(&completed_at)
        .map_err(|e| ArchiveError::Corrupt(format!("bad timestamp: {e}")))?
        .with_timezone(&Utc);
    Ok(ArchivedConversation {
        session_id,
        task,
        participants: serde_json::from_str(&participants)?,
        iteration,
        outcome,
        completed_at,
        transcript: Vec::new(),
    })
}
