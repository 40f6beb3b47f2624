//! Database repository layer
//!
//! The correlation store: turn rows and intercepted-call rows. Call listing
//! is always in insertion (rowid) order, not timestamp order, so
//! reconstruction stays deterministic independent of clock resolution.

use crate::error::{Error, Result};
use crate::types::{LlmCall, RawBody, Turn};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable foreign keys and WAL mode for better concurrency
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    // ============================================
    // Turn operations
    // ============================================

    /// Insert a new turn with null message ids, returning its id
    pub fn open_turn(&self, conversation_id: &str) -> Result<String> {
        let turn_id = uuid::Uuid::new_v4().to_string();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO turns (id, conversation_id, user_message_id, assistant_message_id, created_at)
            VALUES (?1, ?2, NULL, NULL, ?3)
            "#,
            params![turn_id, conversation_id, Utc::now().to_rfc3339()],
        )?;
        Ok(turn_id)
    }

    /// Fill in the visible message ids once the agent adapter has responded.
    ///
    /// A turn is mutated exactly once, by this call.
    pub fn close_turn(
        &self,
        turn_id: &str,
        user_message_id: &str,
        assistant_message_id: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE turns SET user_message_id = ?2, assistant_message_id = ?3 WHERE id = ?1",
            params![turn_id, user_message_id, assistant_message_id],
        )?;
        if updated == 0 {
            return Err(Error::TurnNotFound(turn_id.to_string()));
        }
        Ok(())
    }

    /// Get a turn by id
    pub fn get_turn(&self, turn_id: &str) -> Result<Option<Turn>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM turns WHERE id = ?", [turn_id], |row| {
            Self::row_to_turn(row)
        })
        .optional()
        .map_err(Error::from)
    }

    /// All turns of a conversation, in the order they were opened
    pub fn turns_for_conversation(&self, conversation_id: &str) -> Result<Vec<Turn>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM turns WHERE conversation_id = ? ORDER BY rowid")?;
        let turns = stmt
            .query_map([conversation_id], |row| Self::row_to_turn(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(turns)
    }

    /// Delete a conversation's turns and their correlated calls.
    ///
    /// Cascade is best-effort, not transactional.
    pub fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            DELETE FROM llm_calls WHERE turn_id IN
                (SELECT id FROM turns WHERE conversation_id = ?1)
            "#,
            params![conversation_id],
        )?;
        conn.execute(
            "DELETE FROM turns WHERE conversation_id = ?1",
            params![conversation_id],
        )?;
        Ok(())
    }

    // ============================================
    // Call operations
    // ============================================

    /// Insert an intercepted call with null response fields, returning its id.
    ///
    /// `turn_id` is the correlator's active turn at this instant; it is fixed
    /// here and never reassigned.
    pub fn record_call_start(
        &self,
        path: &str,
        method: &str,
        request_body: &RawBody,
        turn_id: Option<&str>,
    ) -> Result<String> {
        let call_id = uuid::Uuid::new_v4().to_string();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO llm_calls (id, ts, path, method, request_body, response_status, response_body, duration_ms, turn_id)
            VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL, NULL, ?6)
            "#,
            params![
                call_id,
                Utc::now().to_rfc3339(),
                path,
                method,
                request_body.as_str(),
                turn_id,
            ],
        )?;
        Ok(call_id)
    }

    /// Fill in the response fields once the upstream call completed
    pub fn record_call_finish(
        &self,
        call_id: &str,
        response_status: u16,
        response_body: &RawBody,
        duration_ms: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            r#"
            UPDATE llm_calls
            SET response_status = ?2, response_body = ?3, duration_ms = ?4
            WHERE id = ?1
            "#,
            params![call_id, response_status, response_body.as_str(), duration_ms],
        )?;
        if updated == 0 {
            return Err(Error::CallNotFound(call_id.to_string()));
        }
        Ok(())
    }

    /// Get a call by id
    pub fn get_call(&self, call_id: &str) -> Result<Option<LlmCall>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM llm_calls WHERE id = ?", [call_id], |row| {
            Self::row_to_call(row)
        })
        .optional()
        .map_err(Error::from)
    }

    /// All recorded calls, in insertion order
    pub fn list_calls(&self) -> Result<Vec<LlmCall>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM llm_calls ORDER BY rowid")?;
        let calls = stmt
            .query_map([], |row| Self::row_to_call(row))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(calls)
    }

    /// Calls correlated to any of the given turns, in insertion order
    pub fn calls_for_turns(&self, turn_ids: &[String]) -> Result<Vec<LlmCall>> {
        if turn_ids.is_empty() {
            return Ok(vec![]);
        }
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT * FROM llm_calls WHERE turn_id IN ({}) ORDER BY rowid",
            placeholders(turn_ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let calls = stmt
            .query_map(rusqlite::params_from_iter(turn_ids), |row| {
                Self::row_to_call(row)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(calls)
    }

    /// Resolve which calls belong to turns whose user- or assistant-message
    /// id is in the given set.
    ///
    /// This is the join used to attach "which LLM calls produced this visible
    /// message" to a conversation transcript. Both of a turn's message ids
    /// map to the same call list.
    pub fn calls_correlated_to_messages(
        &self,
        message_ids: &[String],
    ) -> Result<HashMap<String, Vec<String>>> {
        if message_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.conn.lock().unwrap();
        let marks = placeholders(message_ids.len());
        let sql = format!(
            r#"
            SELECT t.user_message_id, t.assistant_message_id, c.id
            FROM turns t JOIN llm_calls c ON c.turn_id = t.id
            WHERE t.user_message_id IN ({marks}) OR t.assistant_message_id IN ({marks})
            ORDER BY c.rowid
            "#
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(message_ids.iter().chain(message_ids.iter())),
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (user_id, assistant_id, call_id) in rows {
            for msg_id in [user_id, assistant_id].into_iter().flatten() {
                if message_ids.contains(&msg_id) {
                    map.entry(msg_id).or_default().push(call_id.clone());
                }
            }
        }
        Ok(map)
    }

    // ============================================
    // Row mappers
    // ============================================

    fn row_to_turn(row: &Row) -> rusqlite::Result<Turn> {
        let created_at_str: String = row.get("created_at")?;
        Ok(Turn {
            id: row.get("id")?,
            conversation_id: row.get("conversation_id")?,
            user_message_id: row.get("user_message_id")?,
            assistant_message_id: row.get("assistant_message_id")?,
            created_at: parse_ts(&created_at_str),
        })
    }

    fn row_to_call(row: &Row) -> rusqlite::Result<LlmCall> {
        let ts_str: String = row.get("ts")?;
        let request_body: String = row.get("request_body")?;
        let response_body: Option<String> = row.get("response_body")?;
        let response_status: Option<i64> = row.get("response_status")?;
        Ok(LlmCall {
            id: row.get("id")?,
            ts: parse_ts(&ts_str),
            path: row.get("path")?,
            method: row.get("method")?,
            request_body: RawBody::new(request_body),
            response_status: response_status.map(|s| s as u16),
            response_body: response_body.map(RawBody::new),
            duration_ms: row.get("duration_ms")?,
            turn_id: row.get("turn_id")?,
        })
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Comma-separated `?` placeholders for IN-list queries
fn placeholders(count: usize) -> String {
    std::iter::repeat("?").take(count).collect::<Vec<_>>().join(", ")
}
