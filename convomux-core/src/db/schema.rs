//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: turns and llm_calls
    r#"
    -- One row per user-initiated conversational exchange.
    -- Message ids stay null until the agent adapter responds.
    CREATE TABLE IF NOT EXISTS turns (
        id                   TEXT PRIMARY KEY,
        conversation_id      TEXT NOT NULL,
        user_message_id      TEXT,
        assistant_message_id TEXT,
        created_at           DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_turns_conversation ON turns(conversation_id);
    CREATE INDEX IF NOT EXISTS idx_turns_user_message ON turns(user_message_id);
    CREATE INDEX IF NOT EXISTS idx_turns_assistant_message ON turns(assistant_message_id);

    -- One row per intercepted provider call. Response fields stay null for
    -- calls that never completed; that state is itself telemetry.
    CREATE TABLE IF NOT EXISTS llm_calls (
        id              TEXT PRIMARY KEY,
        ts              DATETIME NOT NULL,
        path            TEXT NOT NULL,
        method          TEXT NOT NULL,
        request_body    TEXT NOT NULL,
        response_status INTEGER,
        response_body   TEXT,
        duration_ms     INTEGER,
        turn_id         TEXT REFERENCES turns(id)
    );

    CREATE INDEX IF NOT EXISTS idx_llm_calls_turn ON llm_calls(turn_id);
    CREATE INDEX IF NOT EXISTS idx_llm_calls_ts ON llm_calls(ts);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        // Run migrations twice - should be idempotent
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["turns", "llm_calls"] {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }
}
