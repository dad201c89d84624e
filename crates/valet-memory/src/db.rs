use rusqlite::Connection;

/// Initialise memory tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    create_user_facts_table(conn)?;
    create_conversation_history_table(conn)?;
    Ok(())
}

fn create_user_facts_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_facts (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    TEXT NOT NULL,
            fact       TEXT NOT NULL,
            category   TEXT NOT NULL DEFAULT 'other',
            confidence REAL NOT NULL DEFAULT 1.0,
            source     TEXT NOT NULL DEFAULT 'conversation',
            embedding  TEXT,
            expires_at TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_facts_user
            ON user_facts(user_id, confidence DESC, created_at DESC);",
    )
}

fn create_conversation_history_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversation_history (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    TEXT NOT NULL,
            channel    TEXT NOT NULL,
            role       TEXT NOT NULL,
            content    TEXT NOT NULL,
            metadata   TEXT,
            source     TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_history_user
            ON conversation_history(user_id, created_at DESC, id DESC);",
    )
}
