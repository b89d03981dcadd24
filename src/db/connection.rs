use crate::config::DatabaseConfig;
use duckdb::{Connection, Result as DbResult};
use std::sync::{Arc, Mutex};
use tracing::info;

pub type DbPool = Arc<Mutex<Connection>>;

// Timestamps are RFC 3339 strings with a fixed microsecond precision so that
// lexical order matches time order. `seq` columns record insertion order.
const SCHEMA: &str = r#"
CREATE SEQUENCE IF NOT EXISTS seq_messages;
CREATE SEQUENCE IF NOT EXISTS seq_documents;

CREATE TABLE IF NOT EXISTS chats (
    id VARCHAR PRIMARY KEY,
    user_id VARCHAR NOT NULL,
    title VARCHAR NOT NULL,
    created_at VARCHAR NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    seq BIGINT PRIMARY KEY DEFAULT nextval('seq_messages'),
    id VARCHAR NOT NULL,
    chat_id VARCHAR NOT NULL,
    role VARCHAR NOT NULL,
    content VARCHAR NOT NULL,
    created_at VARCHAR NOT NULL
);

CREATE TABLE IF NOT EXISTS documents (
    seq BIGINT PRIMARY KEY DEFAULT nextval('seq_documents'),
    id VARCHAR NOT NULL,
    user_id VARCHAR NOT NULL,
    title VARCHAR NOT NULL,
    content VARCHAR NOT NULL,
    kind VARCHAR NOT NULL,
    created_at VARCHAR NOT NULL
);

CREATE TABLE IF NOT EXISTS suggestions (
    id VARCHAR PRIMARY KEY,
    document_id VARCHAR NOT NULL,
    document_created_at VARCHAR NOT NULL,
    user_id VARCHAR NOT NULL,
    content VARCHAR NOT NULL,
    created_at VARCHAR NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id);
CREATE INDEX IF NOT EXISTS idx_documents_id ON documents(id);
CREATE INDEX IF NOT EXISTS idx_suggestions_document ON suggestions(document_id);
"#;

pub fn get_connection(config: &DatabaseConfig) -> DbResult<DbPool> {
    info!("Connecting to DuckDB at {}", config.path);
    let conn = Connection::open(&config.path)?;

    init_schema(&conn)?;

    Ok(Arc::new(Mutex::new(conn)))
}

/// Fresh in-memory database with the schema applied.
pub fn in_memory() -> DbResult<DbPool> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn init_schema(conn: &Connection) -> DbResult<()> {
    info!("Initializing database schema");
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
