use crate::db::models::{
    Chat, Document, DocumentKind, Message, MessageContent, NewDocument, Role, Suggestion,
};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use duckdb::{params, types::Type, Connection, Result as DbResult, Row};
use std::str::FromStr;

pub struct DbService;

/// Current time at the precision the store keeps, so values handed out
/// compare equal to what is read back.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, msg: String) -> duckdb::Error {
    duckdb::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn get_ts(row: &Row, idx: usize) -> DbResult<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn get_parsed<T: FromStr<Err = String>>(row: &Row, idx: usize) -> DbResult<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn in_transaction<T>(conn: &Connection, f: impl FnOnce(&Connection) -> DbResult<T>) -> DbResult<T> {
    conn.execute("BEGIN TRANSACTION", [])?;
    match f(conn) {
        Ok(value) => {
            conn.execute("COMMIT", [])?;
            Ok(value)
        }
        Err(e) => {
            let _ = conn.execute("ROLLBACK", []);
            Err(e)
        }
    }
}

impl DbService {
    fn row_to_chat(row: &Row) -> DbResult<Chat> {
        Ok(Chat {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            created_at: get_ts(row, 3)?,
        })
    }

    fn row_to_message(row: &Row) -> DbResult<Message> {
        let raw_content: String = row.get(3)?;
        let content: MessageContent =
            serde_json::from_str(&raw_content).map_err(|e| conversion_error(3, e.to_string()))?;

        Ok(Message {
            id: row.get(0)?,
            chat_id: row.get(1)?,
            role: get_parsed::<Role>(row, 2)?,
            content,
            created_at: get_ts(row, 4)?,
        })
    }

    fn row_to_document(row: &Row) -> DbResult<Document> {
        Ok(Document {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            content: row.get(3)?,
            kind: get_parsed::<DocumentKind>(row, 4)?,
            created_at: get_ts(row, 5)?,
        })
    }

    fn row_to_suggestion(row: &Row) -> DbResult<Suggestion> {
        Ok(Suggestion {
            id: row.get(0)?,
            document_id: row.get(1)?,
            document_created_at: get_ts(row, 2)?,
            user_id: row.get(3)?,
            content: row.get(4)?,
            created_at: get_ts(row, 5)?,
        })
    }

    // --- Chat Operations ---

    pub fn insert_chat(conn: &Connection, id: &str, user_id: &str, title: &str) -> DbResult<Chat> {
        let chat = Chat {
            id: id.to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            created_at: now(),
        };

        conn.execute(
            "INSERT INTO chats (id, user_id, title, created_at) VALUES (?, ?, ?, ?)",
            params![chat.id, chat.user_id, chat.title, format_ts(&chat.created_at)],
        )?;

        Ok(chat)
    }

    /// Inserts the chat unless `id` is already taken, then returns the stored
    /// row and whether this call created it.
    pub fn insert_chat_if_absent(conn: &Connection, id: &str, user_id: &str, title: &str) -> DbResult<(Chat, bool)> {
        let inserted = conn.execute(
            "INSERT INTO chats (id, user_id, title, created_at) VALUES (?, ?, ?, ?) ON CONFLICT (id) DO NOTHING",
            params![id, user_id, title, format_ts(&now())],
        )?;

        let chat = Self::get_chat(conn, id)?.ok_or(duckdb::Error::QueryReturnedNoRows)?;
        Ok((chat, inserted > 0))
    }

    pub fn get_chat(conn: &Connection, id: &str) -> DbResult<Option<Chat>> {
        let mut stmt = conn.prepare("SELECT id, user_id, title, created_at FROM chats WHERE id = ?")?;
        let mut rows = stmt.query_map(params![id], Self::row_to_chat)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn list_chats(conn: &Connection, user_id: &str, limit: usize, offset: usize) -> DbResult<Vec<Chat>> {
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, created_at FROM chats WHERE user_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64, offset as i64], Self::row_to_chat)?;

        rows.collect()
    }

    /// Returns the number of rows touched; zero means no such chat.
    pub fn update_chat_title(conn: &Connection, id: &str, title: &str) -> DbResult<usize> {
        conn.execute("UPDATE chats SET title = ? WHERE id = ?", params![title, id])
    }

    pub fn delete_chat(conn: &Connection, id: &str) -> DbResult<()> {
        in_transaction(conn, |conn| {
            conn.execute("DELETE FROM messages WHERE chat_id = ?", params![id])?;
            conn.execute("DELETE FROM chats WHERE id = ?", params![id])?;
            Ok(())
        })
    }

    // --- Message Operations ---

    /// Inserts the batch atomically, preserving slice order.
    pub fn insert_messages(conn: &Connection, messages: &[Message]) -> DbResult<()> {
        in_transaction(conn, |conn| {
            for m in messages {
                let content = serde_json::to_string(&m.content)
                    .map_err(|e| duckdb::Error::ToSqlConversionFailure(Box::new(e)))?;
                conn.execute(
                    "INSERT INTO messages (id, chat_id, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
                    params![m.id, m.chat_id, m.role.as_str(), content, format_ts(&m.created_at)],
                )?;
            }
            Ok(())
        })
    }

    pub fn get_messages(conn: &Connection, chat_id: &str) -> DbResult<Vec<Message>> {
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, role, content, created_at
             FROM messages
             WHERE chat_id = ?
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![chat_id], Self::row_to_message)?;

        rows.collect()
    }

    // --- Document Operations ---

    /// Appends a snapshot. Earlier snapshots with the same id are kept.
    pub fn save_document(conn: &Connection, doc: NewDocument<'_>) -> DbResult<Document> {
        let document = Document {
            id: doc.id.to_string(),
            user_id: doc.user_id.to_string(),
            title: doc.title.to_string(),
            content: doc.content.to_string(),
            kind: doc.kind,
            created_at: now(),
        };

        conn.execute(
            "INSERT INTO documents (id, user_id, title, content, kind, created_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                document.id,
                document.user_id,
                document.title,
                document.content,
                document.kind.as_str(),
                format_ts(&document.created_at)
            ],
        )?;

        Ok(document)
    }

    /// Latest snapshot of the document.
    pub fn get_document(conn: &Connection, id: &str) -> DbResult<Option<Document>> {
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, content, kind, created_at
             FROM documents
             WHERE id = ?
             ORDER BY seq DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![id], Self::row_to_document)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Every snapshot of the document, oldest first.
    pub fn get_document_history(conn: &Connection, id: &str) -> DbResult<Vec<Document>> {
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, content, kind, created_at
             FROM documents
             WHERE id = ?
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![id], Self::row_to_document)?;

        rows.collect()
    }

    // --- Suggestion Operations ---

    pub fn insert_suggestions(conn: &Connection, suggestions: &[Suggestion]) -> DbResult<()> {
        in_transaction(conn, |conn| {
            for s in suggestions {
                conn.execute(
                    "INSERT INTO suggestions (id, document_id, document_created_at, user_id, content, created_at)
                     VALUES (?, ?, ?, ?, ?, ?)",
                    params![
                        s.id,
                        s.document_id,
                        format_ts(&s.document_created_at),
                        s.user_id,
                        s.content,
                        format_ts(&s.created_at)
                    ],
                )?;
            }
            Ok(())
        })
    }

    pub fn get_suggestions(conn: &Connection, document_id: &str) -> DbResult<Vec<Suggestion>> {
        let mut stmt = conn.prepare(
            "SELECT id, document_id, document_created_at, user_id, content, created_at
             FROM suggestions
             WHERE document_id = ?
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![document_id], Self::row_to_suggestion)?;

        rows.collect()
    }
}
