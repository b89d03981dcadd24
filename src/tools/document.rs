use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chat::stream::DataEvent;
use crate::db::{self, service::DbService, DbPool, Document, DocumentKind, NewDocument};
use crate::llm::models::{ChatOptions, Message};
use crate::llm::{LlmError, LlmProvider};
use crate::tools::{ToolContext, ToolError};

#[derive(Debug, Deserialize)]
pub struct CreateDocumentArgs {
    pub title: String,
    pub kind: DocumentKind,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDocumentArgs {
    pub document_id: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ReviseDocumentArgs {
    pub id: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct CodeObject {
    code: String,
}

/// Latest snapshot of `id`, provided `user_id` owns it. A document owned by
/// someone else is reported exactly like a missing one.
pub(crate) fn load_owned(pool: &DbPool, id: &str, user_id: &str) -> Result<Document, ToolError> {
    let conn = db::lock(pool)?;
    match DbService::get_document(&conn, id)? {
        Some(doc) if doc.user_id == user_id => Ok(doc),
        Some(_) => {
            warn!("User {} tried to access document {} owned by someone else", user_id, id);
            Err(ToolError::NotFound(id.to_string()))
        }
        None => Err(ToolError::NotFound(id.to_string())),
    }
}

pub fn create_document(pool: &DbPool, ctx: &ToolContext, args: CreateDocumentArgs) -> Result<Value, ToolError> {
    let user_id = ctx.require_user()?;
    let id = Uuid::new_v4().to_string();

    let conn = db::lock(pool)?;
    DbService::save_document(
        &conn,
        NewDocument {
            id: &id,
            user_id,
            title: &args.title,
            content: "",
            kind: args.kind,
        },
    )?;

    info!("Created {} document {} ({})", args.kind, id, args.title);
    Ok(json!({ "documentId": id }))
}

pub fn update_document(pool: &DbPool, ctx: &ToolContext, args: UpdateDocumentArgs) -> Result<Value, ToolError> {
    let user_id = ctx.require_user()?;
    let document = load_owned(pool, &args.document_id, user_id)?;

    let conn = db::lock(pool)?;
    DbService::save_document(
        &conn,
        NewDocument {
            id: &document.id,
            user_id,
            title: &document.title,
            content: &args.content,
            kind: document.kind,
        },
    )?;

    Ok(json!({ "success": true }))
}

/// Regenerates a document from a description of the change, relaying the
/// secondary generation to the client as it happens. The store is written
/// once, after the generation has completed and `finish` has been sent.
pub async fn revise_document(
    pool: &DbPool,
    llm: &dyn LlmProvider,
    ctx: &ToolContext,
    args: ReviseDocumentArgs,
) -> Result<Value, ToolError> {
    let user_id = ctx.require_user()?;
    let document = load_owned(pool, &args.id, user_id)?;

    ctx.writer.write_data(DataEvent::Id(document.id.clone())).await?;
    ctx.writer.write_data(DataEvent::Title(document.title.clone())).await?;
    ctx.writer.write_data(DataEvent::Kind(document.kind)).await?;
    ctx.writer.write_data(DataEvent::Clear).await?;

    let draft = match document.kind {
        DocumentKind::Text => stream_text(llm, ctx, &document, &args.description).await?,
        DocumentKind::Code => stream_code(llm, ctx, &document, &args.description).await?,
    };

    ctx.writer.write_data(DataEvent::Finish).await?;

    {
        let conn = db::lock(pool)?;
        DbService::save_document(
            &conn,
            NewDocument {
                id: &document.id,
                user_id,
                title: &document.title,
                content: &draft,
                kind: document.kind,
            },
        )?;
    }
    info!("Revised document {} ({} chars)", document.id, draft.len());

    Ok(json!({
        "id": document.id,
        "title": document.title,
        "kind": document.kind,
        "content": "The document was updated and is now visible to the user.",
    }))
}

fn revision_options(ctx: &ToolContext, document: &Document) -> ChatOptions {
    ChatOptions {
        model: Some(ctx.model.api_identifier.clone()),
        system_prompt: Some(update_document_prompt(&document.content, document.kind)),
        ..Default::default()
    }
}

pub fn update_document_prompt(current: &str, kind: DocumentKind) -> String {
    match kind {
        DocumentKind::Text => format!(
            "Improve the following contents of the document based on the given prompt.\n\n{}",
            current
        ),
        DocumentKind::Code => format!(
            "Improve the following code snippet based on the given prompt. Reply with the complete code.\n\n{}",
            current
        ),
    }
}

async fn stream_text(
    llm: &dyn LlmProvider,
    ctx: &ToolContext,
    document: &Document,
    description: &str,
) -> Result<String, ToolError> {
    let messages = vec![Message::text("user", description)];
    let options = revision_options(ctx, document);

    let (tx, mut rx) = mpsc::channel::<String>(100);
    let generation = llm.chat_streaming(&messages, options, tx);
    let relay = async {
        let mut draft = String::new();
        while let Some(delta) = rx.recv().await {
            draft.push_str(&delta);
            ctx.writer.write_data(DataEvent::TextDelta(delta)).await?;
        }
        Ok::<String, ToolError>(draft)
    };

    let (generated, relayed) = tokio::join!(generation, relay);
    let draft = relayed?;
    generated?;
    Ok(draft)
}

async fn stream_code(
    llm: &dyn LlmProvider,
    ctx: &ToolContext,
    document: &Document,
    description: &str,
) -> Result<String, ToolError> {
    let messages = vec![Message::text("user", description)];
    let options = ChatOptions {
        response_schema: Some(json!({
            "type": "object",
            "properties": { "code": { "type": "string" } },
            "required": ["code"],
            "additionalProperties": false
        })),
        ..revision_options(ctx, document)
    };

    let (tx, mut rx) = mpsc::channel::<String>(100);
    let generation = llm.chat_streaming(&messages, options, tx);
    let relay = async {
        let mut raw = String::new();
        let mut last = String::new();
        while let Some(delta) = rx.recv().await {
            raw.push_str(&delta);
            if let Some(code) = partial_code(&raw) {
                if !code.is_empty() && code != last {
                    ctx.writer.write_data(DataEvent::CodeDelta(code.clone())).await?;
                    last = code;
                }
            }
        }
        Ok::<String, ToolError>(raw)
    };

    let (generated, relayed) = tokio::join!(generation, relay);
    let raw = relayed?;
    generated?;

    let object: CodeObject = serde_json::from_str(&raw)
        .map_err(|e| LlmError::InvalidResponse(format!("expected {{\"code\": string}}: {}", e)))?;
    Ok(object.code)
}

/// Decodes the `code` string of a possibly truncated `{"code": "..."}`
/// object, returning what has arrived so far.
pub fn partial_code(raw: &str) -> Option<String> {
    let key = raw.find("\"code\"")?;
    let rest = raw[key + "\"code\"".len()..].trim_start();
    let rest = rest.strip_prefix(':')?.trim_start();
    let body = rest.strip_prefix('"')?;

    let mut out = String::new();
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => break,
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('b') => out.push('\u{8}'),
                Some('f') => out.push('\u{c}'),
                Some('u') => {
                    let Some(unit) = hex_unit(&mut chars) else {
                        break;
                    };
                    match unit {
                        0xD800..=0xDBFF => {
                            // A high surrogate waits for its low half.
                            let mut lookahead = chars.clone();
                            let low = match (lookahead.next(), lookahead.next()) {
                                (Some('\\'), Some('u')) => hex_unit(&mut lookahead),
                                (None, _) | (Some('\\'), None) => break,
                                _ => None,
                            };
                            match low {
                                Some(low @ 0xDC00..=0xDFFF) => {
                                    let combined = 0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
                                    out.push(char::from_u32(combined).unwrap_or('\u{fffd}'));
                                    chars = lookahead;
                                }
                                None if lookahead.clone().next().is_none() => break,
                                _ => out.push('\u{fffd}'),
                            }
                        }
                        _ => out.push(char::from_u32(unit).unwrap_or('\u{fffd}')),
                    }
                }
                Some(other) => out.push(other),
                None => break,
            },
            _ => out.push(c),
        }
    }
    Some(out)
}

/// Reads the four hex digits of a `\u` escape. `None` when fewer than four
/// have arrived or they are not hex.
fn hex_unit(chars: &mut std::str::Chars<'_>) -> Option<u32> {
    let hex: String = chars.by_ref().take(4).collect();
    if hex.len() < 4 {
        return None;
    }
    u32::from_str_radix(&hex, 16).ok()
}
