use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::chat::stream::DataEvent;
use crate::db::{self, service::DbService, DbPool, Suggestion};
use crate::llm::models::{ChatOptions, Message};
use crate::llm::{LlmError, LlmProvider};
use crate::tools::document::load_owned;
use crate::tools::{ToolContext, ToolError};

const MAX_SUGGESTIONS: usize = 5;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSuggestionsArgs {
    pub document_id: String,
    pub query: String,
}

#[derive(Debug, Deserialize)]
struct Drafts {
    suggestions: Vec<String>,
}

/// Drafts suggestions for the current snapshot of a document and stores them
/// pinned to that snapshot.
pub async fn request_suggestions(
    pool: &DbPool,
    llm: &dyn LlmProvider,
    ctx: &ToolContext,
    args: RequestSuggestionsArgs,
) -> Result<Value, ToolError> {
    let user_id = ctx.require_user()?;
    let document = load_owned(pool, &args.document_id, user_id)?;

    let options = ChatOptions {
        model: Some(ctx.model.api_identifier.clone()),
        system_prompt: Some(format!(
            "You are a helpful writing assistant. Given a piece of writing, offer at most {} \
             suggestions to improve it. Each suggestion is one short sentence.\n\n{}",
            MAX_SUGGESTIONS, document.content
        )),
        response_schema: Some(json!({
            "type": "object",
            "properties": {
                "suggestions": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["suggestions"],
            "additionalProperties": false
        })),
        ..Default::default()
    };

    let response = llm.chat(&[Message::text("user", args.query.as_str())], options).await?;
    let drafts: Drafts = serde_json::from_str(&response.content)
        .map_err(|e| LlmError::InvalidResponse(format!("expected {{\"suggestions\": [string]}}: {}", e)))?;

    let created_at = db::service::now();
    let suggestions: Vec<Suggestion> = drafts
        .suggestions
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .take(MAX_SUGGESTIONS)
        .map(|content| Suggestion {
            id: Uuid::new_v4().to_string(),
            document_id: document.id.clone(),
            document_created_at: document.created_at,
            user_id: user_id.to_string(),
            content,
            created_at,
        })
        .collect();

    for suggestion in &suggestions {
        ctx.writer.write_data(DataEvent::Suggestion(suggestion.clone())).await?;
    }

    {
        let conn = db::lock(pool)?;
        DbService::insert_suggestions(&conn, &suggestions)?;
    }
    info!("Stored {} suggestions for document {}", suggestions.len(), document.id);

    Ok(json!({ "suggestions": suggestions }))
}
