use serde::{Deserialize, Serialize};

use crate::db::{Chat, Message};

pub use crate::chat::ChatRequest;

#[derive(Debug, Deserialize)]
pub struct UpdateTitleRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatIdQuery {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DocumentQuery {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionsQuery {
    pub document_id: String,
}

#[derive(Debug, Serialize)]
pub struct ChatWithMessages {
    pub chat: Chat,
    pub messages: Vec<Message>,
}
