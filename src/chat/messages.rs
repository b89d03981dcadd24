use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::db::{ContentPart, MessageContent, Role};
use crate::llm::models::{FunctionCall, Message as LlmMessage, ToolCall};

/// A message as the client sends it. `id` is the client's temporary id and
/// is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub id: String,
    pub messages: Vec<IncomingMessage>,
    pub model_id: String,
}

/// A message of the conversation before it has a server id.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl CoreMessage {
    pub fn assistant(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Parts(parts),
        }
    }

    pub fn tool(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(parts),
        }
    }
}

impl From<IncomingMessage> for CoreMessage {
    fn from(m: IncomingMessage) -> Self {
        Self {
            role: m.role,
            content: m.content,
        }
    }
}

pub fn most_recent_user_message(messages: &[CoreMessage]) -> Option<&CoreMessage> {
    messages.iter().rev().find(|m| m.role == Role::User)
}

/// Flattens conversation messages into the provider's shape. Each tool
/// result becomes its own `tool` message keyed by the call id.
pub fn to_llm_messages(messages: &[CoreMessage]) -> Vec<LlmMessage> {
    let mut out = Vec::with_capacity(messages.len());

    for m in messages {
        let parts = match &m.content {
            MessageContent::Text(text) => {
                out.push(LlmMessage::text(m.role.as_str(), text.clone()));
                continue;
            }
            MessageContent::Parts(parts) => parts,
        };

        if m.role == Role::Tool {
            for part in parts {
                if let ContentPart::ToolResult { tool_call_id, result, .. } = part {
                    out.push(LlmMessage {
                        role: "tool".to_string(),
                        content: Some(result.to_string()),
                        tool_calls: None,
                        tool_call_id: Some(tool_call_id.clone()),
                    });
                }
            }
            continue;
        }

        let text = m.content.text();
        let tool_calls: Vec<ToolCall> = parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolCall { tool_call_id, tool_name, args } => Some(ToolCall {
                    id: Some(tool_call_id.clone()),
                    r#type: Some("function".to_string()),
                    function: FunctionCall {
                        name: tool_name.clone(),
                        arguments: args.to_string(),
                    },
                }),
                _ => None,
            })
            .collect();

        out.push(LlmMessage {
            role: m.role.as_str().to_string(),
            content: if text.is_empty() && !tool_calls.is_empty() { None } else { Some(text) },
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            tool_call_id: None,
        });
    }

    out
}

/// Drops tool calls that never got a result, along with empty text parts,
/// then drops any message left with no content. Everything else passes
/// through untouched.
pub fn sanitize_response_messages(messages: Vec<CoreMessage>) -> Vec<CoreMessage> {
    let answered: HashSet<String> = messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| match &m.content {
            MessageContent::Parts(parts) => Some(parts),
            MessageContent::Text(_) => None,
        })
        .flatten()
        .filter_map(|p| match p {
            ContentPart::ToolResult { tool_call_id, .. } => Some(tool_call_id.clone()),
            _ => None,
        })
        .collect();

    messages
        .into_iter()
        .filter_map(|m| {
            let content = match m.content {
                MessageContent::Parts(parts) if m.role == Role::Assistant => MessageContent::Parts(
                    parts
                        .into_iter()
                        .filter(|p| match p {
                            ContentPart::ToolCall { tool_call_id, .. } => answered.contains(tool_call_id),
                            ContentPart::Text { text } => !text.is_empty(),
                            ContentPart::ToolResult { .. } => true,
                        })
                        .collect(),
                ),
                other => other,
            };
            if content.is_empty() {
                None
            } else {
                Some(CoreMessage { role: m.role, content })
            }
        })
        .collect()
}
