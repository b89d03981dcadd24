//! The ordered event stream from a running turn to the client.
//!
//! Parts are queued on a bounded channel and encoded one per line, each line
//! prefixed with a type code (`0:` text, `2:` data, `8:` annotation, ...).
//! The client replays parts in arrival order, so the writer never reorders.

use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::db::{DocumentKind, Suggestion};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("notification channel closed")]
pub struct ChannelClosed;

/// Typed payload written with `write_data`. Serialized as
/// `{"type": ..., "content": ...}`.
#[derive(Debug, Clone, PartialEq)]
pub enum DataEvent {
    UserMessageId(String),
    Id(String),
    Title(String),
    Kind(DocumentKind),
    Clear,
    TextDelta(String),
    /// Full code decoded so far, not an increment.
    CodeDelta(String),
    Suggestion(Suggestion),
    Finish,
}

impl DataEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DataEvent::UserMessageId(_) => "user-message-id",
            DataEvent::Id(_) => "id",
            DataEvent::Title(_) => "title",
            DataEvent::Kind(_) => "kind",
            DataEvent::Clear => "clear",
            DataEvent::TextDelta(_) => "text-delta",
            DataEvent::CodeDelta(_) => "code-delta",
            DataEvent::Suggestion(_) => "suggestion",
            DataEvent::Finish => "finish",
        }
    }

    fn content(&self) -> Value {
        match self {
            DataEvent::UserMessageId(s)
            | DataEvent::Id(s)
            | DataEvent::Title(s)
            | DataEvent::TextDelta(s)
            | DataEvent::CodeDelta(s) => Value::String(s.clone()),
            DataEvent::Kind(kind) => Value::String(kind.as_str().to_string()),
            DataEvent::Clear | DataEvent::Finish => Value::String(String::new()),
            DataEvent::Suggestion(s) => json!(s),
        }
    }
}

impl Serialize for DataEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        json!({ "type": self.event_type(), "content": self.content() }).serialize(serializer)
    }
}

/// Out-of-band reconciliation of a client-side message id with the id the
/// server persisted it under.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAnnotation {
    pub message_id_from_server: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamPart {
    StartStep { message_id: String },
    Text(String),
    Data(DataEvent),
    Error(String),
    Annotation(MessageAnnotation),
    ToolCall { tool_call_id: String, tool_name: String, args: Value },
    ToolResult { tool_call_id: String, result: Value },
    FinishStep { reason: FinishReason, is_continued: bool },
    FinishMessage { reason: FinishReason },
}

impl StreamPart {
    /// One wire line, newline included.
    pub fn encode(&self) -> String {
        let (code, payload) = match self {
            StreamPart::StartStep { message_id } => ("f", json!({ "messageId": message_id })),
            StreamPart::Text(text) => ("0", json!(text)),
            StreamPart::Data(event) => ("2", json!([event])),
            StreamPart::Error(message) => ("3", json!(message)),
            StreamPart::Annotation(annotation) => ("8", json!([annotation])),
            StreamPart::ToolCall { tool_call_id, tool_name, args } => (
                "9",
                json!({ "toolCallId": tool_call_id, "toolName": tool_name, "args": args }),
            ),
            StreamPart::ToolResult { tool_call_id, result } => {
                ("a", json!({ "toolCallId": tool_call_id, "result": result }))
            }
            StreamPart::FinishStep { reason, is_continued } => {
                ("e", json!({ "finishReason": reason, "isContinued": is_continued }))
            }
            StreamPart::FinishMessage { reason } => ("d", json!({ "finishReason": reason })),
        };
        format!("{}:{}\n", code, payload)
    }
}

/// Producer half. Every write waits for queue space, so a slow client slows
/// the turn down instead of growing a buffer. Writes fail once the consumer
/// is gone, which is how a turn learns the client aborted.
#[derive(Debug, Clone)]
pub struct DataStreamWriter {
    tx: mpsc::Sender<StreamPart>,
}

pub fn data_stream(capacity: usize) -> (DataStreamWriter, mpsc::Receiver<StreamPart>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (DataStreamWriter { tx }, rx)
}

impl DataStreamWriter {
    pub async fn write(&self, part: StreamPart) -> Result<(), ChannelClosed> {
        self.tx.send(part).await.map_err(|_| ChannelClosed)
    }

    pub async fn write_data(&self, event: DataEvent) -> Result<(), ChannelClosed> {
        self.write(StreamPart::Data(event)).await
    }

    pub async fn write_message_annotation(&self, annotation: MessageAnnotation) -> Result<(), ChannelClosed> {
        self.write(StreamPart::Annotation(annotation)).await
    }

    pub async fn write_text(&self, delta: String) -> Result<(), ChannelClosed> {
        self.write(StreamPart::Text(delta)).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_lines() {
        assert_eq!(StreamPart::Text("hi \"x\"".to_string()).encode(), "0:\"hi \\\"x\\\"\"\n");
        assert_eq!(
            StreamPart::Data(DataEvent::UserMessageId("m1".to_string())).encode(),
            "2:[{\"content\":\"m1\",\"type\":\"user-message-id\"}]\n"
        );
        assert_eq!(
            StreamPart::Annotation(MessageAnnotation {
                message_id_from_server: "s1".to_string()
            })
            .encode(),
            "8:[{\"messageIdFromServer\":\"s1\"}]\n"
        );
        assert_eq!(
            StreamPart::FinishMessage { reason: FinishReason::ToolCalls }.encode(),
            "d:{\"finishReason\":\"tool-calls\"}\n"
        );
    }

    #[test]
    fn test_clear_and_kind_payloads() {
        assert_eq!(
            serde_json::to_value(DataEvent::Clear).unwrap(),
            json!({"type": "clear", "content": ""})
        );
        assert_eq!(
            serde_json::to_value(DataEvent::Kind(DocumentKind::Code)).unwrap(),
            json!({"type": "kind", "content": "code"})
        );
    }

    #[tokio::test]
    async fn test_writer_fails_after_reader_dropped() {
        let (writer, rx) = data_stream(4);
        writer.write_text("a".to_string()).await.unwrap();
        drop(rx);
        assert!(writer.is_closed());
        assert_eq!(writer.write_data(DataEvent::Finish).await, Err(ChannelClosed));
    }
}
