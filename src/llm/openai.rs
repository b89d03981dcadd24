use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde_json::json;
use tokio::sync::mpsc::Sender;

use crate::llm::{
    models::{ChatOptions, ChatResponse, FunctionCall, Message, ToolCall, Usage},
    LlmError, LlmProvider,
};

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: String, default_model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
            default_model,
        }
    }

    fn request_body(&self, messages: &[Message], options: &ChatOptions, stream: bool) -> serde_json::Value {
        let model = options.model.as_deref().unwrap_or(&self.default_model);

        let mut final_messages: Vec<Message> = messages.to_vec();
        if let Some(system) = &options.system_prompt {
            final_messages.insert(0, Message::text("system", system.clone()));
        }

        let mut body = json!({
            "model": model,
            "messages": final_messages,
            "stream": stream,
            "temperature": options.temperature.unwrap_or(0.7),
            "max_tokens": options.max_tokens.unwrap_or(4096),
        });

        if let Some(tools) = options.tools.as_ref().filter(|t| !t.is_empty()) {
            body["tools"] = json!(tools);
            // One tool per step; the orchestrator resumes generation after each.
            body["parallel_tool_calls"] = json!(false);
        }

        if let Some(schema) = &options.response_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": { "name": "response", "strict": true, "schema": schema }
            });
        }

        body
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(LlmError::RateLimited);
            }
            return Err(LlmError::Api(format!("OpenAI Error {}: {}", status, text)));
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, messages: &[Message], options: ChatOptions) -> Result<ChatResponse, LlmError> {
        let body = self.request_body(messages, &options, false);
        let response = self.send(&body).await?;

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let message = &json["choices"][0]["message"];
        let content = message["content"].as_str().unwrap_or_default().to_string();
        let tool_calls: Option<Vec<ToolCall>> = message
            .get("tool_calls")
            .and_then(|tc| serde_json::from_value(tc.clone()).ok());

        if content.is_empty() && tool_calls.is_none() && message.is_null() {
            return Err(LlmError::InvalidResponse("missing choices[0].message".to_string()));
        }

        let usage = json.get("usage").map(|u| Usage {
            input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
        });

        Ok(ChatResponse {
            content,
            model: body["model"].as_str().unwrap_or_default().to_string(),
            usage,
            tool_calls,
        })
    }

    async fn chat_streaming(
        &self,
        messages: &[Message],
        options: ChatOptions,
        tx: Sender<String>,
    ) -> Result<ChatResponse, LlmError> {
        let body = self.request_body(messages, &options, true);
        let response = self.send(&body).await?;

        read_stream(response.bytes_stream(), body["model"].as_str().unwrap_or_default(), &tx).await
    }
}

/// Drains a server-sent-events completion stream, forwarding text deltas to
/// `tx`. Stops with `Cancelled` as soon as the receiver is gone.
pub(crate) async fn read_stream<S, B, E>(stream: S, model: &str, tx: &Sender<String>) -> Result<ChatResponse, LlmError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut events = Box::pin(stream.eventsource());
    let mut acc = StreamAccumulator::default();

    while let Some(event) = events.next().await {
        let event = event.map_err(|e| LlmError::Network(e.to_string()))?;
        if let Some(delta) = acc.push_event(&event.data) {
            tx.send(delta).await.map_err(|_| LlmError::Cancelled)?;
        }
    }

    Ok(acc.finish(model))
}

#[derive(Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Folds the `data` payloads of a chat completion stream into one response.
#[derive(Default)]
pub(crate) struct StreamAccumulator {
    content: String,
    tool_calls: Vec<PartialToolCall>,
    usage: Option<Usage>,
}

impl StreamAccumulator {
    /// Applies one event and returns its text delta, if it carried one.
    pub(crate) fn push_event(&mut self, data: &str) -> Option<String> {
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            return None;
        }
        let json = serde_json::from_str::<serde_json::Value>(data).ok()?;

        if let Some(u) = json.get("usage").filter(|u| !u.is_null()) {
            self.usage = Some(Usage {
                input_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
            });
        }

        let delta = &json["choices"][0]["delta"];
        if let Some(calls) = delta["tool_calls"].as_array() {
            for call in calls {
                let index = call["index"].as_u64().unwrap_or(0) as usize;
                while self.tool_calls.len() <= index {
                    self.tool_calls.push(PartialToolCall::default());
                }
                let slot = &mut self.tool_calls[index];
                if let Some(id) = call["id"].as_str() {
                    slot.id = Some(id.to_string());
                }
                if let Some(name) = call["function"]["name"].as_str() {
                    slot.name.push_str(name);
                }
                if let Some(args) = call["function"]["arguments"].as_str() {
                    slot.arguments.push_str(args);
                }
            }
        }

        let text = delta["content"].as_str().filter(|t| !t.is_empty())?;
        self.content.push_str(text);
        Some(text.to_string())
    }

    pub(crate) fn finish(self, model: &str) -> ChatResponse {
        let tool_calls: Vec<ToolCall> = self
            .tool_calls
            .into_iter()
            .filter(|c| !c.name.is_empty())
            .map(|c| ToolCall {
                id: c.id,
                r#type: Some("function".to_string()),
                function: FunctionCall {
                    name: c.name,
                    arguments: c.arguments,
                },
            })
            .collect();

        ChatResponse {
            content: self.content,
            model: model.to_string(),
            usage: self.usage,
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        }
    }
}
