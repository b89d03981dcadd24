#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{Receiver, Sender};

use draftbox::chat::stream::{DataEvent, StreamPart};
use draftbox::chat::{ChatRequest, IncomingMessage, Orchestrator};
use draftbox::config::{default_models, ChatConfig, ToolsConfig};
use draftbox::db::{DbPool, MessageContent, Role};
use draftbox::llm::models::{ChatOptions, ChatResponse, FunctionCall, Message, ToolCall};
use draftbox::llm::{LlmError, LlmProvider, ModelRegistry};
use draftbox::tools::{ToolRegistry, ToolScope};

pub const MODEL_ID: &str = "gemini-2.0-flash-exp";

/// One scripted streaming step.
pub struct Step {
    pub deltas: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
    pub fail: bool,
    pub delay: Option<Duration>,
}

impl Step {
    pub fn text(deltas: &[&str]) -> Self {
        Self {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            tool_calls: vec![],
            fail: false,
            delay: None,
        }
    }

    pub fn call(id: &str, name: &str, args: Value) -> Self {
        Self {
            deltas: vec![],
            tool_calls: vec![tool_call(id, name, args)],
            fail: false,
            delay: None,
        }
    }

    pub fn calls(calls: Vec<ToolCall>) -> Self {
        Self { deltas: vec![], tool_calls: calls, fail: false, delay: None }
    }

    /// Streams the deltas, then fails before completing.
    pub fn failing(deltas: &[&str]) -> Self {
        Self {
            fail: true,
            ..Self::text(deltas)
        }
    }

    /// Waits `delay` before streaming anything.
    pub fn stalled(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::text(&["late"])
        }
    }
}

pub fn tool_call(id: &str, name: &str, args: Value) -> ToolCall {
    ToolCall {
        id: Some(id.to_string()),
        r#type: Some("function".to_string()),
        function: FunctionCall {
            name: name.to_string(),
            arguments: args.to_string(),
        },
    }
}

/// Provider that replays a fixed script. Non-streaming calls answer from
/// `replies` and fail once it runs out.
#[derive(Default)]
pub struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    replies: Mutex<VecDeque<String>>,
    pub chat_calls: Mutex<usize>,
    pub offered_tools: Mutex<Vec<Vec<String>>>,
    pub contexts: Mutex<Vec<Vec<Message>>>,
    on_chat: Option<Box<dyn Fn() + Send + Sync>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            ..Default::default()
        }
    }

    pub fn with_replies(self, replies: &[&str]) -> Self {
        *self.replies.lock().unwrap() = replies.iter().map(|r| r.to_string()).collect();
        self
    }

    /// Runs `hook` inside every non-streaming call, e.g. to race a write
    /// against title generation.
    pub fn with_chat_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_chat = Some(Box::new(hook));
        self
    }

    pub fn chat_call_count(&self) -> usize {
        *self.chat_calls.lock().unwrap()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, _messages: &[Message], options: ChatOptions) -> Result<ChatResponse, LlmError> {
        *self.chat_calls.lock().unwrap() += 1;
        if let Some(hook) = &self.on_chat {
            hook();
        }
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(content) => Ok(ChatResponse {
                content,
                model: options.model.unwrap_or_default(),
                ..Default::default()
            }),
            None => Err(LlmError::Api("no scripted reply".to_string())),
        }
    }

    async fn chat_streaming(
        &self,
        messages: &[Message],
        options: ChatOptions,
        tx: Sender<String>,
    ) -> Result<ChatResponse, LlmError> {
        self.contexts.lock().unwrap().push(messages.to_vec());
        self.offered_tools.lock().unwrap().push(
            options
                .tools
                .unwrap_or_default()
                .into_iter()
                .map(|t| t.function.name)
                .collect(),
        );

        let step = self.steps.lock().unwrap().pop_front();
        let Some(step) = step else {
            return Ok(ChatResponse::default());
        };

        if let Some(delay) = step.delay {
            tokio::time::sleep(delay).await;
        }

        let mut content = String::new();
        for delta in step.deltas {
            content.push_str(&delta);
            tx.send(delta).await.map_err(|_| LlmError::Cancelled)?;
        }

        if step.fail {
            return Err(LlmError::Network("connection reset".to_string()));
        }

        Ok(ChatResponse {
            content,
            model: options.model.unwrap_or_default(),
            usage: None,
            tool_calls: if step.tool_calls.is_empty() { None } else { Some(step.tool_calls) },
        })
    }
}

pub fn chat_config() -> ChatConfig {
    ChatConfig {
        max_steps: 5,
        system_prompt: "You are a test assistant.".to_string(),
        turn_timeout_secs: 10,
        channel_capacity: 1024,
        tool_scope: ToolScope::All,
    }
}

pub fn orchestrator(pool: &DbPool, llm: Arc<dyn LlmProvider>) -> Orchestrator {
    let tools = ToolRegistry::new(pool.clone(), llm.clone(), &ToolsConfig::default());
    Orchestrator::new(
        pool.clone(),
        llm,
        ModelRegistry::new(default_models()),
        tools,
        &chat_config(),
    )
}

pub fn user_message(text: &str) -> IncomingMessage {
    IncomingMessage {
        id: Some("client-temp-1".to_string()),
        role: Role::User,
        content: MessageContent::Text(text.to_string()),
    }
}

pub fn request(chat_id: &str, text: &str) -> ChatRequest {
    ChatRequest {
        id: chat_id.to_string(),
        messages: vec![user_message(text)],
        model_id: MODEL_ID.to_string(),
    }
}

/// Collects everything written so far. Call after the producer finished.
pub fn drain(rx: &mut Receiver<StreamPart>) -> Vec<StreamPart> {
    let mut parts = Vec::new();
    while let Ok(part) = rx.try_recv() {
        parts.push(part);
    }
    parts
}

pub fn data_events(parts: &[StreamPart]) -> Vec<DataEvent> {
    parts
        .iter()
        .filter_map(|p| match p {
            StreamPart::Data(event) => Some(event.clone()),
            _ => None,
        })
        .collect()
}
