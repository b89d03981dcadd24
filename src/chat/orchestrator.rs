use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chat::messages::{
    most_recent_user_message, sanitize_response_messages, to_llm_messages, ChatRequest, CoreMessage,
};
use crate::chat::stream::{
    data_stream, ChannelClosed, DataEvent, DataStreamWriter, FinishReason, MessageAnnotation, StreamPart,
};
use crate::chat::{title, ChatError};
use crate::config::{ChatConfig, ModelSpec};
use crate::db::{self, service::DbService, Chat, ContentPart, DbPool, Message, Role};
use crate::llm::models::{ChatOptions, Message as LlmMessage};
use crate::llm::{LlmError, LlmProvider, ModelRegistry};
use crate::tools::{ToolContext, ToolError, ToolRegistry};

/// A turn that passed every synchronous check: the chat exists and the user
/// message is durable. Nothing after this point can fail the HTTP request.
#[derive(Debug, Clone)]
pub struct PreparedTurn {
    pub chat: Chat,
    pub user_id: String,
    pub model: ModelSpec,
    pub history: Vec<CoreMessage>,
    pub user_message_id: String,
    pub created_chat: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Generation finished. `saved` is false when persisting the response
    /// failed; the client has already seen the content either way.
    Completed { messages: Vec<Message>, saved: bool },
    Failed(String),
    /// The client went away; nothing further was persisted.
    Aborted,
}

enum StepEnd {
    Done,
    Continue,
}

enum StepError {
    Aborted,
    Upstream(LlmError),
}

impl From<ChannelClosed> for StepError {
    fn from(_: ChannelClosed) -> Self {
        StepError::Aborted
    }
}

pub struct Orchestrator {
    pool: DbPool,
    llm: Arc<dyn LlmProvider>,
    models: ModelRegistry,
    tools: ToolRegistry,
    max_steps: usize,
    system_prompt: String,
    turn_timeout: Duration,
    channel_capacity: usize,
}

impl Orchestrator {
    pub fn new(
        pool: DbPool,
        llm: Arc<dyn LlmProvider>,
        models: ModelRegistry,
        tools: ToolRegistry,
        config: &ChatConfig,
    ) -> Self {
        Self {
            pool,
            llm,
            models,
            tools: tools.scoped(config.tool_scope),
            max_steps: config.max_steps.max(1),
            system_prompt: config.system_prompt.clone(),
            turn_timeout: Duration::from_secs(config.turn_timeout_secs),
            channel_capacity: config.channel_capacity,
        }
    }

    /// Replaces the tool allow-list, e.g. to run a weather-only turn.
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Validates the request, resolves the chat (creating it and its title
    /// on first use) and persists the incoming user message.
    pub async fn prepare(&self, user_id: &str, request: ChatRequest) -> Result<PreparedTurn, ChatError> {
        let model = self
            .models
            .find(&request.model_id)
            .cloned()
            .ok_or_else(|| ChatError::NotFound(format!("Model '{}'", request.model_id)))?;

        let history: Vec<CoreMessage> = request.messages.into_iter().map(CoreMessage::from).collect();
        let user_message = most_recent_user_message(&history)
            .cloned()
            .ok_or_else(|| ChatError::InvalidInput("No user message found".to_string()))?;

        let existing = {
            let conn = db::lock(&self.pool)?;
            DbService::get_chat(&conn, &request.id)?
        };

        let (chat, created_chat) = match existing {
            Some(chat) if chat.user_id != user_id => {
                warn!("User {} attempted a turn on chat {} owned by someone else", user_id, chat.id);
                return Err(ChatError::OwnershipViolation);
            }
            Some(chat) => (chat, false),
            None => {
                let title = title::generate_title(self.llm.as_ref(), &model, &user_message).await;
                let conn = db::lock(&self.pool)?;
                // Another turn may have created the chat while the title was generated.
                let (chat, created) = DbService::insert_chat_if_absent(&conn, &request.id, user_id, &title)?;
                if chat.user_id != user_id {
                    warn!("User {} lost the race for chat {} to another owner", user_id, chat.id);
                    return Err(ChatError::OwnershipViolation);
                }
                if created {
                    info!("Created chat {} ({})", chat.id, chat.title);
                }
                (chat, created)
            }
        };

        let user_message_id = Uuid::new_v4().to_string();
        {
            let conn = db::lock(&self.pool)?;
            DbService::insert_messages(
                &conn,
                &[Message {
                    id: user_message_id.clone(),
                    chat_id: chat.id.clone(),
                    role: Role::User,
                    content: user_message.content,
                    created_at: db::service::now(),
                }],
            )?;
        }

        Ok(PreparedTurn {
            chat,
            user_id: user_id.to_string(),
            model,
            history,
            user_message_id,
            created_chat,
        })
    }

    /// Runs the turn on its own task under the configured wall-clock limit
    /// and hands back the consumer end of its notification channel.
    pub fn spawn_turn(self: Arc<Self>, turn: PreparedTurn) -> mpsc::Receiver<StreamPart> {
        let (writer, rx) = data_stream(self.channel_capacity);

        tokio::spawn(async move {
            let chat_id = turn.chat.id.clone();
            match tokio::time::timeout(self.turn_timeout, self.run(turn, writer.clone())).await {
                Ok(TurnOutcome::Completed { messages, saved }) => {
                    info!("Turn on chat {} completed with {} messages (saved: {})", chat_id, messages.len(), saved)
                }
                Ok(TurnOutcome::Failed(reason)) => warn!("Turn on chat {} failed: {}", chat_id, reason),
                Ok(TurnOutcome::Aborted) => info!("Turn on chat {} aborted by client", chat_id),
                Err(_) => {
                    error!("Turn on chat {} exceeded {:?}", chat_id, self.turn_timeout);
                    let _ = writer.write(StreamPart::Error("Turn timed out".to_string())).await;
                    let _ = writer
                        .write(StreamPart::FinishMessage { reason: FinishReason::Error })
                        .await;
                }
            }
        });

        rx
    }

    /// Drives generation for a prepared turn, writing every event to `writer`.
    pub async fn run(&self, turn: PreparedTurn, writer: DataStreamWriter) -> TurnOutcome {
        if writer
            .write_data(DataEvent::UserMessageId(turn.user_message_id.clone()))
            .await
            .is_err()
        {
            return TurnOutcome::Aborted;
        }

        let ctx = ToolContext {
            user_id: Some(turn.user_id.clone()),
            writer: writer.clone(),
            model: turn.model.clone(),
        };
        let options = ChatOptions {
            model: Some(turn.model.api_identifier.clone()),
            system_prompt: Some(self.system_prompt.clone()),
            tools: Some(self.tools.get_definitions()),
            ..Default::default()
        };

        let mut context = to_llm_messages(&turn.history);
        let mut produced: Vec<CoreMessage> = Vec::new();

        for step in 0..self.max_steps {
            match self.run_step(&mut context, &mut produced, &options, &ctx).await {
                Ok(StepEnd::Done) => break,
                Ok(StepEnd::Continue) => {
                    if step + 1 == self.max_steps {
                        info!("Chat {} reached the {} step limit", turn.chat.id, self.max_steps);
                    }
                }
                Err(StepError::Aborted) => return TurnOutcome::Aborted,
                Err(StepError::Upstream(e)) => {
                    error!("Generation failed on chat {}: {}", turn.chat.id, e);
                    let _ = writer.write(StreamPart::Error(e.to_string())).await;
                    let _ = writer
                        .write(StreamPart::FinishMessage { reason: FinishReason::Error })
                        .await;
                    return TurnOutcome::Failed(e.to_string());
                }
            }
        }

        self.complete(&turn, produced, &writer).await
    }

    async fn run_step(
        &self,
        context: &mut Vec<LlmMessage>,
        produced: &mut Vec<CoreMessage>,
        options: &ChatOptions,
        ctx: &ToolContext,
    ) -> Result<StepEnd, StepError> {
        let writer = &ctx.writer;
        writer
            .write(StreamPart::StartStep { message_id: Uuid::new_v4().to_string() })
            .await?;

        let (tx, mut rx) = mpsc::channel::<String>(100);
        let generation = self.llm.chat_streaming(context.as_slice(), options.clone(), tx);
        let relay = async {
            while let Some(delta) = rx.recv().await {
                writer.write_text(delta).await?;
            }
            Ok::<(), ChannelClosed>(())
        };
        let (generated, relayed) = tokio::join!(generation, relay);
        relayed?;
        let response = generated.map_err(StepError::Upstream)?;

        let mut parts = Vec::new();
        if !response.content.is_empty() {
            parts.push(ContentPart::Text { text: response.content.clone() });
        }

        let mut calls = response.tool_calls.unwrap_or_default();
        if calls.len() > 1 {
            warn!("Model requested {} tool calls in one step, running only the first", calls.len());
        }
        let call = if calls.is_empty() { None } else { Some(calls.swap_remove(0)) };

        let Some(call) = call else {
            if !parts.is_empty() {
                let message = CoreMessage::assistant(parts);
                context.extend(to_llm_messages(std::slice::from_ref(&message)));
                produced.push(message);
            }
            writer
                .write(StreamPart::FinishStep { reason: FinishReason::Stop, is_continued: false })
                .await?;
            return Ok(StepEnd::Done);
        };

        let tool_call_id = call
            .id
            .clone()
            .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
        let tool_name = call.function.name.clone();
        let args: Value = serde_json::from_str(&call.function.arguments)
            .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));

        parts.push(ContentPart::ToolCall {
            tool_call_id: tool_call_id.clone(),
            tool_name: tool_name.clone(),
            args: args.clone(),
        });
        writer
            .write(StreamPart::ToolCall {
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.clone(),
                args,
            })
            .await?;

        let result = match self.tools.invoke(&tool_name, &call.function.arguments, ctx).await {
            Ok(value) => value,
            Err(ToolError::ChannelClosed(_)) => return Err(StepError::Aborted),
            Err(e) => {
                warn!("Tool {} failed: {}", tool_name, e);
                json!({ "error": e.to_string() })
            }
        };

        writer
            .write(StreamPart::ToolResult {
                tool_call_id: tool_call_id.clone(),
                result: result.clone(),
            })
            .await?;

        let step_messages = [
            CoreMessage::assistant(parts),
            CoreMessage::tool(vec![ContentPart::ToolResult {
                tool_call_id,
                tool_name,
                result,
            }]),
        ];
        context.extend(to_llm_messages(&step_messages));
        produced.extend(step_messages);

        writer
            .write(StreamPart::FinishStep { reason: FinishReason::ToolCalls, is_continued: true })
            .await?;
        Ok(StepEnd::Continue)
    }

    async fn complete(&self, turn: &PreparedTurn, produced: Vec<CoreMessage>, writer: &DataStreamWriter) -> TurnOutcome {
        let created_at = db::service::now();
        let messages: Vec<Message> = sanitize_response_messages(produced)
            .into_iter()
            .map(|m| Message {
                id: Uuid::new_v4().to_string(),
                chat_id: turn.chat.id.clone(),
                role: m.role,
                content: m.content,
                created_at,
            })
            .collect();

        for message in messages.iter().filter(|m| m.role == Role::Assistant) {
            let annotation = MessageAnnotation {
                message_id_from_server: message.id.clone(),
            };
            if writer.write_message_annotation(annotation).await.is_err() {
                return TurnOutcome::Aborted;
            }
        }

        let saved = match db::lock(&self.pool).and_then(|conn| {
            DbService::insert_messages(&conn, &messages).map_err(db::StoreError::from)
        }) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to save chat {}: {}", turn.chat.id, e);
                false
            }
        };

        let _ = writer
            .write(StreamPart::FinishMessage { reason: FinishReason::Stop })
            .await;

        TurnOutcome::Completed { messages, saved }
    }

    // --- Ownership-checked chat operations ---

    fn owned_chat(&self, user_id: &str, chat_id: &str) -> Result<Chat, ChatError> {
        let conn = db::lock(&self.pool)?;
        match DbService::get_chat(&conn, chat_id)? {
            Some(chat) if chat.user_id == user_id => Ok(chat),
            Some(_) => Err(ChatError::OwnershipViolation),
            None => Err(ChatError::NotFound(format!("Chat '{}'", chat_id))),
        }
    }

    pub fn load_chat(&self, user_id: &str, chat_id: &str) -> Result<(Chat, Vec<Message>), ChatError> {
        let chat = self.owned_chat(user_id, chat_id)?;
        let conn = db::lock(&self.pool)?;
        let messages = DbService::get_messages(&conn, chat_id)?;
        Ok((chat, messages))
    }

    pub fn rename_chat(&self, user_id: &str, chat_id: &str, title: &str) -> Result<Chat, ChatError> {
        let mut chat = self.owned_chat(user_id, chat_id)?;
        let conn = db::lock(&self.pool)?;
        DbService::update_chat_title(&conn, chat_id, title)?;
        chat.title = title.to_string();
        Ok(chat)
    }

    pub fn delete_chat(&self, user_id: &str, chat_id: &str) -> Result<(), ChatError> {
        self.owned_chat(user_id, chat_id)?;
        let conn = db::lock(&self.pool)?;
        DbService::delete_chat(&conn, chat_id)?;
        info!("Deleted chat {}", chat_id);
        Ok(())
    }
}
