pub mod document;
pub mod suggestions;
pub mod weather;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::chat::stream::{ChannelClosed, DataStreamWriter};
use crate::config::{ModelSpec, ToolsConfig};
use crate::db::{DbPool, StoreError};
use crate::llm::models::{FunctionDefinition, ToolDefinition};
use crate::llm::{LlmError, LlmProvider};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("User not authenticated")]
    Unauthorized,
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Tool '{0}' is not enabled for this conversation")]
    NotAllowed(String),
    #[error("Tool '{0}' not found")]
    UnknownTool(String),
    #[error("Upstream Error: {0}")]
    Upstream(#[from] LlmError),
    #[error("Upstream HTTP Error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Persistence Error: {0}")]
    Persistence(#[from] StoreError),
    #[error(transparent)]
    ChannelClosed(#[from] ChannelClosed),
}

impl From<duckdb::Error> for ToolError {
    fn from(e: duckdb::Error) -> Self {
        ToolError::Persistence(StoreError::Db(e))
    }
}

/// The closed set of tools the agent can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ToolName {
    GetWeather,
    CreateDocument,
    UpdateDocument,
    ReviseDocument,
    RequestSuggestions,
}

impl ToolName {
    pub const ALL: [ToolName; 5] = [
        ToolName::GetWeather,
        ToolName::CreateDocument,
        ToolName::UpdateDocument,
        ToolName::ReviseDocument,
        ToolName::RequestSuggestions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::GetWeather => "getWeather",
            ToolName::CreateDocument => "createDocument",
            ToolName::UpdateDocument => "updateDocument",
            ToolName::ReviseDocument => "reviseDocument",
            ToolName::RequestSuggestions => "requestSuggestions",
        }
    }

    pub fn parse(name: &str) -> Option<ToolName> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    pub fn definition(&self) -> ToolDefinition {
        let (description, parameters) = match self {
            ToolName::GetWeather => (
                "Get the current weather at a location",
                json!({
                    "type": "object",
                    "properties": {
                        "latitude": { "type": "number" },
                        "longitude": { "type": "number" }
                    },
                    "required": ["latitude", "longitude"]
                }),
            ),
            ToolName::CreateDocument => (
                "Create a document for writing or code creation activities",
                json!({
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "kind": { "type": "string", "enum": ["text", "code"] }
                    },
                    "required": ["title", "kind"]
                }),
            ),
            ToolName::UpdateDocument => (
                "Replace the content of an existing document",
                json!({
                    "type": "object",
                    "properties": {
                        "documentId": { "type": "string" },
                        "content": { "type": "string" }
                    },
                    "required": ["documentId", "content"]
                }),
            ),
            ToolName::ReviseDocument => (
                "Update an existing document with new content generated from a description of the change",
                json!({
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "description": { "type": "string", "description": "The change to make" }
                    },
                    "required": ["id", "description"]
                }),
            ),
            ToolName::RequestSuggestions => (
                "Request suggestions for a document",
                json!({
                    "type": "object",
                    "properties": {
                        "documentId": { "type": "string" },
                        "query": { "type": "string" }
                    },
                    "required": ["documentId", "query"]
                }),
            ),
        };

        ToolDefinition {
            r#type: "function".to_string(),
            function: FunctionDefinition {
                name: self.as_str().to_string(),
                description: description.to_string(),
                parameters,
            },
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which tools a conversation may use.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolScope {
    Weather,
    Documents,
    #[default]
    All,
}

impl ToolScope {
    pub fn tools(&self) -> Vec<ToolName> {
        match self {
            ToolScope::Weather => vec![ToolName::GetWeather],
            ToolScope::Documents => vec![
                ToolName::CreateDocument,
                ToolName::UpdateDocument,
                ToolName::ReviseDocument,
                ToolName::RequestSuggestions,
            ],
            ToolScope::All => ToolName::ALL.to_vec(),
        }
    }
}

/// Per-turn state lent to every tool call of the turn.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user_id: Option<String>,
    pub writer: DataStreamWriter,
    pub model: ModelSpec,
}

impl ToolContext {
    pub fn require_user(&self) -> Result<&str, ToolError> {
        self.user_id.as_deref().ok_or(ToolError::Unauthorized)
    }
}

#[derive(Clone)]
pub struct ToolRegistry {
    pool: DbPool,
    llm: Arc<dyn LlmProvider>,
    http: Client,
    weather_api: String,
    allowed: Vec<ToolName>,
}

impl ToolRegistry {
    pub fn new(pool: DbPool, llm: Arc<dyn LlmProvider>, config: &ToolsConfig) -> Self {
        Self {
            pool,
            llm,
            http: Client::new(),
            weather_api: config.weather_api_base.clone(),
            allowed: ToolName::ALL.to_vec(),
        }
    }

    /// Restricts the registry to the tools of `scope`.
    pub fn scoped(mut self, scope: ToolScope) -> Self {
        self.allowed = scope.tools();
        self
    }

    pub fn with_allowed(mut self, allowed: Vec<ToolName>) -> Self {
        self.allowed = allowed;
        self
    }

    pub fn allowed(&self) -> &[ToolName] {
        &self.allowed
    }

    pub fn is_allowed(&self, tool: ToolName) -> bool {
        self.allowed.contains(&tool)
    }

    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        self.allowed.iter().map(|t| t.definition()).collect()
    }

    pub async fn invoke(&self, name: &str, arguments: &str, ctx: &ToolContext) -> Result<Value, ToolError> {
        let tool = ToolName::parse(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        if !self.is_allowed(tool) {
            warn!("Rejected call to disabled tool {}", tool);
            return Err(ToolError::NotAllowed(name.to_string()));
        }

        info!("Invoking tool {}", tool);
        match tool {
            ToolName::GetWeather => {
                weather::get_weather(&self.http, &self.weather_api, parse_args(arguments)?).await
            }
            ToolName::CreateDocument => document::create_document(&self.pool, ctx, parse_args(arguments)?),
            ToolName::UpdateDocument => document::update_document(&self.pool, ctx, parse_args(arguments)?),
            ToolName::ReviseDocument => {
                document::revise_document(&self.pool, self.llm.as_ref(), ctx, parse_args(arguments)?).await
            }
            ToolName::RequestSuggestions => {
                suggestions::request_suggestions(&self.pool, self.llm.as_ref(), ctx, parse_args(arguments)?)
                    .await
            }
        }
    }
}

fn parse_args<T: DeserializeOwned>(arguments: &str) -> Result<T, ToolError> {
    let raw = if arguments.trim().is_empty() { "{}" } else { arguments };
    serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for tool in ToolName::ALL {
            assert_eq!(ToolName::parse(tool.as_str()), Some(tool));
            assert_eq!(tool.definition().function.name, tool.as_str());
        }
        assert_eq!(ToolName::parse("internet_search"), None);
    }

    #[test]
    fn test_scopes_are_disjoint_until_all() {
        let weather = ToolScope::Weather.tools();
        let documents = ToolScope::Documents.tools();
        assert!(weather.iter().all(|t| !documents.contains(t)));
        assert_eq!(weather.len() + documents.len(), ToolScope::All.tools().len());
    }

    #[test]
    fn test_parse_args_reports_missing_fields() {
        let err = parse_args::<document::CreateDocumentArgs>(r#"{"title": "x"}"#).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
