use serde::Deserialize;

use crate::tools::ToolScope;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

/// A caller allowed to use the API. The bearer token maps to `id`, which
/// becomes the owner of every chat and document created on its behalf.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiUser {
    pub id: String,
    pub api_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub users: Vec<ApiUser>,
}

impl AuthConfig {
    pub fn user_for_token(&self, token: &str) -> Option<&ApiUser> {
        if token.is_empty() {
            return None;
        }
        self.users.iter().find(|u| u.api_key == token)
    }

    /// Every user needs a non-empty key. An unset `${VAR}` expands to "",
    /// which would otherwise match an empty bearer token.
    pub fn validate(&self) -> Result<(), ::config::ConfigError> {
        match self.users.iter().find(|u| u.api_key.trim().is_empty()) {
            Some(user) => Err(::config::ConfigError::Message(format!(
                "auth.users: user '{}' has an empty api_key",
                user.id
            ))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    pub default_model: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String,
    pub openai: Option<OpenAiConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    pub system_prompt: String,
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_secs: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub tool_scope: ToolScope,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ToolsConfig {
    #[serde(default = "default_weather_api")]
    pub weather_api_base: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            weather_api_base: default_weather_api(),
        }
    }
}

/// One entry of the model table. `id` is what clients send as `modelId`,
/// `api_identifier` is what the provider receives.
#[derive(Debug, Deserialize, serde::Serialize, Clone, PartialEq)]
pub struct ModelSpec {
    pub id: String,
    pub label: String,
    pub api_identifier: String,
    pub description: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub llm: LlmConfig,
    pub chat: ChatConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default = "default_models")]
    pub models: Vec<ModelSpec>,
}

impl AppConfig {
    pub fn load(path: &str) -> Result<Self, ::config::ConfigError> {
        dotenv::dotenv().ok();

        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path).required(false))
            .add_source(::config::Environment::with_prefix("DRAFTBOX").separator("__"))
            .build()?;

        let mut app_config: AppConfig = settings.try_deserialize()?;

        // Expand environment variables if present like ${OPENAI_API_KEY}
        app_config.server.host = expand_env(&app_config.server.host);
        app_config.database.path = expand_env(&app_config.database.path);

        if let Some(ref mut openai) = app_config.llm.openai {
            openai.api_key = expand_env(&openai.api_key);
        }
        for user in app_config.auth.users.iter_mut() {
            user.api_key = expand_env(&user.api_key);
        }
        app_config.auth.validate()?;

        Ok(app_config)
    }
}

fn expand_env(val: &str) -> String {
    if val.starts_with("${") && val.ends_with('}') {
        let var_name = &val[2..val.len() - 1];
        std::env::var(var_name).unwrap_or_default()
    } else {
        val.to_string()
    }
}

fn default_max_steps() -> usize {
    5
}

fn default_turn_timeout() -> u64 {
    60
}

fn default_channel_capacity() -> usize {
    100
}

fn default_weather_api() -> String {
    "https://api.open-meteo.com/v1/forecast".to_string()
}

pub fn default_models() -> Vec<ModelSpec> {
    vec![ModelSpec {
        id: "gemini-2.0-flash-exp".to_string(),
        label: "Gemini Flash".to_string(),
        api_identifier: "gemini-2.0-flash-exp".to_string(),
        description: "Experimental fast version of Gemini".to_string(),
    }]
}
