pub mod messages;
pub mod orchestrator;
pub mod stream;
pub mod title;

pub use messages::{ChatRequest, CoreMessage, IncomingMessage};
pub use orchestrator::{Orchestrator, PreparedTurn, TurnOutcome};

use thiserror::Error;

use crate::db::StoreError;
use crate::llm::LlmError;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    InvalidInput(String),
    /// Authenticated, but not the owner. Reported to clients as Unauthorized.
    #[error("Unauthorized")]
    OwnershipViolation,
    #[error("Upstream Error: {0}")]
    Upstream(#[from] LlmError),
    #[error("Persistence Error: {0}")]
    Persistence(#[from] StoreError),
}

impl From<duckdb::Error> for ChatError {
    fn from(e: duckdb::Error) -> Self {
        ChatError::Persistence(StoreError::Db(e))
    }
}
