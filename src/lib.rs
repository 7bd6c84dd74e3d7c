pub mod assistant;
pub mod composer;
pub mod config;
pub mod db;
pub mod error;
pub mod fallback;
pub mod llm;
pub mod readiness;
pub mod reinforcement;
pub mod schema_context;
pub mod security;
pub mod translator;

pub use assistant::{AnswerSource, AssistantFacade, AssistantResponse, AssistantStatus};
pub use config::AssistantConfig;
pub use error::{AssistantError, Result};
