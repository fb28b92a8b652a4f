//! Conversational coding assistant core: a static analyzer and isolated
//! executor for model-generated Python, and a context manager that decides which
//! earlier turns are worth resending to the model.

pub mod assistant;
pub mod categorize;
pub mod config;
pub mod context;
pub mod llm;
pub mod logger;
pub mod logging;
pub mod output;
pub mod prompts;
pub mod sandbox;
pub mod utils;

pub use assistant::{Assistant, AssistantReply, AssistError};
pub use config::AssistConfig;
pub use context::{ConversationTurn, Role, TopicLabel};
pub use output::RenderedOutput;
pub use sandbox::{ExecutionRequest, ExecutionResult, ExitReason};
