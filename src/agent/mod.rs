//! Agent module - LLM interaction and idea evaluation

pub mod evaluator;
pub mod llm;

pub use evaluator::{EvaluationRequest, IdeaModel, LlmIdeaModel};
pub use llm::{ApiFlavor, ChatMessage, Completion, CompletionRequest, LlmClient, ProviderConfig};
