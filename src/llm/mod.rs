//! LLM 层：客户端抽象与实现（Anthropic Messages API / Mock / Scripted）

pub mod anthropic;
pub mod mock;
pub mod traits;

pub use anthropic::AnthropicClient;
pub use mock::{component_name_from_prompt, MockLlmClient, ScriptedLlmClient};
pub use traits::{LlmClient, LlmError, ModelResponse, TokenUsage};
