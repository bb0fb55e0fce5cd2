//! LLM 客户端抽象
//!
//! 所有后端（Anthropic Messages API / Scripted Mock）实现 LlmClient：
//! 输入完整对话与工具清单，返回模型这一轮的内容块（文本和/或 tool_use）。

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::memory::{ContentBlock, ConversationTurn};

/// 模型调用错误
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

/// token 用量（Messages API 的 usage 字段）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

/// 模型一轮的回复
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    /// 后端未上报时为 None（Mock / Scripted）
    pub usage: Option<TokenUsage>,
}

impl ModelResponse {
    pub fn new(content: Vec<ContentBlock>) -> Self {
        Self {
            content,
            stop_reason: None,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn into_turn(self) -> ConversationTurn {
        ConversationTurn::assistant(self.content)
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成：turns 为完整 transcript，tools 为工具广告（每轮都下发全量）
    async fn complete(
        &self,
        turns: &[ConversationTurn],
        tools: &[Value],
    ) -> Result<ModelResponse, LlmError>;
}
