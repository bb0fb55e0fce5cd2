//! Agent 错误类型与恢复动作
//!
//! 工具级错误（未知工具、执行失败、限流）在本地恢复并回写给模型；
//! 循环级错误（步数耗尽、模型调用失败、超时、取消）为终止性错误，直接返回调用方。

use thiserror::Error;

use crate::llm::LlmError;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 请求校验失败（如 prompt 为空），在调用模型之前拒绝
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Iteration limit exceeded after {iterations} iterations")]
    IterationLimitExceeded { iterations: usize },

    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    /// 失败时已消耗的迭代数（仅步数耗尽时有意义），供 HTTP 错误体使用
    pub fn iterations(&self) -> Option<usize> {
        match self {
            Self::IterationLimitExceeded { iterations } => Some(*iterations),
            _ => None,
        }
    }

    /// 调用方的错误（4xx）还是服务端错误（5xx）
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// 恢复引擎对一次工具失败给出的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 限流 / 配额：用确定性降级数据替代，对模型透明
    SubstituteFallback,
    /// 其它失败：作为工具错误结果回写给模型，由模型自行调整
    ReportToModel(String),
}
