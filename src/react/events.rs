//! 循环过程事件：用于流式/SSE 展示步数、模型调用、工具调用、降级与最终回复

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// 迭代数更新（当前第几轮）
    StepUpdate { step: usize, max_steps: usize },
    /// 正在调用模型
    Thinking,
    /// 模型请求调用工具
    ToolCall {
        id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation { tool: String, preview: String },
    /// 实时调用不可用，已替换为降级数据
    FallbackSubstituted { tool: String },
    /// 工具执行失败（已作为错误结果回写给模型）
    ToolFailure { tool: String, reason: String },
    /// 最终回复
    MessageDone { text: String, iterations: usize },
    /// 错误
    Error { text: String },
}
