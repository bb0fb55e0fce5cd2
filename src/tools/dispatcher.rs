//! 工具分发
//!
//! 把一批 ToolInvocationRequest 依次（不并发）交给 ToolExecutor，返回一一对应、顺序一致的 ToolResult。
//! 未知工具不会让整批失败，而是得到一个 is_error 的结果，说明可用工具列表。

use serde_json::Value;

use crate::core::AgentError;
use crate::memory::{ToolInvocationRequest, ToolResult};
use crate::tools::{ExecutionOutcome, ToolExecutor};

/// 工具分发器
pub struct ToolDispatcher {
    executor: ToolExecutor,
}

impl ToolDispatcher {
    pub fn new(executor: ToolExecutor) -> Self {
        Self { executor }
    }

    /// 每轮下发给模型的完整工具广告
    pub fn advertisement(&self) -> Vec<Value> {
        self.executor.registry().advertisement()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.executor.registry().tool_names()
    }

    /// 执行单个请求，返回执行结果（含标签）
    pub async fn dispatch_one(&self, request: &ToolInvocationRequest) -> ExecutionOutcome {
        let Some(tool) = self.executor.registry().get(&request.name) else {
            tracing::warn!(tool = %request.name, id = %request.id, "model requested unknown tool");
            let message = AgentError::UnknownTool(format!(
                "{}. Available tools: {}",
                request.name,
                self.tool_names().join(", ")
            ));
            return ExecutionOutcome::Failed {
                result: ToolResult::error(&request.id, message.to_string()),
                reason: AgentError::UnknownTool(request.name.clone()).to_string(),
            };
        };
        let args = tool.definition().apply_defaults(request.input.clone());
        self.executor.execute(&request.id, &request.name, args).await
    }

    /// 按请求顺序依次执行，结果与请求一一对应
    pub async fn dispatch(&self, requests: &[ToolInvocationRequest]) -> Vec<ToolResult> {
        self.dispatch_with(requests, |_, _| {}).await
    }

    /// 同 dispatch，每个请求完成后回调一次（用于推送过程事件）
    pub async fn dispatch_with<F>(&self, requests: &[ToolInvocationRequest], mut on_outcome: F) -> Vec<ToolResult>
    where
        F: FnMut(&ToolInvocationRequest, &ExecutionOutcome),
    {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            let outcome = self.dispatch_one(request).await;
            tracing::info!(tool = %request.name, id = %request.id, outcome = outcome.tag(), "tool dispatched");
            on_outcome(request, &outcome);
            results.push(outcome.into_result());
        }
        results
    }
}
