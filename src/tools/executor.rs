//! 工具执行器
//!
//! 持有 ToolRegistry、降级数据与超时，execute(tool_name, args) 先走实时调用；
//! 失败时交给 RecoveryEngine 分类：限流/不可用 -> 降级数据（FallbackSubstituted），其它 -> Failed。
//! 每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::memory::{ContentSegment, ToolResult};
use crate::tools::{FallbackProvider, ToolRegistry};

/// 单次工具执行的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Live(ToolResult),
    FallbackSubstituted(ToolResult),
    Failed { result: ToolResult, reason: String },
}

impl ExecutionOutcome {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Live(_) => "live",
            Self::FallbackSubstituted(_) => "fallback",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn result(&self) -> &ToolResult {
        match self {
            Self::Live(r) | Self::FallbackSubstituted(r) => r,
            Self::Failed { result, .. } => result,
        }
    }

    pub fn into_result(self) -> ToolResult {
        match self {
            Self::Live(r) | Self::FallbackSubstituted(r) => r,
            Self::Failed { result, .. } => result,
        }
    }
}

/// 工具执行器：实时调用 + 超时 + 失败分类 + 降级
pub struct ToolExecutor {
    registry: ToolRegistry,
    fallback: FallbackProvider,
    recovery: RecoveryEngine,
    timeout: Duration,
    /// 跳过实时调用，全部使用降级数据（离线模式）
    force_fallback: bool,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            fallback: FallbackProvider::new(),
            recovery: RecoveryEngine::new(),
            timeout: Duration::from_secs(timeout_secs),
            force_fallback: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_forced_fallback(mut self, force: bool) -> Self {
        self.force_fallback = force;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 执行指定工具；id 为调用的关联 id，原样写入结果
    pub async fn execute(&self, id: &str, tool_name: &str, args: Value) -> ExecutionOutcome {
        let start = Instant::now();
        let args_preview = args_preview(&args);

        let outcome = if self.force_fallback {
            self.substitute_or_fail(id, tool_name, &args, "live backend disabled")
        } else {
            let live = timeout(self.timeout, self.registry.execute(tool_name, args.clone())).await;
            match live {
                Ok(Ok(content)) => ExecutionOutcome::Live(ToolResult::ok(id, content)),
                Ok(Err(e)) => self.recover(id, tool_name, &args, e),
                Err(_) => self.recover(
                    id,
                    tool_name,
                    &args,
                    format!("Tool timeout after {}s", self.timeout.as_secs_f64()),
                ),
            }
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": !matches!(outcome, ExecutionOutcome::Failed { .. }),
            "outcome": outcome.tag(),
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
        outcome
    }

    fn recover(&self, id: &str, tool_name: &str, args: &Value, failure: String) -> ExecutionOutcome {
        match self.recovery.handle_tool_failure(tool_name, &failure) {
            RecoveryAction::SubstituteFallback => {
                tracing::warn!(tool = %tool_name, error = %failure, "live tool unavailable, substituting fallback data");
                self.substitute_or_fail(id, tool_name, args, &failure)
            }
            RecoveryAction::ReportToModel(message) => {
                tracing::warn!(tool = %tool_name, error = %failure, "tool failed");
                ExecutionOutcome::Failed {
                    result: ToolResult::error(id, message),
                    reason: failure,
                }
            }
        }
    }

    fn substitute_or_fail(&self, id: &str, tool_name: &str, args: &Value, failure: &str) -> ExecutionOutcome {
        match self.fallback.substitute(tool_name, args) {
            Some(content) => ExecutionOutcome::FallbackSubstituted(ToolResult::ok(id, content)),
            None => {
                let detail = format!("{tool_name} has no fallback data: {failure}");
                let err = if self.recovery.is_rate_limited(failure) {
                    AgentError::RateLimited(detail)
                } else {
                    AgentError::ToolExecutionFailed(detail)
                };
                ExecutionOutcome::Failed {
                    result: ToolResult::error(id, err.to_string()),
                    reason: failure.to_string(),
                }
            }
        }
    }
}

/// 内容片段的预览文本
pub fn content_preview(content: &[ContentSegment], max_chars: usize) -> String {
    let s: String = content.iter().map(ContentSegment::as_text).collect::<Vec<_>>().join("\n");
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
