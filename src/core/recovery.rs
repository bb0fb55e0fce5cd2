//! 错误恢复引擎
//!
//! 对工具失败文本做分类：命中限流/配额特征，或后端不可达 / 未配置时给出 SubstituteFallback，
//! 否则 ReportToModel（包括凭证被拒的 "Connection rejected"）。特征匹配不区分大小写。

use crate::core::{AgentError, RecoveryAction};

/// 限流 / 配额错误的文本特征
const RATE_LIMIT_SIGNATURES: &[&str] = &[
    "rate limit",
    "rate-limit",
    "ratelimit",
    "too many requests",
    "http 429",
    "status 429",
    "quota",
];

/// 后端不可达或未配置（由 ConnectionManager 的错误文本产生）
const UNAVAILABLE_SIGNATURES: &[&str] = &["backend unavailable", "backend not configured"];

/// 语义化错误恢复：将工具失败映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn is_rate_limited(&self, failure: &str) -> bool {
        let lower = failure.to_lowercase();
        RATE_LIMIT_SIGNATURES.iter().any(|s| lower.contains(s))
    }

    pub fn is_unavailable(&self, failure: &str) -> bool {
        let lower = failure.to_lowercase();
        UNAVAILABLE_SIGNATURES.iter().any(|s| lower.contains(s))
    }

    /// 根据工具失败描述返回建议的恢复动作
    pub fn handle_tool_failure(&self, tool: &str, failure: &str) -> RecoveryAction {
        if self.is_rate_limited(failure) || self.is_unavailable(failure) {
            RecoveryAction::SubstituteFallback
        } else {
            RecoveryAction::ReportToModel(
                AgentError::ToolExecutionFailed(format!("{tool}: {failure}")).to_string(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_rate_limit_signatures() {
        let engine = RecoveryEngine::new();
        for msg in [
            "Rate limit exceeded",
            "HTTP 429",
            "Too Many Requests",
            "monthly quota used up",
            "rate-limited by upstream",
        ] {
            assert_eq!(
                engine.handle_tool_failure("figma_search_components", msg),
                RecoveryAction::SubstituteFallback,
                "{msg}"
            );
        }
    }

    #[test]
    fn test_recovery_backend_unavailable() {
        let engine = RecoveryEngine::new();
        assert_eq!(
            engine.handle_tool_failure("figma_get_component", "Backend unavailable: gave up after 4 attempts"),
            RecoveryAction::SubstituteFallback
        );
        assert_eq!(
            engine.handle_tool_failure(
                "figma_search_components",
                "Backend not configured: no fileKey given and no default design file"
            ),
            RecoveryAction::SubstituteFallback
        );
        // 节点 id 中的 429 不算限流
        assert!(!engine.is_rate_limited("Node 429:12 not found"));
    }

    #[test]
    fn test_rejected_credentials_are_reported() {
        let engine = RecoveryEngine::new();
        let action = engine.handle_tool_failure(
            "figma_search_components",
            r#"Connection rejected: HTTP 403: {"err":"Invalid token"}"#,
        );
        match action {
            RecoveryAction::ReportToModel(msg) => {
                assert!(msg.starts_with("Tool execution failed: figma_search_components"));
                assert!(msg.contains("Invalid token"));
            }
            _ => panic!("Expected ReportToModel"),
        }
    }

    #[test]
    fn test_recovery_other_failures_reported() {
        let engine = RecoveryEngine::new();
        let action = engine.handle_tool_failure("figma_get_component", "HTTP 404: node not found");
        match action {
            RecoveryAction::ReportToModel(msg) => {
                assert!(msg.contains("figma_get_component"));
                assert!(msg.contains("node not found"));
            }
            _ => panic!("Expected ReportToModel"),
        }
    }
}
