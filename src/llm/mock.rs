//! Mock LLM 客户端（用于测试与离线演示，无需 API）
//!
//! - `MockLlmClient`：根据 transcript 推进固定流程 search -> codegen -> 最终回复（含 tsx 代码块）。
//! - `ScriptedLlmClient`：按预设脚本依次返回回复，并记录每次收到的 transcript，便于断言。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{LlmClient, LlmError, ModelResponse};
use crate::memory::{ContentBlock, ConversationTurn, Role};

/// 组件名推断时忽略的词
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "design", "generate", "create", "make", "build", "me", "please", "component",
    "from", "figma", "for", "file", "of", "in", "react", "with", "ads", "components",
];

/// 从自然语言需求推断 PascalCase 组件名，如 "design a primary button" -> "PrimaryButton"
pub fn component_name_from_prompt(prompt: &str) -> String {
    let words: Vec<String> = prompt
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect();
    let tail = &words[words.len().saturating_sub(2)..];
    let name: String = tail
        .iter()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        "Component".to_string()
    } else {
        name
    }
}

/// Mock 客户端：无状态，完全由 transcript 决定下一步
#[derive(Debug, Default)]
pub struct MockLlmClient;

fn last_tool_result(turns: &[ConversationTurn]) -> Option<(String, bool)> {
    turns.iter().rev().find_map(|t| {
        t.content.iter().find_map(|b| match b {
            ContentBlock::ToolResult {
                content, is_error, ..
            } => Some((
                content.iter().map(|s| s.as_text()).collect::<Vec<_>>().join("\n"),
                *is_error,
            )),
            _ => None,
        })
    })
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        turns: &[ConversationTurn],
        _tools: &[Value],
    ) -> Result<ModelResponse, LlmError> {
        let prompt = turns
            .iter()
            .find(|t| t.role == Role::User)
            .map(|t| t.text())
            .unwrap_or_default();
        let rounds = turns
            .iter()
            .filter(|t| t.role == Role::Assistant && !t.tool_invocations().is_empty())
            .count();

        let response = match (rounds, last_tool_result(turns)) {
            (_, Some((text, true))) => ModelResponse::new(vec![ContentBlock::text(format!(
                "The design tools reported an error, so I could not finish the component: {text}"
            ))]),
            (0, _) => ModelResponse::new(vec![
                ContentBlock::text("Let me search the design file first."),
                ContentBlock::ToolUse {
                    id: "toolu_mock_1".to_string(),
                    name: "figma_search_components".to_string(),
                    input: json!({ "query": prompt }),
                },
            ]),
            (1, last) => {
                let node_id = last
                    .and_then(|(text, _)| serde_json::from_str::<Value>(&text).ok())
                    .and_then(|v| v["components"][0]["id"].as_str().map(String::from));
                let mut input = json!({ "componentName": component_name_from_prompt(&prompt) });
                if let Some(id) = node_id {
                    input["nodeId"] = json!(id);
                }
                ModelResponse::new(vec![ContentBlock::ToolUse {
                    id: "toolu_mock_2".to_string(),
                    name: "codegen_react_component".to_string(),
                    input,
                }])
            }
            (_, last) => {
                let code = last
                    .and_then(|(text, _)| serde_json::from_str::<Value>(&text).ok())
                    .and_then(|v| v["code"].as_str().map(String::from))
                    .unwrap_or_default();
                ModelResponse::new(vec![ContentBlock::text(format!(
                    "Here is the generated component:\n\n```tsx\n{code}\n```"
                ))])
            }
        };
        Ok(response)
    }
}

/// 脚本客户端：依次弹出预设回复；脚本耗尽后重复 `repeat`（若设置），否则返回 Api 错误
#[derive(Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<ModelResponse, LlmError>>>,
    repeat: Option<ModelResponse>,
    seen: Mutex<Vec<Vec<ConversationTurn>>>,
}

impl ScriptedLlmClient {
    pub fn new(script: Vec<Result<ModelResponse, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// 永远返回同一回复（如永远请求工具）
    pub fn repeating(response: ModelResponse) -> Self {
        Self {
            repeat: Some(response),
            ..Self::default()
        }
    }

    /// 每次调用时收到的 transcript 快照
    pub fn seen(&self) -> Vec<Vec<ConversationTurn>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(
        &self,
        turns: &[ConversationTurn],
        _tools: &[Value],
    ) -> Result<ModelResponse, LlmError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(turns.to_vec());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match (next, &self.repeat) {
            (Some(r), _) => r,
            (None, Some(r)) => Ok(r.clone()),
            (None, None) => Err(LlmError::Api {
                status: 500,
                message: "script exhausted".to_string(),
            }),
        }
    }
}
