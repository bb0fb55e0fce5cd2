//! Anthropic Messages API 客户端
//!
//! 直接用 reqwest 调用 /v1/messages（非流式）；transcript 的内容块与 API 的 text / tool_use / tool_result 一一对应，
//! 工具广告原样放入 `tools` 字段。

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::llm::{LlmClient, LlmError, ModelResponse, TokenUsage};
use crate::memory::{ContentBlock, ConversationTurn};

/// 默认 Messages API 地址
pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic 客户端：持有 HTTP Client、模型名与可选 system prompt
pub struct AnthropicClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    system_prompt: Option<String>,
}

impl AnthropicClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>, max_tokens: u32) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .filter(|k| !k.trim().is_empty());
        Self {
            client: Client::new(),
            base_url: base_url.unwrap_or(ANTHROPIC_API_URL).to_string(),
            api_key,
            model: model.to_string(),
            max_tokens,
            system_prompt: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.system_prompt = (!prompt.trim().is_empty()).then_some(prompt);
        self
    }

    fn build_request_body(&self, turns: &[ConversationTurn], tools: &[Value]) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": turns,
        });
        if let Some(sys) = &self.system_prompt {
            body["system"] = serde_json::json!(sys);
        }
        if !tools.is_empty() {
            body["tools"] = serde_json::json!(tools);
        }
        body
    }
}

/// 按 HTTP 状态码归类错误
pub(crate) fn parse_http_error(status: u16, body: &str) -> LlmError {
    match status {
        401 => LlmError::Auth("Invalid API key".to_string()),
        403 => LlmError::Auth("Access denied".to_string()),
        429 => LlmError::RateLimited(body.to_string()),
        _ => LlmError::Api {
            status,
            message: body.to_string(),
        },
    }
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<ClaudeUsage>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// thinking 等与循环无关的块
    #[serde(other)]
    Other,
}

fn parse_response(response: ClaudeResponse) -> ModelResponse {
    let content = response
        .content
        .into_iter()
        .filter_map(|block| match block {
            ResponseBlock::Text { text } => Some(ContentBlock::Text { text }),
            ResponseBlock::ToolUse { id, name, input } => {
                Some(ContentBlock::ToolUse { id, name, input })
            }
            ResponseBlock::Other => None,
        })
        .collect();
    ModelResponse {
        content,
        stop_reason: response.stop_reason,
        usage: response
            .usage
            .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens)),
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(
        &self,
        turns: &[ConversationTurn],
        tools: &[Value],
    ) -> Result<ModelResponse, LlmError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::Auth("ANTHROPIC_API_KEY is not set".to_string()))?;

        let body = self.build_request_body(turns, tools);
        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body_text = response
            .text()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        if status != 200 {
            return Err(parse_http_error(status, &body_text));
        }

        let parsed: ClaudeResponse = serde_json::from_str(&body_text)
            .map_err(|e| LlmError::Parse(format!("Failed to parse response: {e}")))?;
        Ok(parse_response(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body_uses_wire_blocks() {
        let client = AnthropicClient::new(None, "claude-test", Some("k"), 1024)
            .with_system_prompt("be brief");
        let turns = vec![
            ConversationTurn::user("design a button"),
            ConversationTurn::assistant(vec![ContentBlock::ToolUse {
                id: "toolu_1".into(),
                name: "figma_search_components".into(),
                input: json!({"query": "button"}),
            }]),
        ];
        let tools = vec![json!({"name": "figma_search_components"})];
        let body = client.build_request_body(&turns, &tools);

        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["type"], "text");
        assert_eq!(body["messages"][1]["content"][0]["type"], "tool_use");
        assert_eq!(body["tools"][0]["name"], "figma_search_components");
    }

    #[test]
    fn test_parse_response_skips_unknown_blocks() {
        let raw = json!({
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "Searching"},
                {"type": "tool_use", "id": "toolu_9", "name": "figma_get_component", "input": {"nodeId": "1:2"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        });
        let parsed: ClaudeResponse = serde_json::from_value(raw).unwrap();
        let resp = parse_response(parsed);
        assert_eq!(resp.content.len(), 2);
        assert_eq!(resp.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(resp.usage, Some(TokenUsage::new(10, 5)));
        assert_eq!(resp.into_turn().tool_invocations()[0].id, "toolu_9");
    }

    #[test]
    fn test_parse_response_without_usage() {
        let raw = json!({"content": [{"type": "text", "text": "hi"}], "stop_reason": "end_turn"});
        let parsed: ClaudeResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parse_response(parsed).usage, None);
    }

    #[test]
    fn test_parse_http_error_by_status() {
        assert!(matches!(parse_http_error(401, ""), LlmError::Auth(_)));
        assert!(matches!(parse_http_error(429, "slow down"), LlmError::RateLimited(_)));
        assert!(matches!(
            parse_http_error(529, "overloaded"),
            LlmError::Api { status: 529, .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_before_request() {
        let mut client = AnthropicClient::new(Some("http://127.0.0.1:9"), "m", None, 16);
        client.api_key = None;
        let err = client
            .complete(&[ConversationTurn::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Auth(_)));
    }
}
