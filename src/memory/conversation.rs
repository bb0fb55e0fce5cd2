//! 对话记录（Transcript）
//!
//! 与模型交换的消息结构：每一轮（turn）由角色与有序的内容块组成，内容块为 text / tool_use / tool_result。
//! Transcript 只追加、不修改、不删除，完整保留审计轨迹，模型也能看到自己之前的工具调用。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 消息角色（与 Messages API 一致）：user 为请求方，assistant 为模型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// 工具结果中的单个内容片段
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentSegment {
    Text { text: String },
}

impl ContentSegment {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> &str {
        match self {
            Self::Text { text } => text,
        }
    }
}

/// 一轮中的内容块
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Vec<ContentSegment>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// 模型发起的一次工具调用请求（从 tool_use 块解析而来）
#[derive(Clone, Debug, PartialEq)]
pub struct ToolInvocationRequest {
    /// 关联 id，同一轮内唯一
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// 工具结果：回显关联 id，按序的内容片段，错误标记
#[derive(Clone, Debug, PartialEq)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: Vec<ContentSegment>,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(tool_use_id: impl Into<String>, content: Vec<ContentSegment>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content,
            is_error: false,
        }
    }

    pub fn error(tool_use_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: vec![ContentSegment::text(message)],
            is_error: true,
        }
    }

    /// 全部文本片段拼接（日志预览、测试断言用）
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(ContentSegment::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn into_block(self) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: self.tool_use_id,
            content: self.content,
            is_error: self.is_error,
        }
    }
}

/// 对话中的一轮
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// 由 Driver 插入的工具结果轮：每个结果一个 tool_result 块，顺序与请求一致
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::User,
            content: results.into_iter().map(ToolResult::into_block).collect(),
        }
    }

    /// 本轮中所有 tool_use 块，按出现顺序
    pub fn tool_invocations(&self) -> Vec<ToolInvocationRequest> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some(ToolInvocationRequest {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// 所有 text 块以换行拼接
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn is_tool_result_turn(&self) -> bool {
        self.role == Role::User
            && !self.content.is_empty()
            && self
                .content
                .iter()
                .all(|b| matches!(b, ContentBlock::ToolResult { .. }))
    }
}

/// 只追加的对话记录
#[derive(Clone, Debug, Default)]
pub struct Transcript {
    turns: Vec<ConversationTurn>,
}

impl Transcript {
    pub fn new(initial_prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![ConversationTurn::user(initial_prompt)],
        }
    }

    /// 追加一轮。user 轮之后只能接 assistant 轮，唯一例外是 Driver 插入的纯工具结果轮
    pub fn append(&mut self, turn: ConversationTurn) {
        debug_assert!(
            !matches!(self.turns.last(), Some(last) if last.role == Role::User && turn.role == Role::User)
                || turn.is_tool_result_turn(),
            "consecutive user turns in transcript"
        );
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
