//! 记忆层：对话记录（只追加的 transcript 与内容块）

pub mod conversation;

pub use conversation::{
    ContentBlock, ContentSegment, ConversationTurn, Role, ToolInvocationRequest, ToolResult,
    Transcript,
};
