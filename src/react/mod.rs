//! 认知层：对话主循环（Conversation Driver）与过程事件

pub mod events;
pub mod loop_;

pub use events::LoopEvent;
pub use loop_::{ConversationDriver, DriverOutcome, DEFAULT_MAX_ITERATIONS};
