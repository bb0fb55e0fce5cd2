//! 核心层：错误与恢复、循环状态机

pub mod error;
pub mod recovery;
pub mod state;

pub use error::{AgentError, RecoveryAction};
pub use recovery::RecoveryEngine;
pub use state::{LoopPhase, LoopState};
