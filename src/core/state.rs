//! 循环状态机
//!
//! AwaitingModel -> (无工具调用) -> Terminated
//! AwaitingModel -> (有工具调用) -> ExecutingTools -> AwaitingModel
//! 任意非终止状态 -> Failed

use serde::Serialize;

/// Conversation Driver 的阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    AwaitingModel,
    ExecutingTools,
    Terminated,
    Failed,
}

impl LoopPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }

    pub fn can_transition_to(self, next: LoopPhase) -> bool {
        use LoopPhase::*;
        match (self, next) {
            (AwaitingModel, Terminated | ExecutingTools) => true,
            (ExecutingTools, AwaitingModel) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// 当前阶段 + 已消耗迭代数，迭代数只增不减
#[derive(Clone, Debug)]
pub struct LoopState {
    phase: LoopPhase,
    iterations: usize,
}

impl Default for LoopState {
    fn default() -> Self {
        Self {
            phase: LoopPhase::AwaitingModel,
            iterations: 0,
        }
    }
}

impl LoopState {
    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn begin_iteration(&mut self) -> usize {
        self.iterations += 1;
        self.iterations
    }

    pub fn transition(&mut self, next: LoopPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "invalid loop transition {:?} -> {:?}",
            self.phase,
            next
        );
        tracing::debug!(from = ?self.phase, to = ?next, iterations = self.iterations, "loop phase");
        self.phase = next;
    }
}
