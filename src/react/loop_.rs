//! 对话主循环（Conversation Driver）
//!
//! 调模型 -> 若无 tool_use 则结束 -> 否则追加模型原样回复、依次执行工具、追加工具结果轮 -> 下一轮。
//! 迭代数有上限（默认 5），到上限仍无纯文本回复则以 IterationLimitExceeded 失败。
//! 可选 event_tx：向 Web 等前端推送 StepUpdate / Thinking / ToolCall / Observation / MessageDone。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, LoopPhase, LoopState};
use crate::llm::{LlmClient, ModelResponse, TokenUsage};
use crate::memory::{ConversationTurn, Transcript};
use crate::react::LoopEvent;
use crate::tools::executor::content_preview;
use crate::tools::{ExecutionOutcome, ToolDispatcher};

/// 单次对话默认最大迭代数
pub const DEFAULT_MAX_ITERATIONS: usize = 5;
/// 单次模型调用默认超时
pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(120);
/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 循环成功结束的结果
#[derive(Debug)]
pub struct DriverOutcome {
    pub final_text: String,
    pub iterations: usize,
    pub transcript: Transcript,
    /// 各轮模型调用的 token 用量之和
    pub usage: TokenUsage,
}

fn send_event(tx: Option<&UnboundedSender<LoopEvent>>, ev: LoopEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

/// 对话驱动器：持有模型客户端与工具分发器，可多会话共享
pub struct ConversationDriver {
    llm: Arc<dyn LlmClient>,
    dispatcher: Arc<ToolDispatcher>,
    max_iterations: usize,
    model_timeout: Duration,
}

impl ConversationDriver {
    pub fn new(llm: Arc<dyn LlmClient>, dispatcher: Arc<ToolDispatcher>) -> Self {
        Self {
            llm,
            dispatcher,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            model_timeout: DEFAULT_MODEL_TIMEOUT,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    /// 执行循环（无事件推送、不可取消）
    pub async fn run(&self, initial_prompt: &str) -> Result<DriverOutcome, AgentError> {
        self.run_with(initial_prompt, None, CancellationToken::new()).await
    }

    /// 执行循环：可选事件推送，cancel_token 在每次调模型前检查，并与进行中的模型调用、工具批次竞争
    pub async fn run_with(
        &self,
        initial_prompt: &str,
        event_tx: Option<&UnboundedSender<LoopEvent>>,
        cancel_token: CancellationToken,
    ) -> Result<DriverOutcome, AgentError> {
        let mut transcript = Transcript::new(initial_prompt);
        let mut state = LoopState::default();
        let mut usage = TokenUsage::default();
        let tools = self.dispatcher.advertisement();

        loop {
            if state.iterations() >= self.max_iterations {
                let err = AgentError::IterationLimitExceeded {
                    iterations: state.iterations(),
                };
                return Err(self.fail(&mut state, event_tx, err));
            }
            if cancel_token.is_cancelled() {
                return Err(self.fail(&mut state, event_tx, AgentError::Cancelled));
            }

            let step = state.begin_iteration();
            send_event(event_tx, LoopEvent::StepUpdate {
                step,
                max_steps: self.max_iterations,
            });
            send_event(event_tx, LoopEvent::Thinking);

            let response = match self.call_model(&transcript, &tools, &cancel_token).await {
                Ok(r) => r,
                Err(e) => return Err(self.fail(&mut state, event_tx, e)),
            };
            if let Some(u) = response.usage {
                usage.add(u);
            }

            let turn = response.into_turn();
            let requests = turn.tool_invocations();
            if requests.is_empty() {
                let final_text = turn.text();
                transcript.append(turn);
                state.transition(LoopPhase::Terminated);
                tracing::info!(
                    iterations = state.iterations(),
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "conversation finished"
                );
                send_event(event_tx, LoopEvent::MessageDone {
                    text: final_text.clone(),
                    iterations: state.iterations(),
                });
                return Ok(DriverOutcome {
                    final_text,
                    iterations: state.iterations(),
                    transcript,
                    usage,
                });
            }

            // 模型的 tool_use 内容原样保留，供其后续轮次参考
            transcript.append(turn);
            state.transition(LoopPhase::ExecutingTools);
            tracing::info!(step, tools = requests.len(), "executing tool calls");
            for req in &requests {
                send_event(event_tx, LoopEvent::ToolCall {
                    id: req.id.clone(),
                    tool: req.name.clone(),
                    args: req.input.clone(),
                });
            }

            let dispatch = self
                .dispatcher
                .dispatch_with(&requests, |req, outcome| {
                    match outcome {
                        ExecutionOutcome::FallbackSubstituted(_) => {
                            send_event(event_tx, LoopEvent::FallbackSubstituted {
                                tool: req.name.clone(),
                            });
                        }
                        ExecutionOutcome::Failed { reason, .. } => {
                            send_event(event_tx, LoopEvent::ToolFailure {
                                tool: req.name.clone(),
                                reason: reason.clone(),
                            });
                        }
                        ExecutionOutcome::Live(_) => {}
                    }
                    send_event(event_tx, LoopEvent::Observation {
                        tool: req.name.clone(),
                        preview: content_preview(&outcome.result().content, OBSERVATION_PREVIEW_CHARS),
                    });
                });
            let results = tokio::select! {
                _ = cancel_token.cancelled() => {
                    return Err(self.fail(&mut state, event_tx, AgentError::Cancelled));
                }
                results = dispatch => results,
            };

            transcript.append(ConversationTurn::tool_results(results));
            state.transition(LoopPhase::AwaitingModel);
        }
    }

    async fn call_model(
        &self,
        transcript: &Transcript,
        tools: &[serde_json::Value],
        cancel_token: &CancellationToken,
    ) -> Result<ModelResponse, AgentError> {
        let call = tokio::time::timeout(self.model_timeout, self.llm.complete(transcript.turns(), tools));
        tokio::select! {
            _ = cancel_token.cancelled() => Err(AgentError::Cancelled),
            result = call => match result {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => Err(AgentError::LlmError(e)),
                Err(_) => Err(AgentError::Timeout(format!(
                    "model call exceeded {}s",
                    self.model_timeout.as_secs_f64()
                ))),
            },
        }
    }

    fn fail(
        &self,
        state: &mut LoopState,
        event_tx: Option<&UnboundedSender<LoopEvent>>,
        err: AgentError,
    ) -> AgentError {
        state.transition(LoopPhase::Failed);
        tracing::warn!(iterations = state.iterations(), error = %err, "conversation failed");
        send_event(event_tx, LoopEvent::Error {
            text: err.to_string(),
        });
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, ScriptedLlmClient};
    use crate::memory::{ContentBlock, ContentSegment, Role};
    use crate::tools::{Tool, ToolDefinition, ToolExecutor, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct OkTool(ToolDefinition);

    #[async_trait]
    impl Tool for OkTool {
        fn definition(&self) -> &ToolDefinition {
            &self.0
        }

        async fn execute(&self, _args: Value) -> Result<Vec<ContentSegment>, String> {
            Ok(vec![ContentSegment::text(format!("{} ok", self.0.name))])
        }
    }

    fn dispatcher() -> Arc<ToolDispatcher> {
        let mut registry = ToolRegistry::new();
        registry.register(OkTool(ToolDefinition::new("lookup", "test lookup")));
        Arc::new(ToolDispatcher::new(ToolExecutor::new(registry, 5)))
    }

    fn tool_use(id: &str, name: &str) -> ContentBlock {
        ContentBlock::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input: json!({}),
        }
    }

    fn text(s: &str) -> ModelResponse {
        ModelResponse::new(vec![ContentBlock::text(s)])
    }

    #[tokio::test]
    async fn test_plain_answer_terminates_after_one_iteration() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(text("hello"))]));
        let driver = ConversationDriver::new(llm.clone(), dispatcher());
        let out = driver.run("hi").await.unwrap();
        assert_eq!(out.final_text, "hello");
        assert_eq!(out.iterations, 1);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_tool_round_then_answer() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(ModelResponse::new(vec![
                ContentBlock::text("checking"),
                tool_use("t1", "lookup"),
                tool_use("t2", "lookup"),
            ])),
            Ok(text("done")),
        ]));
        let driver = ConversationDriver::new(llm.clone(), dispatcher());
        let out = driver.run("go").await.unwrap();
        assert_eq!(out.iterations, 2);

        // 第二次调模型时看到：user prompt、模型原样回复、工具结果轮
        let seen = llm.seen();
        let second = &seen[1];
        assert_eq!(second.len(), 3);
        assert_eq!(second[1].role, Role::Assistant);
        assert_eq!(second[1].content.len(), 3);
        assert_eq!(second[2].role, Role::User);
        let ids: Vec<&str> = second[2]
            .content
            .iter()
            .map(|b| match b {
                ContentBlock::ToolResult { tool_use_id, .. } => tool_use_id.as_str(),
                _ => panic!("expected tool_result"),
            })
            .collect();
        assert_eq!(ids, vec!["t1", "t2"]);
        assert_eq!(out.transcript.len(), 4);
        assert!(out.usage.is_empty());
    }

    #[tokio::test]
    async fn test_usage_summed_across_iterations() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(ModelResponse::new(vec![tool_use("t1", "lookup")]).with_usage(TokenUsage::new(120, 30))),
            Ok(text("done").with_usage(TokenUsage::new(200, 45))),
        ]));
        let driver = ConversationDriver::new(llm, dispatcher());
        let out = driver.run("go").await.unwrap();
        assert_eq!(out.iterations, 2);
        assert_eq!(out.usage, TokenUsage::new(320, 75));
    }

    #[tokio::test]
    async fn test_iteration_cap() {
        let llm = Arc::new(ScriptedLlmClient::repeating(ModelResponse::new(vec![tool_use(
            "t", "lookup",
        )])));
        let driver = ConversationDriver::new(llm.clone(), dispatcher()).with_max_iterations(3);
        let err = driver.run("loop forever").await.unwrap_err();
        assert!(matches!(err, AgentError::IterationLimitExceeded { iterations: 3 }));
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_model_error_is_terminal() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Err(LlmError::Auth("bad key".into()))]));
        let driver = ConversationDriver::new(llm.clone(), dispatcher());
        let err = driver.run("hi").await.unwrap_err();
        assert!(matches!(err, AgentError::LlmError(LlmError::Auth(_))));
        assert_eq!(llm.calls(), 1);
    }

    struct SlowLlm;

    #[async_trait]
    impl LlmClient for SlowLlm {
        async fn complete(
            &self,
            _turns: &[ConversationTurn],
            _tools: &[Value],
        ) -> Result<ModelResponse, LlmError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(text("too late"))
        }
    }

    #[tokio::test]
    async fn test_model_timeout() {
        let driver = ConversationDriver::new(Arc::new(SlowLlm), dispatcher())
            .with_model_timeout(Duration::from_millis(20));
        let err = driver.run("hi").await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_model_call() {
        let driver = ConversationDriver::new(Arc::new(SlowLlm), dispatcher());
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = driver.run_with("hi", None, token).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }

    struct HangingTool(ToolDefinition);

    #[async_trait]
    impl Tool for HangingTool {
        fn definition(&self) -> &ToolDefinition {
            &self.0
        }

        async fn execute(&self, _args: Value) -> Result<Vec<ContentSegment>, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_tool_batch() {
        let mut registry = ToolRegistry::new();
        registry.register(HangingTool(ToolDefinition::new("slow", "never returns in time")));
        let dispatcher = Arc::new(ToolDispatcher::new(ToolExecutor::new(registry, 30)));
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(ModelResponse::new(vec![tool_use(
            "t1", "slow",
        )]))]));
        let driver = ConversationDriver::new(llm.clone(), dispatcher);
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = driver.run_with("go", None, token).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_events_are_emitted() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(ModelResponse::new(vec![tool_use("t1", "lookup"), tool_use("t2", "missing")])),
            Ok(text("fin")),
        ]));
        let driver = ConversationDriver::new(llm, dispatcher());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        driver
            .run_with("go", Some(&tx), CancellationToken::new())
            .await
            .unwrap();
        drop(tx);
        let mut kinds = Vec::new();
        while let Some(ev) = rx.recv().await {
            kinds.push(serde_json::to_value(&ev).unwrap()["type"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds.first().map(String::as_str), Some("step_update"));
        assert_eq!(kinds.iter().filter(|k| *k == "tool_call").count(), 2);
        assert!(kinds.contains(&"tool_failure".to_string()));
        assert_eq!(kinds.last().map(String::as_str), Some("message_done"));
    }
}
