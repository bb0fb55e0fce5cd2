//! Headless Agent 运行时
//!
//! 供 HTTP 等前端调用的无界面逻辑：create_agent_components 按配置构建模型客户端、Figma 工具、
//! 执行器与对话驱动器；process_prompt 对单条 prompt 跑完整循环并提取代码产物。

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::artifact::{ArtifactExtractor, CodeArtifact, FencedBlockExtractor};
use crate::config::AppConfig;
use crate::core::AgentError;
use crate::llm::{AnthropicClient, LlmClient, MockLlmClient, TokenUsage};
use crate::react::{ConversationDriver, LoopEvent};
use crate::tools::{
    figma_connection, CodegenTool, GetComponentTool, SearchComponentsTool, ToolDispatcher,
    ToolExecutor, ToolRegistry,
};

/// 默认系统提示：引导模型先搜索设计组件，再生成代码
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a design-to-code assistant. \
Use figma_search_components to find matching design components, figma_get_component to inspect one, \
and codegen_react_component to generate a React + TypeScript component. \
Reply with the final component code in a single ```tsx code block.";

/// 预构建的 Agent 组件，可多请求共享
pub struct AgentComponents {
    pub driver: ConversationDriver,
    pub extractor: Box<dyn ArtifactExtractor>,
}

impl AgentComponents {
    pub fn new(driver: ConversationDriver) -> Self {
        Self {
            driver,
            extractor: Box::new(FencedBlockExtractor),
        }
    }

    pub fn with_extractor(mut self, extractor: impl ArtifactExtractor + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }
}

/// 单条 prompt 的处理结果
#[derive(Debug, Clone, Serialize)]
pub struct PromptReply {
    pub response: String,
    pub iterations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<CodeArtifact>,
    /// 后端未上报用量时省略
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// 按配置选择模型后端：anthropic / mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Result<Arc<dyn LlmClient>, AgentError> {
    match cfg.llm.provider.as_str() {
        "anthropic" => {
            let system_prompt = cfg
                .llm
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
            let client = AnthropicClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                cfg.llm.api_key.as_deref(),
                cfg.llm.max_tokens,
            )
            .with_system_prompt(system_prompt);
            Ok(Arc::new(client))
        }
        "mock" => Ok(Arc::new(MockLlmClient)),
        other => Err(AgentError::ConfigError(format!(
            "unknown llm provider: {} (expected anthropic or mock)",
            other
        ))),
    }
}

/// 注册三个设计工具，共享同一个 Figma 连接
pub fn create_tool_registry(cfg: &AppConfig) -> ToolRegistry {
    let figma = &cfg.tools.figma;
    let connection = figma_connection(
        figma.api_base.as_deref(),
        figma.token.as_deref(),
        figma.connect.backoff(),
    );
    let file_key = figma.file_key.as_deref();

    let mut tools = ToolRegistry::new();
    tools.register(SearchComponentsTool::new(connection.clone(), file_key));
    tools.register(GetComponentTool::new(connection.clone(), file_key));
    tools.register(CodegenTool::new(connection, file_key));
    tools
}

/// 创建 Agent 组件：模型客户端、工具、执行器（超时 / 强制降级）、分发器与驱动器
pub fn create_agent_components(cfg: &AppConfig) -> Result<AgentComponents, AgentError> {
    let llm = create_llm_from_config(cfg)?;
    let executor = ToolExecutor::new(create_tool_registry(cfg), cfg.tools.tool_timeout_secs)
        .with_forced_fallback(cfg.tools.fallback.force);
    let dispatcher = Arc::new(ToolDispatcher::new(executor));
    let driver = ConversationDriver::new(llm, dispatcher)
        .with_max_iterations(cfg.agent.max_iterations)
        .with_model_timeout(Duration::from_secs(cfg.llm.request_timeout_secs));

    tracing::info!(
        provider = %cfg.llm.provider,
        model = %cfg.llm.model,
        max_iterations = cfg.agent.max_iterations,
        forced_fallback = cfg.tools.fallback.force,
        "agent components ready"
    );
    Ok(AgentComponents::new(driver))
}

fn validate_prompt(prompt: &str) -> Result<&str, AgentError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(AgentError::Validation("Prompt is required".to_string()));
    }
    Ok(prompt)
}

/// 处理单条 prompt：校验 -> 跑循环 -> 提取代码产物
pub async fn process_prompt(components: &AgentComponents, prompt: &str) -> Result<PromptReply, AgentError> {
    process_prompt_stream(components, prompt, None, CancellationToken::new()).await
}

/// 同 process_prompt，可推送过程事件、可取消
pub async fn process_prompt_stream(
    components: &AgentComponents,
    prompt: &str,
    event_tx: Option<&mpsc::UnboundedSender<LoopEvent>>,
    cancel_token: CancellationToken,
) -> Result<PromptReply, AgentError> {
    let prompt = validate_prompt(prompt)?;
    let outcome = components.driver.run_with(prompt, event_tx, cancel_token).await?;
    let artifact = components.extractor.extract(&outcome.final_text);
    Ok(PromptReply {
        response: outcome.final_text,
        iterations: outcome.iterations,
        artifact,
        usage: (!outcome.usage.is_empty()).then_some(outcome.usage),
    })
}
