//! designloop 入口：初始化日志、加载配置、构建 Agent 组件并启动 HTTP 服务。
//!
//! 可选参数：配置文件路径（覆盖 config/default.toml 中的键）。

use std::path::PathBuf;

use anyhow::Context;
use designloop::{
    agent::create_agent_components,
    config::load_config,
    observability,
    web::{router, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    let components = create_agent_components(&cfg).context("Failed to create agent components")?;
    let app = router(AppState::new(components));

    let listener = tokio::net::TcpListener::bind(cfg.server.bind.as_str())
        .await
        .with_context(|| format!("Failed to bind {}", cfg.server.bind))?;
    tracing::info!("designloop listening on http://{}", cfg.server.bind);
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
