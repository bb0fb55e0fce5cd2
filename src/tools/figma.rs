//! Figma 工具：组件搜索、节点读取、React 代码生成
//!
//! 三个工具共享同一个 ConnectionManager（Figma REST 会话），连接在首次调用时建立。
//! 返回内容均为格式化 JSON 文本；HTTP 错误以 "HTTP <status>: <body>" 形式返回，供恢复引擎分类。
//! 没有可用的设计文件（参数与配置都没给 fileKey）时报告 "Backend not configured"，不建连。

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::memory::ContentSegment;
use crate::tools::codegen::{render_component, sanitize_component_name, ComponentCategory, NodeStyle};
use crate::tools::connection::{BackoffConfig, ConnectFailure, ConnectionError, ConnectionManager, Connector};
use crate::tools::{ParamSpec, Tool, ToolDefinition};

pub const SEARCH_COMPONENTS: &str = "figma_search_components";
pub const GET_COMPONENT: &str = "figma_get_component";
pub const CODEGEN_REACT_COMPONENT: &str = "codegen_react_component";

pub const FIGMA_API_BASE: &str = "https://api.figma.com";

/// 已校验的 Figma REST 会话
pub struct FigmaSession {
    client: Client,
    api_base: String,
    token: String,
}

impl FigmaSession {
    /// 发送 GET，返回 (状态码, 响应体)；只有网络层失败才是 Err
    async fn get_raw(&self, path: &str, query: &[(&str, &str)]) -> Result<(u16, String), String> {
        let url = format!("{}{}", self.api_base.trim_end_matches('/'), path);
        let resp = self
            .client
            .get(&url)
            .header("X-Figma-Token", &self.token)
            .query(query)
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| format!("Read body: {e}"))?;
        Ok((status, body))
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, String> {
        let (status, body) = self.get_raw(path, query).await?;
        if !(200..300).contains(&status) {
            return Err(format!("HTTP {status}: {body}"));
        }
        serde_json::from_str(&body).map_err(|e| format!("Invalid JSON from Figma: {e}"))
    }
}

/// 建连校验结果分类：401/403 为永久拒绝，其余非 2xx 与网络错误可重试
fn classify_connect_status(status: u16, body: &str) -> Result<(), ConnectFailure> {
    match status {
        200..=299 => Ok(()),
        401 | 403 => Err(ConnectFailure::Permanent(format!("HTTP {status}: {body}"))),
        _ => Err(ConnectFailure::Retryable(format!("HTTP {status}: {body}"))),
    }
}

/// 建连：校验 token（GET /v1/me）
pub struct FigmaConnector {
    api_base: String,
    token: Option<String>,
}

impl FigmaConnector {
    pub fn new(api_base: Option<&str>, token: Option<&str>) -> Self {
        let token = token
            .map(String::from)
            .or_else(|| std::env::var("FIGMA_TOKEN").ok())
            .filter(|t| !t.trim().is_empty());
        Self {
            api_base: api_base.unwrap_or(FIGMA_API_BASE).to_string(),
            token,
        }
    }
}

#[async_trait]
impl Connector for FigmaConnector {
    type Handle = FigmaSession;

    async fn connect(&self) -> Result<FigmaSession, ConnectFailure> {
        let token = self
            .token
            .clone()
            .ok_or_else(|| ConnectFailure::Permanent("FIGMA_TOKEN is not set".to_string()))?;
        let session = FigmaSession {
            client: Client::new(),
            api_base: self.api_base.clone(),
            token,
        };
        let (status, body) = session
            .get_raw("/v1/me", &[])
            .await
            .map_err(ConnectFailure::Retryable)?;
        classify_connect_status(status, &body)?;
        Ok(session)
    }
}

pub type FigmaConnection = ConnectionManager<FigmaConnector>;

/// 构建共享连接
pub fn figma_connection(api_base: Option<&str>, token: Option<&str>, backoff: BackoffConfig) -> Arc<FigmaConnection> {
    Arc::new(ConnectionManager::new(FigmaConnector::new(api_base, token), backoff))
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    str_arg(args, key).ok_or_else(|| format!("Missing {key}"))
}

fn json_segment(v: &Value) -> Vec<ContentSegment> {
    vec![ContentSegment::text(
        serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()),
    )]
}

/// 设计文件 key；缺失说明后端未配置
fn file_key_arg(args: &Value) -> Result<&str, String> {
    str_arg(args, "fileKey").ok_or_else(|| {
        ConnectionError::NotConfigured("no fileKey given and no default design file".to_string())
            .to_string()
    })
}

fn file_key_param(default_file_key: Option<&str>) -> ParamSpec {
    let spec = ParamSpec::string("Figma file key (defaults to the configured design file)");
    match default_file_key {
        Some(key) => spec.with_default(json!(key)),
        None => spec,
    }
}

async fn fetch_node(conn: &FigmaConnection, file_key: &str, node_id: &str) -> Result<Value, String> {
    let session = conn.handle().await.map_err(|e| e.to_string())?;
    let resp = session
        .get_json(&format!("/v1/files/{file_key}/nodes"), &[("ids", node_id)])
        .await?;
    resp["nodes"][node_id]
        .get("document")
        .cloned()
        .ok_or_else(|| format!("Node {node_id} not found in file {file_key}"))
}

/// 按名称搜索设计文件中的组件
pub struct SearchComponentsTool {
    definition: ToolDefinition,
    connection: Arc<FigmaConnection>,
}

impl SearchComponentsTool {
    pub fn new(connection: Arc<FigmaConnection>, default_file_key: Option<&str>) -> Self {
        let definition = ToolDefinition::new(
            SEARCH_COMPONENTS,
            "Search components in the Figma design file by name. Returns matching component ids and names.",
        )
        .param("query", ParamSpec::string("Text to match against component names").required())
        .param("fileKey", file_key_param(default_file_key));
        Self {
            definition,
            connection,
        }
    }
}

/// 查询词中任一词命中组件名即算匹配（不区分大小写）
fn matches_query(name: &str, query: &str) -> bool {
    let name = name.to_lowercase();
    query
        .to_lowercase()
        .split_whitespace()
        .any(|word| name.contains(word))
}

#[async_trait]
impl Tool for SearchComponentsTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, args: Value) -> Result<Vec<ContentSegment>, String> {
        let query = required_str(&args, "query")?;
        let file_key = file_key_arg(&args)?;
        let session = self.connection.handle().await.map_err(|e| e.to_string())?;
        let resp = session
            .get_json(&format!("/v1/files/{file_key}/components"), &[])
            .await?;
        let components: Vec<Value> = resp["meta"]["components"]
            .as_array()
            .map(|all| {
                all.iter()
                    .filter_map(|c| {
                        let name = c.get("name")?.as_str()?;
                        let id = c.get("node_id")?.as_str()?;
                        matches_query(name, query)
                            .then(|| json!({ "id": id, "name": name, "type": "COMPONENT" }))
                    })
                    .collect()
            })
            .unwrap_or_default();
        tracing::debug!(query = %query, count = components.len(), "figma search");
        Ok(json_segment(&json!({
            "query": query,
            "count": components.len(),
            "components": components,
        })))
    }
}

/// 读取单个组件节点的完整属性
pub struct GetComponentTool {
    definition: ToolDefinition,
    connection: Arc<FigmaConnection>,
}

impl GetComponentTool {
    pub fn new(connection: Arc<FigmaConnection>, default_file_key: Option<&str>) -> Self {
        let definition = ToolDefinition::new(
            GET_COMPONENT,
            "Get the full design properties (fills, padding, corner radius) of a Figma component node.",
        )
        .param("nodeId", ParamSpec::string("Node id, e.g. 123:456").required())
        .param("fileKey", file_key_param(default_file_key));
        Self {
            definition,
            connection,
        }
    }
}

#[async_trait]
impl Tool for GetComponentTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, args: Value) -> Result<Vec<ContentSegment>, String> {
        let node_id = required_str(&args, "nodeId")?;
        let file_key = file_key_arg(&args)?;
        let node = fetch_node(&self.connection, file_key, node_id).await?;
        Ok(json_segment(&json!({ "nodeId": node_id, "component": node })))
    }
}

/// 由设计节点生成 React 组件代码
pub struct CodegenTool {
    definition: ToolDefinition,
    connection: Arc<FigmaConnection>,
}

impl CodegenTool {
    pub fn new(connection: Arc<FigmaConnection>, default_file_key: Option<&str>) -> Self {
        let definition = ToolDefinition::new(
            CODEGEN_REACT_COMPONENT,
            "Generate a typed React component from a Figma node. Pass the node object or a nodeId to fetch it.",
        )
        .param("componentName", ParamSpec::string("PascalCase name of the component").required())
        .param("nodeId", ParamSpec::string("Node id to read styles from"))
        .param("node", ParamSpec::object("Node properties as returned by figma_get_component"))
        .param("fileKey", file_key_param(default_file_key));
        Self {
            definition,
            connection,
        }
    }
}

#[async_trait]
impl Tool for CodegenTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn execute(&self, args: Value) -> Result<Vec<ContentSegment>, String> {
        let raw_name = required_str(&args, "componentName")?;
        let style = match (args.get("node").filter(|n| n.is_object()), str_arg(&args, "nodeId")) {
            (Some(node), _) => NodeStyle::from_node(node),
            (None, Some(node_id)) => {
                let file_key = file_key_arg(&args)?;
                NodeStyle::from_node(&fetch_node(&self.connection, file_key, node_id).await?)
            }
            (None, None) => NodeStyle::default(),
        };
        let name = sanitize_component_name(raw_name);
        let code = render_component(&name, ComponentCategory::from_component_name(raw_name), &style);
        Ok(json_segment(&json!({
            "componentName": name,
            "code": code,
            "hasTypes": true,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn offline_connection() -> Arc<FigmaConnection> {
        let backoff = BackoffConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            multiplier: 1.0,
            max_attempts: 1,
        };
        Arc::new(ConnectionManager::new(
            FigmaConnector {
                api_base: "http://127.0.0.1:9".to_string(),
                token: None,
            },
            backoff,
        ))
    }

    #[test]
    fn test_definitions_advertise_required_params() {
        let conn = offline_connection();
        let search = SearchComponentsTool::new(conn.clone(), Some("FILE"));
        let ad = search.definition().advertisement();
        assert_eq!(ad["name"], SEARCH_COMPONENTS);
        assert_eq!(ad["input_schema"]["required"], json!(["query"]));
        assert_eq!(
            search.definition().apply_defaults(json!({"query": "x"}))["fileKey"],
            "FILE"
        );
        let codegen = CodegenTool::new(conn, None);
        assert_eq!(
            codegen.definition().advertisement()["input_schema"]["properties"]["node"]["type"],
            "object"
        );
    }

    #[test]
    fn test_matches_query_any_word() {
        assert!(matches_query("Button / Primary", "primary button"));
        assert!(!matches_query("Card", "button"));
    }

    #[tokio::test]
    async fn test_search_without_token_is_rejected() {
        let tool = SearchComponentsTool::new(offline_connection(), Some("FILE"));
        let err = tool
            .execute(json!({"query": "button", "fileKey": "FILE"}))
            .await
            .unwrap_err();
        assert!(err.starts_with("Connection rejected"));
        assert!(err.contains("FIGMA_TOKEN"));
    }

    #[tokio::test]
    async fn test_missing_file_key_reports_not_configured() {
        let conn = offline_connection();
        let err = SearchComponentsTool::new(conn.clone(), None)
            .execute(json!({"query": "button"}))
            .await
            .unwrap_err();
        assert!(err.starts_with("Backend not configured"));
        let err = CodegenTool::new(conn.clone(), None)
            .execute(json!({"componentName": "PrimaryButton", "nodeId": "1:2"}))
            .await
            .unwrap_err();
        assert!(err.starts_with("Backend not configured"));
        // 未走到建连
        assert!(!conn.is_connected().await);
    }

    #[test]
    fn test_connect_status_classification() {
        assert_eq!(classify_connect_status(200, "{}"), Ok(()));
        assert!(matches!(classify_connect_status(401, "no"), Err(ConnectFailure::Permanent(_))));
        assert!(matches!(classify_connect_status(403, "no"), Err(ConnectFailure::Permanent(_))));
        assert!(matches!(classify_connect_status(429, "slow"), Err(ConnectFailure::Retryable(_))));
        assert!(matches!(classify_connect_status(503, "down"), Err(ConnectFailure::Retryable(_))));
    }

    #[tokio::test]
    async fn test_codegen_with_inline_node_needs_no_connection() {
        let tool = CodegenTool::new(offline_connection(), None);
        let out = tool
            .execute(json!({
                "componentName": "PrimaryButton",
                "node": {"cornerRadius": 12}
            }))
            .await
            .unwrap();
        let v: Value = serde_json::from_str(out[0].as_text()).unwrap();
        assert_eq!(v["componentName"], "PrimaryButton");
        assert!(v["code"].as_str().unwrap().contains("borderRadius: '12px'"));
    }

    #[tokio::test]
    async fn test_missing_required_args() {
        let conn = offline_connection();
        let err = GetComponentTool::new(conn.clone(), None)
            .execute(json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, "Missing nodeId");
        let err = CodegenTool::new(conn, None)
            .execute(json!({"nodeId": "1:2"}))
            .await
            .unwrap_err();
        assert_eq!(err, "Missing componentName");
    }
}
