//! 工具注册表
//!
//! 每个工具实现 Tool trait（definition / execute）；ToolDefinition 描述名称、说明与有序参数 schema，
//! 进程启动时构建、之后不可变，每轮完整下发给模型。ToolRegistry 按注册顺序保存并按名查找。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::memory::ContentSegment;

/// 单个参数的 schema：类型、说明、是否必填、默认值
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub param_type: String,
    pub description: String,
    pub required: bool,
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn new(param_type: &str, description: &str) -> Self {
        Self {
            param_type: param_type.to_string(),
            description: description.to_string(),
            required: false,
            default: None,
        }
    }

    pub fn string(description: &str) -> Self {
        Self::new("string", description)
    }

    pub fn object(description: &str) -> Self {
        Self::new("object", description)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// 工具定义（供模型理解与调用）
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// 参数按声明顺序保存
    pub parameters: Vec<(String, ParamSpec)>,
}

impl ToolDefinition {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: Vec::new(),
        }
    }

    pub fn param(mut self, name: &str, spec: ParamSpec) -> Self {
        self.parameters.push((name.to_string(), spec));
        self
    }

    /// 广告格式：{name, description, input_schema: {type: object, properties, required}}
    pub fn advertisement(&self) -> Value {
        let mut properties = Map::new();
        for (name, spec) in &self.parameters {
            properties.insert(
                name.clone(),
                json!({ "type": spec.param_type, "description": spec.description }),
            );
        }
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|(_, s)| s.required)
            .map(|(n, _)| n.as_str())
            .collect();
        json!({
            "name": self.name,
            "description": self.description,
            "input_schema": {
                "type": "object",
                "properties": properties,
                "required": required,
            }
        })
    }

    /// 对缺省参数填入默认值；args 不是对象时原样返回
    pub fn apply_defaults(&self, args: Value) -> Value {
        let Value::Object(mut map) = args else {
            return args;
        };
        for (name, spec) in &self.parameters {
            if let Some(default) = &spec.default {
                if map.get(name).map_or(true, Value::is_null) {
                    map.insert(name.clone(), default.clone());
                }
            }
        }
        Value::Object(map)
    }
}

/// 工具 trait：定义 + 异步执行（args 为 JSON，成功返回内容片段，失败返回错误描述）
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> &ToolDefinition;

    async fn execute(&self, args: Value) -> Result<Vec<ContentSegment>, String>;

    fn name(&self) -> &str {
        &self.definition().name
    }
}

/// 工具注册表：按注册顺序保存 Arc<dyn Tool>，支持 register / get / execute / tool_names
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名工具覆盖原有定义但保留原位置
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        let tool: Arc<dyn Tool> = Arc::new(tool);
        match self.index.get(&name) {
            Some(&i) => self.tools[i] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| self.tools[i].clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub async fn execute(&self, name: &str, args: Value) -> Result<Vec<ContentSegment>, String> {
        let tool = self.get(name).ok_or_else(|| format!("Unknown tool: {name}"))?;
        tool.execute(args).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition().clone()).collect()
    }

    /// 每轮下发给模型的工具广告，按注册顺序
    pub fn advertisement(&self) -> Vec<Value> {
        self.tools.iter().map(|t| t.definition().advertisement()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
