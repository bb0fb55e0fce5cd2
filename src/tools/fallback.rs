//! 降级数据（Fallback Data Provider）
//!
//! 后端限流或不可用时，按工具名与输入的粗分类给出确定性的替代结果：同样的 (工具名, 参数) 永远得到同样的内容。

use serde_json::{json, Value};

use crate::memory::ContentSegment;
use crate::tools::codegen::{render_component, sanitize_component_name, ComponentCategory, NodeStyle};
use crate::tools::figma::{CODEGEN_REACT_COMPONENT, GET_COMPONENT, SEARCH_COMPONENTS};

/// 搜索词的粗分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryCategory {
    Form,
    Button,
    General,
}

impl QueryCategory {
    pub fn from_query(query: &str) -> Self {
        let lower = query.to_lowercase();
        if lower.contains("form") {
            Self::Form
        } else if lower.contains("button") {
            Self::Button
        } else {
            Self::General
        }
    }
}

fn component(id: &str, name: &str) -> Value {
    json!({ "id": id, "name": name, "type": "COMPONENT" })
}

fn button_components() -> Vec<Value> {
    vec![
        component("123:456", "Button / Primary"),
        component("123:457", "Button / Secondary"),
        component("123:458", "Button / Text"),
    ]
}

fn form_components() -> Vec<Value> {
    vec![
        component("200:101", "Form / Text Field"),
        component("200:102", "Form / Text Area"),
        component("200:103", "Form / Checkbox"),
        component("200:104", "Form / Select"),
        component("200:105", "Form / Group"),
        component("123:456", "Button / Primary"),
    ]
}

/// 种子节点：Button / Primary
fn seeded_node() -> Value {
    json!({
        "name": "Button / Primary",
        "type": "COMPONENT",
        "fills": [{ "type": "SOLID", "color": { "r": 0, "g": 0.32, "b": 0.8 } }],
        "paddingTop": 8,
        "paddingRight": 16,
        "paddingBottom": 8,
        "paddingLeft": 16,
        "cornerRadius": 4
    })
}

fn pretty(v: &Value) -> String {
    serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
}

/// 降级数据提供者
#[derive(Debug, Default, Clone)]
pub struct FallbackProvider;

impl FallbackProvider {
    pub fn new() -> Self {
        Self
    }

    /// 工具是否有降级数据
    pub fn supports(&self, tool: &str) -> bool {
        matches!(tool, SEARCH_COMPONENTS | GET_COMPONENT | CODEGEN_REACT_COMPONENT)
    }

    /// 生成替代结果；该工具没有降级数据时返回 None
    pub fn substitute(&self, tool: &str, args: &Value) -> Option<Vec<ContentSegment>> {
        let payload = match tool {
            SEARCH_COMPONENTS => self.search(args),
            GET_COMPONENT => self.get_component(args),
            CODEGEN_REACT_COMPONENT => self.codegen(args),
            _ => return None,
        };
        Some(vec![ContentSegment::text(pretty(&payload))])
    }

    fn search(&self, args: &Value) -> Value {
        let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
        let components = match QueryCategory::from_query(query) {
            QueryCategory::Form => form_components(),
            QueryCategory::Button | QueryCategory::General => button_components(),
        };
        json!({
            "query": query,
            "count": components.len(),
            "components": components,
        })
    }

    fn get_component(&self, args: &Value) -> Value {
        json!({
            "nodeId": args.get("nodeId").cloned().unwrap_or(Value::Null),
            "component": seeded_node(),
        })
    }

    fn codegen(&self, args: &Value) -> Value {
        let raw_name = args
            .get("componentName")
            .and_then(Value::as_str)
            .unwrap_or("Component");
        let name = sanitize_component_name(raw_name);
        let style = args
            .get("node")
            .filter(|n| n.is_object())
            .map(NodeStyle::from_node)
            .unwrap_or_else(|| NodeStyle::from_node(&seeded_node()));
        let code = render_component(&name, ComponentCategory::from_component_name(raw_name), &style);
        json!({
            "componentName": name,
            "code": code,
            "hasTypes": true,
        })
    }
}
