//! React 组件代码生成（模板）
//!
//! 按组件名关键字选择模板分类（TextInput / TextArea / Generic），再把设计节点的结构属性
//! （内边距、圆角、填充色）代入模板。这是启发式的模板选择，不是通用代码生成器。

use serde_json::Value;

/// 组件模板分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentCategory {
    TextInput,
    TextArea,
    Generic,
}

const TEXT_AREA_KEYWORDS: &[&str] = &["textarea", "text area", "text_area", "multiline", "multi-line"];
const TEXT_INPUT_KEYWORDS: &[&str] = &["input", "textfield", "text field", "text_field", "field"];

impl ComponentCategory {
    /// 多行优先匹配，避免 "TextAreaInput" 被当成单行输入
    pub fn from_component_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if TEXT_AREA_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Self::TextArea
        } else if TEXT_INPUT_KEYWORDS.iter().any(|k| lower.contains(k)) {
            Self::TextInput
        } else {
            Self::Generic
        }
    }

    fn template(self) -> &'static str {
        match self {
            Self::TextInput => TEXT_INPUT_TEMPLATE,
            Self::TextArea => TEXT_AREA_TEMPLATE,
            Self::Generic => GENERIC_TEMPLATE,
        }
    }
}

/// 从设计节点提取的样式属性
#[derive(Debug, Clone, PartialEq)]
pub struct NodeStyle {
    /// top, right, bottom, left
    pub padding: [f64; 4],
    pub corner_radius: f64,
    /// #rrggbb
    pub fill: String,
}

impl Default for NodeStyle {
    fn default() -> Self {
        Self {
            padding: [8.0, 16.0, 8.0, 16.0],
            corner_radius: 4.0,
            fill: "#0052cc".to_string(),
        }
    }
}

/// Figma 颜色分量为 0..1 浮点
fn rgb_to_hex(color: &Value) -> Option<String> {
    let channel = |k: &str| -> Option<u8> {
        let v = color.get(k)?.as_f64()?;
        Some((v.clamp(0.0, 1.0) * 255.0).round() as u8)
    };
    Some(format!(
        "#{:02x}{:02x}{:02x}",
        channel("r")?,
        channel("g")?,
        channel("b")?
    ))
}

impl NodeStyle {
    /// 从 Figma 节点 JSON 读取样式，缺失的字段用默认值
    pub fn from_node(node: &Value) -> Self {
        let defaults = Self::default();
        let num = |key: &str, fallback: f64| node.get(key).and_then(Value::as_f64).unwrap_or(fallback);
        let fill = node
            .get("fills")
            .and_then(Value::as_array)
            .and_then(|fills| {
                fills
                    .iter()
                    .find(|f| f.get("type").and_then(Value::as_str) == Some("SOLID"))
            })
            .and_then(|f| f.get("color"))
            .and_then(rgb_to_hex)
            .unwrap_or(defaults.fill);
        Self {
            padding: [
                num("paddingTop", defaults.padding[0]),
                num("paddingRight", defaults.padding[1]),
                num("paddingBottom", defaults.padding[2]),
                num("paddingLeft", defaults.padding[3]),
            ],
            corner_radius: num("cornerRadius", defaults.corner_radius),
            fill,
        }
    }
}

/// 把组件名规整为合法标识符
pub fn sanitize_component_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if cleaned.is_empty() || cleaned.starts_with(|c: char| c.is_ascii_digit()) {
        "Component".to_string()
    } else {
        cleaned
    }
}

fn px(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}px", v as i64)
    } else {
        format!("{v}px")
    }
}

/// 生成组件源码
pub fn render_component(name: &str, category: ComponentCategory, style: &NodeStyle) -> String {
    let name = sanitize_component_name(name);
    category
        .template()
        .replace("__NAME__", &name)
        .replace("__CLASS__", &name.to_lowercase())
        .replace("__PT__", &px(style.padding[0]))
        .replace("__PR__", &px(style.padding[1]))
        .replace("__PB__", &px(style.padding[2]))
        .replace("__PL__", &px(style.padding[3]))
        .replace("__RADIUS__", &px(style.corner_radius))
        .replace("__FILL__", &style.fill)
}

const GENERIC_TEMPLATE: &str = r#"import React from 'react';

interface __NAME__Props {
  onClick?: () => void;
  disabled?: boolean;
  children: React.ReactNode;
}

export const __NAME__: React.FC<__NAME__Props> = (props) => {
  return (
    <button
      className="__CLASS__"
      type="button"
      onClick={props.onClick}
      disabled={props.disabled}
      style={{
        paddingTop: '__PT__',
        paddingRight: '__PR__',
        paddingBottom: '__PB__',
        paddingLeft: '__PL__',
        borderRadius: '__RADIUS__',
        backgroundColor: '__FILL__'
      }}
    >
      {props.children}
    </button>
  );
};"#;

const TEXT_INPUT_TEMPLATE: &str = r#"import React from 'react';

interface __NAME__Props {
  value?: string;
  placeholder?: string;
  disabled?: boolean;
  onChange?: (value: string) => void;
}

export const __NAME__: React.FC<__NAME__Props> = (props) => {
  return (
    <input
      className="__CLASS__"
      type="text"
      value={props.value}
      placeholder={props.placeholder}
      disabled={props.disabled}
      onChange={(e) => props.onChange?.(e.target.value)}
      style={{
        paddingTop: '__PT__',
        paddingRight: '__PR__',
        paddingBottom: '__PB__',
        paddingLeft: '__PL__',
        borderRadius: '__RADIUS__',
        border: '1px solid __FILL__'
      }}
    />
  );
};"#;

const TEXT_AREA_TEMPLATE: &str = r#"import React from 'react';

interface __NAME__Props {
  value?: string;
  placeholder?: string;
  rows?: number;
  disabled?: boolean;
  onChange?: (value: string) => void;
}

export const __NAME__: React.FC<__NAME__Props> = (props) => {
  return (
    <textarea
      className="__CLASS__"
      value={props.value}
      placeholder={props.placeholder}
      rows={props.rows ?? 4}
      disabled={props.disabled}
      onChange={(e) => props.onChange?.(e.target.value)}
      style={{
        paddingTop: '__PT__',
        paddingRight: '__PR__',
        paddingBottom: '__PB__',
        paddingLeft: '__PL__',
        borderRadius: '__RADIUS__',
        border: '1px solid __FILL__'
      }}
    />
  );
};"#;
