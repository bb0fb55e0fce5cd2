//! 代码产物提取
//!
//! 从模型最终回复中找出生成的组件代码：扫描所有 ``` 代码块，取第一个包含 export 或 interface 的块，
//! 再从中匹配 `export const|function <Name>` 作为组件名，匹配不到时用默认名。
//! 这是基于正则的启发式，放在 ArtifactExtractor trait 后面，将来可换成工具直接返回结构化结果。

use serde::Serialize;

/// 找不到组件名时的默认名
pub const DEFAULT_COMPONENT_NAME: &str = "Component";

/// 提取出的代码产物，交给编辑器 / 预览使用
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeArtifact {
    pub code: String,
    pub component_name: String,
}

/// 产物提取接口
pub trait ArtifactExtractor: Send + Sync {
    /// 返回 None 表示「没有产物」，不是错误
    fn extract(&self, text: &str) -> Option<CodeArtifact>;
}

/// 基于 Markdown 代码块的提取器
#[derive(Debug, Default, Clone, Copy)]
pub struct FencedBlockExtractor;

impl ArtifactExtractor for FencedBlockExtractor {
    fn extract(&self, text: &str) -> Option<CodeArtifact> {
        let block_re = regex::Regex::new(r"```\w*\s*([\s\S]*?)```").ok()?;
        let name_re = regex::Regex::new(r"export\s+(?:const|function)\s+(\w+)").ok()?;

        let code = block_re
            .captures_iter(text)
            .filter_map(|cap| cap.get(1).map(|m| m.as_str().trim()))
            .find(|code| code.contains("export") || code.contains("interface"))?;

        let component_name = name_re
            .captures(code)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| DEFAULT_COMPONENT_NAME.to_string());

        tracing::debug!(component = %component_name, code_len = code.len(), "artifact extracted");
        Some(CodeArtifact {
            code: code.to_string(),
            component_name,
        })
    }
}

/// 用默认提取器提取
pub fn extract_artifact(text: &str) -> Option<CodeArtifact> {
    FencedBlockExtractor.extract(text)
}
