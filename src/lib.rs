//! designloop - 设计稿到组件代码的智能体
//!
//! 模块划分：
//! - **agent**: 无头运行时（按配置构建组件，处理单条 prompt）
//! - **artifact**: 从最终回复中提取组件代码
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、恢复策略、循环状态机
//! - **llm**: 模型客户端抽象与实现（Anthropic / Mock / Scripted）
//! - **memory**: 对话记录（只追加 transcript）
//! - **react**: 对话主循环与过程事件
//! - **tools**: 工具注册、分发、执行、降级数据与 Figma 连接
//! - **web**: HTTP 接口

pub mod agent;
pub mod artifact;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;
pub mod web;
