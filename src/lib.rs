//! Hive - Rust 智能体任务编排引擎
//!
//! 把一条用户请求变成一组工具调用的计划，串行或并行执行，敏感任务交给人工确认，
//! 最后根据累积的结果合成答复。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、ChatState 与归约规则、功能门控、状态图编排器与构建器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: tracing 初始化
//! - **session**: 调用方使用的会话存储（内存 / JSON 文件）
//! - **stages**: Planner、Task Runner、Responder、Human Loop 四个阶段
//! - **tools**: 工具契约、注册表、调度器与内置工具（echo、weather、send_email）
//! - **workflow**: 计划类型、计划构建器、后端输出解析

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod session;
pub mod stages;
pub mod tools;
pub mod workflow;

pub use crate::core::{ChatState, EngineConfig, EngineError, Orchestrator, OrchestratorBuilder, Step};
