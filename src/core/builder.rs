//! Orchestrator 构建器：统一的引擎初始化逻辑
//!
//! EngineConfig 是引擎唯一的配置入口，由 AppConfig 派生或在测试中直接构造；
//! 引擎内部不读取环境变量或全局状态。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{EngineError, FeatureGate, Orchestrator, StaticGate};
use crate::llm::LlmClient;
use crate::stages::StageContext;
use crate::tools::{EchoTool, SendEmailTool, Tool, ToolDispatcher, ToolRegistry, WeatherTool};

/// 引擎配置
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 允许并行执行工具批次（还需后端与门控同时允许）
    pub parallel_tools: bool,
    pub tool_timeout_secs: u64,
    pub max_concurrent_tools: usize,
    /// 额外标记为敏感的工具名
    pub sensitive_tools: Vec<String>,
    /// 覆盖 system prompt 开头
    pub system_prompt: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel_tools: true,
            tool_timeout_secs: 30,
            max_concurrent_tools: 4,
            sensitive_tools: vec!["send_email".to_string()],
            system_prompt: None,
        }
    }
}

impl From<&AppConfig> for EngineConfig {
    fn from(config: &AppConfig) -> Self {
        let engine = &config.engine;
        Self {
            parallel_tools: engine.parallel_tools,
            tool_timeout_secs: engine.tool_timeout_secs,
            max_concurrent_tools: engine.max_concurrent_tools,
            sensitive_tools: engine.sensitive_tools.clone(),
            system_prompt: engine.system_prompt.clone(),
        }
    }
}

/// Orchestrator 构建器：登记工具、注入后端、门控与配置
pub struct OrchestratorBuilder {
    llm: Arc<dyn LlmClient>,
    config: EngineConfig,
    gate: Arc<dyn FeatureGate>,
    registry: ToolRegistry,
    error: Option<EngineError>,
}

impl OrchestratorBuilder {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            config: EngineConfig::default(),
            gate: Arc::new(StaticGate::default()),
            registry: ToolRegistry::new(),
            error: None,
        }
    }

    /// 由应用配置创建：引擎配置与门控档位都取自 AppConfig
    pub fn from_app_config(llm: Arc<dyn LlmClient>, config: &AppConfig) -> Self {
        Self::new(llm)
            .with_config(EngineConfig::from(config))
            .with_gate(Arc::new(StaticGate::new(config.tier.advanced_execution)))
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_gate(mut self, gate: Arc<dyn FeatureGate>) -> Self {
        self.gate = gate;
        self
    }

    /// 替换整个工具注册表
    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// 登记工具；契约非法时错误延迟到 build 返回
    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        if let Err(e) = self.registry.register(tool) {
            self.error.get_or_insert(e);
        }
        self
    }

    pub fn shared_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        if let Err(e) = self.registry.register_shared(tool) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// 登记内置工具：echo、weather、send_email（使用一个新的发件箱，调用方无法读取）
    pub fn with_builtin_tools(self) -> Self {
        self.with_builtin_tools_and_outbox(SendEmailTool::new())
    }

    /// 同 `with_builtin_tools`，但 send_email 使用调用方给出的实例；
    /// `SendEmailTool` 的克隆共享发件箱，调用方保留一份即可查看已发送的邮件
    pub fn with_builtin_tools_and_outbox(self, email: SendEmailTool) -> Self {
        self.tool(EchoTool).tool(WeatherTool).tool(email)
    }

    pub fn build(self) -> Result<Orchestrator, EngineError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let mut registry = self.registry;
        registry.mark_sensitive(self.config.sensitive_tools.iter().cloned());

        let dispatcher = ToolDispatcher::new(
            Arc::new(registry),
            self.config.tool_timeout_secs,
            self.config.max_concurrent_tools,
        );
        tracing::info!(
            tools = ?dispatcher.registry().tool_names(),
            parallel = self.config.parallel_tools,
            "orchestrator built"
        );

        Ok(Orchestrator::new(StageContext {
            llm: self.llm,
            dispatcher: Arc::new(dispatcher),
            gate: self.gate,
            config: self.config,
        }))
    }
}
