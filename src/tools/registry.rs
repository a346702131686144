//! 工具注册表
//!
//! 每个工具登记为 {输入契约, 输出契约, 处理函数}。dispatch(name, args) 依次：
//! 1. 参数不满足输入契约 → ContractViolation(input)
//! 2. 调用处理函数（计时）；处理函数 panic 视为执行失败
//! 3. 返回值不满足输出契约 → ContractViolation(output)，否则返回校验后的值

use std::collections::{BTreeMap, HashSet};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;

use crate::core::{ContractDirection, EngineError};
use crate::tools::Contract;

/// 工具 trait：名称、描述（供 LLM 理解）、输入/输出 schema、是否敏感、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（对应计划中的 task.type 与工具调用中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 输入契约（JSON Schema），默认任意对象
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 输出契约（JSON Schema），默认不约束
    fn output_schema(&self) -> Value {
        serde_json::json!({})
    }

    /// 敏感工具（如对外发信）需要人工确认后才能执行
    fn is_sensitive(&self) -> bool {
        false
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<Value, String>;
}

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// 以闭包实现的工具，便于调用方直接登记 (name, 输入契约, 输出契约, handler)
pub struct FnTool {
    name: String,
    description: String,
    input: Value,
    output: Value,
    sensitive: bool,
    handler: Handler,
}

impl FnTool {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input: serde_json::json!({"type": "object"}),
            output: serde_json::json!({}),
            sensitive: false,
            handler: Arc::new(move |args| handler(args).boxed()),
        }
    }

    pub fn with_input(mut self, schema: Value) -> Self {
        self.input = schema;
        self
    }

    pub fn with_output(mut self, schema: Value) -> Self {
        self.output = schema;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.input.clone()
    }

    fn output_schema(&self) -> Value {
        self.output.clone()
    }

    fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        (self.handler)(args).await
    }
}

/// 已登记的工具：处理函数与编译好的两份契约
#[derive(Clone)]
struct RegisteredTool {
    tool: Arc<dyn Tool>,
    input: Contract,
    output: Contract,
}

/// 一次 dispatch 的结果与处理函数耗时（参数校验失败时未调用处理函数，耗时为 None）
#[derive(Debug)]
pub struct DispatchReport {
    pub outcome: Result<Value, EngineError>,
    pub elapsed_ms: Option<u64>,
}

/// 工具注册表：按名称存储工具与契约，支持 register / dispatch / 描述导出
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
    sensitive: HashSet<String>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("sensitive", &self.sensitive)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记工具；同名工具会被替换。输入/输出 schema 在此编译，非法时返回 InvalidContract
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<&mut Self, EngineError> {
        self.register_shared(Arc::new(tool))
    }

    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) -> Result<&mut Self, EngineError> {
        let name = tool.name().to_string();
        let with_tool = |e: EngineError| match e {
            EngineError::InvalidContract { details, .. } => EngineError::InvalidContract {
                tool: name.clone(),
                details,
            },
            other => other,
        };
        let input = Contract::new(tool.parameters_schema()).map_err(with_tool)?;
        let output = Contract::new(tool.output_schema()).map_err(with_tool)?;
        self.tools
            .insert(name, RegisteredTool { tool, input, output });
        Ok(self)
    }

    /// 额外标记敏感工具（来自配置 engine.sensitive_tools）
    pub fn mark_sensitive<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sensitive.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn is_sensitive(&self, name: &str) -> bool {
        self.sensitive.contains(name) || self.tools.get(name).is_some_and(|r| r.tool.is_sensitive())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 校验参数 → 调用 → 校验结果
    pub async fn dispatch(&self, name: &str, args: Value) -> DispatchReport {
        let Some(entry) = self.tools.get(name) else {
            return DispatchReport {
                outcome: Err(EngineError::UnknownTool(name.to_string())),
                elapsed_ms: None,
            };
        };

        if let Err(details) = entry.input.check(&args) {
            return DispatchReport {
                outcome: Err(EngineError::ContractViolation {
                    tool: name.to_string(),
                    direction: ContractDirection::Input,
                    details,
                }),
                elapsed_ms: None,
            };
        }

        let start = Instant::now();
        let result = AssertUnwindSafe(entry.tool.execute(args))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let message = format!("tool panicked: {}", panic_message(&*payload));
                tracing::error!(tool = %name, %message, "tool handler panicked");
                Err(message)
            });
        let elapsed_ms = Some(start.elapsed().as_millis() as u64);

        let outcome = match result {
            Err(message) => Err(EngineError::ToolExecution {
                tool: name.to_string(),
                message,
            }),
            Ok(value) => match entry.output.check(&value) {
                Ok(()) => Ok(value),
                Err(details) => Err(EngineError::ContractViolation {
                    tool: name.to_string(),
                    direction: ContractDirection::Output,
                    details,
                }),
            },
        };

        DispatchReport { outcome, elapsed_ms }
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 工具列表 JSON（名称、描述、参数 schema、是否敏感），注入 system prompt 以绑定后端
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|(name, r)| {
                serde_json::json!({
                    "name": name,
                    "description": r.tool.description(),
                    "parameters": r.input.schema(),
                    "sensitive": self.is_sensitive(name),
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
