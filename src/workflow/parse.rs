//! 后端输出解析
//!
//! 只有整段回复就是 JSON 对象，或回复中带 ```json 代码块时才按 JSON 处理，并归类为：
//! - 直接工具调用：`{"tool_calls": [{"tool": "...", "args": {...}}]}` 或单个 `{"tool": "...", "args": {...}}`
//! - 结构化计划：`{"tasks": [...], "reasoning": "...", ...}`
//! - 其它：普通文本（包括在正文中引用 JSON 的回答）

use std::sync::OnceLock;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::EngineError;
use crate::tools::Contract;
use crate::workflow::types::{Complexity, Plan, Priority, Task};

/// 后端发起的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "name")]
    pub tool: String,
    #[serde(default, alias = "arguments")]
    pub args: Value,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            id: None,
            tool: tool.into(),
            args,
        }
    }

    /// 调用 ID：后端给出则沿用，否则生成 call_xxxxxxxx
    pub fn call_id(&self) -> String {
        match &self.id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => {
                let uuid = uuid::Uuid::new_v4().simple().to_string();
                format!("call_{}", &uuid[..8])
            }
        }
    }
}

/// 后端输出的三种形态
#[derive(Debug, Clone)]
pub enum BackendOutput {
    ToolCalls(Vec<ToolCall>),
    PlanDocument(Value),
    Text(String),
}

/// 计划文档（仅用于 schema 生成与反序列化，随后归一化为 Plan）
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct PlanDocument {
    tasks: Vec<TaskDocument>,
    #[serde(default)]
    reasoning: String,
    #[serde(default, alias = "estimated_complexity")]
    estimated_complexity: Complexity,
    #[serde(default, alias = "requires_human_approval")]
    requires_human_approval: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
struct TaskDocument {
    #[serde(default)]
    id: Option<String>,
    /// 工具名
    #[serde(rename = "type")]
    tool: String,
    description: String,
    #[serde(default)]
    params: Map<String, Value>,
    #[serde(default)]
    priority: Priority,
    #[serde(default, alias = "requires_human")]
    requires_human: bool,
}

/// 提取 JSON 片段：整段为 `{...}`，或 ```json 代码块的内容
fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }
    let start = trimmed.find("```json")?;
    let rest = &trimmed[start + 7..];
    Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()))
}

/// 将后端文本归类为工具调用 / 计划文档 / 普通文本
pub fn parse_backend_output(output: &str) -> BackendOutput {
    let trimmed = output.trim();
    let Some(json_str) = extract_json(trimmed) else {
        return BackendOutput::Text(trimmed.to_string());
    };
    let Ok(value) = serde_json::from_str::<Value>(json_str) else {
        return BackendOutput::Text(trimmed.to_string());
    };

    if let Some(calls) = value.get("tool_calls").and_then(|v| v.as_array()) {
        let calls: Vec<ToolCall> = calls
            .iter()
            .filter_map(|c| serde_json::from_value::<ToolCall>(c.clone()).ok())
            .filter(|c| !c.tool.is_empty())
            .collect();
        if !calls.is_empty() {
            return BackendOutput::ToolCalls(calls);
        }
    }

    if value.get("tool").and_then(|v| v.as_str()).is_some_and(|t| !t.is_empty()) {
        if let Ok(call) = serde_json::from_value::<ToolCall>(value.clone()) {
            return BackendOutput::ToolCalls(vec![call]);
        }
    }

    if value.get("tasks").is_some() {
        return BackendOutput::PlanDocument(value);
    }

    BackendOutput::Text(trimmed.to_string())
}

/// 计划文档的 JSON Schema（供 prompt 与校验共用）
pub fn plan_schema_json() -> String {
    let schema = schemars::schema_for!(PlanDocument);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 计划契约只编译一次
fn plan_contract() -> Result<&'static Contract, EngineError> {
    static PLAN_CONTRACT: OnceLock<Result<Contract, String>> = OnceLock::new();
    PLAN_CONTRACT
        .get_or_init(|| Contract::from_type::<PlanDocument>().map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|e| EngineError::InvalidPlan(e.clone()))
}

/// 按计划契约校验并归一化为 Plan：缺省 ID 记为 task_N，任务需人工则计划需人工
pub fn parse_plan_document(value: &Value) -> Result<Plan, EngineError> {
    plan_contract()?
        .check(value)
        .map_err(EngineError::InvalidPlan)?;

    let doc: PlanDocument = serde_json::from_value(value.clone())
        .map_err(|e| EngineError::InvalidPlan(e.to_string()))?;

    let tasks = doc
        .tasks
        .into_iter()
        .enumerate()
        .map(|(i, t)| Task {
            id: t
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("task_{}", i + 1)),
            tool: t.tool,
            description: t.description,
            params: t.params,
            priority: t.priority,
            requires_human: t.requires_human,
        })
        .collect();

    let mut plan = Plan::new(tasks, doc.reasoning);
    plan.estimated_complexity = doc.estimated_complexity;
    plan.requires_human_approval |= doc.requires_human_approval;
    plan.validate()?;
    Ok(plan)
}
