//! 计划类型定义
//!
//! Plan / Task / TaskResult 是引擎在各阶段之间传递的数据；字段以 camelCase 序列化，
//! 便于调用方把 ChatState 原样存入会话存储。

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::EngineError;

pub type TaskId = String;

/// 任务优先级（排序：High > Medium > Low）
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// Planner 对本轮请求复杂度的估计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[default]
    Simple,
    Moderate,
    Complex,
}

/// 计划来源：Planner 一次性确定，后续阶段只看这个标记
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanSource {
    /// 后端给出的结构化计划，交由 Task Runner 执行
    #[default]
    Declared,
    /// 后端直接调用了工具，Planner 已在本阶段执行（executed 为已执行的任务 ID）
    Inline { executed: Vec<TaskId> },
}

/// 计划中的单个任务，绑定一个已注册的工具
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    /// 工具名
    #[serde(rename = "type")]
    pub tool: String,
    pub description: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub requires_human: bool,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, tool: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            description: description.into(),
            params: Map::new(),
            priority: Priority::Medium,
            requires_human: false,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        if let Value::Object(map) = params {
            self.params = map;
        }
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_requires_human(mut self, requires_human: bool) -> Self {
        self.requires_human = requires_human;
        self
    }

    /// 调用工具时使用的参数
    pub fn args(&self) -> Value {
        Value::Object(self.params.clone())
    }
}

/// 一轮请求的执行计划
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub estimated_complexity: Complexity,
    #[serde(default)]
    pub requires_human_approval: bool,
    #[serde(default)]
    pub source: PlanSource,
}

impl Plan {
    pub fn new(tasks: Vec<Task>, reasoning: impl Into<String>) -> Self {
        let mut plan = Self {
            tasks,
            reasoning: reasoning.into(),
            estimated_complexity: Complexity::Simple,
            requires_human_approval: false,
            source: PlanSource::Declared,
        };
        plan.normalize();
        plan
    }

    /// 解析或校验失败时的降级计划：空任务、simple
    pub fn fallback(reasoning: impl Into<String>) -> Self {
        Self::new(Vec::new(), reasoning)
    }

    /// 任一任务需要人工确认时，整个计划必须标记 requires_human_approval
    pub fn normalize(&mut self) {
        if self.tasks.iter().any(|t| t.requires_human) {
            self.requires_human_approval = true;
        }
    }

    /// 校验：任务 ID 非空且在计划内唯一，工具名非空
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if task.id.trim().is_empty() {
                return Err(EngineError::InvalidPlan("task id must not be empty".to_string()));
            }
            if task.tool.trim().is_empty() {
                return Err(EngineError::InvalidPlan(format!(
                    "task '{}' has no tool type",
                    task.id
                )));
            }
            if !seen.insert(task.id.as_str()) {
                return Err(EngineError::InvalidPlan(format!(
                    "duplicate task id '{}'",
                    task.id
                )));
            }
        }
        Ok(())
    }

    /// 按优先级降序稳定排序（同优先级保持原顺序）
    pub fn tasks_by_priority(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.iter().collect();
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority));
        tasks
    }

    pub fn human_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| t.requires_human)
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.source, PlanSource::Inline { .. })
    }
}

/// 任务执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    PendingHumanApproval,
}

/// 单个任务的执行记录；创建后不再修改，重试会产生新的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    /// 任务描述回显
    pub task: String,
}

impl TaskResult {
    pub fn completed(task: impl Into<String>, result: Value, execution_time_ms: u64) -> Self {
        Self {
            status: TaskStatus::Completed,
            result: Some(result),
            error: None,
            executed_at: Utc::now(),
            execution_time_ms: Some(execution_time_ms),
            task: task.into(),
        }
    }

    pub fn failed(task: impl Into<String>, error: impl Into<String>, execution_time_ms: Option<u64>) -> Self {
        Self {
            status: TaskStatus::Failed,
            result: None,
            error: Some(error.into()),
            executed_at: Utc::now(),
            execution_time_ms,
            task: task.into(),
        }
    }

    pub fn pending_human_approval(task: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::PendingHumanApproval,
            result: None,
            error: None,
            executed_at: Utc::now(),
            execution_time_ms: None,
            task: task.into(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_sort_is_stable() {
        let plan = Plan::new(
            vec![
                Task::new("a", "echo", "A").with_priority(Priority::Low),
                Task::new("b", "echo", "B").with_priority(Priority::High),
                Task::new("c", "echo", "C"),
                Task::new("d", "echo", "D").with_priority(Priority::High),
                Task::new("e", "echo", "E"),
            ],
            "",
        );
        let order: Vec<&str> = plan.tasks_by_priority().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(order, vec!["b", "d", "c", "e", "a"]);
    }

    #[test]
    fn test_normalize_sets_requires_human_approval() {
        let plan = Plan::new(
            vec![Task::new("t1", "send_email", "Mail the report").with_requires_human(true)],
            "needs sign-off",
        );
        assert!(plan.requires_human_approval);
        assert_eq!(plan.human_tasks().count(), 1);
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let plan = Plan::new(
            vec![Task::new("t1", "echo", "one"), Task::new("t1", "echo", "two")],
            "",
        );
        assert!(matches!(plan.validate(), Err(EngineError::InvalidPlan(_))));
    }

    #[test]
    fn test_task_serializes_tool_as_type() {
        let task = Task::new("t1", "weather", "Look up weather")
            .with_params(serde_json::json!({"location": "Paris"}));
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["type"], "weather");
        assert_eq!(json["requiresHuman"], false);
        assert_eq!(json["params"]["location"], "Paris");
    }

    #[test]
    fn test_task_result_status_tokens() {
        let pending = TaskResult::pending_human_approval("Send mail");
        let json = serde_json::to_value(&pending).unwrap();
        assert_eq!(json["status"], "pending_human_approval");
        assert!(json.get("result").is_none());
    }
}
