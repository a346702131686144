//! 计划构建器
//!
//! 提供流畅的 API 来构建计划，build 时统一做 normalize + validate

use crate::core::EngineError;
use crate::workflow::types::*;

/// 计划构建器
pub struct PlanBuilder {
    reasoning: String,
    complexity: Complexity,
    tasks: Vec<Task>,
}

impl PlanBuilder {
    /// 创建新的计划构建器
    pub fn new(reasoning: impl Into<String>) -> Self {
        Self {
            reasoning: reasoning.into(),
            complexity: Complexity::Simple,
            tasks: Vec::new(),
        }
    }

    /// 设置复杂度估计
    pub fn complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    /// 添加任务
    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    /// 添加需要人工确认的任务
    pub fn human_task(mut self, task: Task) -> Self {
        self.tasks.push(task.with_requires_human(true));
        self
    }

    /// 构建计划
    pub fn build(self) -> Result<Plan, EngineError> {
        let mut plan = Plan::new(self.tasks, self.reasoning);
        plan.estimated_complexity = self.complexity;
        plan.validate()?;
        Ok(plan)
    }
}
