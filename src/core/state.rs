//! 会话状态：ChatState、Step 与归约规则
//!
//! 各阶段不直接修改 ChatState，而是返回 StateUpdate，由 Orchestrator 调用 `apply` 合并：
//! - messages：追加，从不截断或重排
//! - plan：整体覆盖（后写者胜）
//! - tool_results：按 key 合并（新 key 加入，同 key 覆盖），从不清空
//! - 其余标量字段：有值则覆盖

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::workflow::{Plan, TaskId, TaskResult};

/// 最近运行的阶段及其结果，同时用于路由
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    #[default]
    Start,
    PlanningComplete,
    PlanningFailed,
    TasksExecuted,
    ExecutionFailed,
    ResponseGenerated,
    ResponseFailed,
    AwaitingHumanApproval,
    HumanLoopFailed,
}

impl Step {
    /// 全部合法取值
    pub const ALL: [Step; 9] = [
        Step::Start,
        Step::PlanningComplete,
        Step::PlanningFailed,
        Step::TasksExecuted,
        Step::ExecutionFailed,
        Step::ResponseGenerated,
        Step::ResponseFailed,
        Step::AwaitingHumanApproval,
        Step::HumanLoopFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Start => "start",
            Step::PlanningComplete => "planning_complete",
            Step::PlanningFailed => "planning_failed",
            Step::TasksExecuted => "tasks_executed",
            Step::ExecutionFailed => "execution_failed",
            Step::ResponseGenerated => "response_generated",
            Step::ResponseFailed => "response_failed",
            Step::AwaitingHumanApproval => "awaiting_human_approval",
            Step::HumanLoopFailed => "human_loop_failed",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 在各阶段之间传递、由调用方在轮次之间持久化的状态
///
/// 所有字段都有默认值，因此任意部分 JSON 都可以作为下一轮的种子。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChatState {
    pub messages: Vec<String>,
    pub plan: Option<Plan>,
    pub tool_results: BTreeMap<TaskId, TaskResult>,
    pub needs_human: bool,
    /// 调用方收集到的人工审批结果，折叠进下一轮的种子状态；只对该轮有效，轮次结束时清除
    pub human_approved: bool,
    pub current_step: Step,
    pub error_message: Option<String>,
    pub final_response: Option<String>,
}

impl ChatState {
    /// 开始新一轮：沿用种子中的历史、计划、结果与审批标记，重置步骤与本轮输出，追加用户消息
    pub fn begin_turn(seed: Option<ChatState>, user_message: impl Into<String>) -> Self {
        let mut state = seed.unwrap_or_default();
        state.current_step = Step::Start;
        state.error_message = None;
        state.final_response = None;
        state.messages.push(user_message.into());
        state
    }

    pub fn apply(&mut self, update: StateUpdate) {
        self.messages.extend(update.messages);
        if let Some(plan) = update.plan {
            self.plan = Some(plan);
        }
        self.tool_results.extend(update.tool_results);
        if let Some(needs_human) = update.needs_human {
            self.needs_human = needs_human;
        }
        if let Some(step) = update.current_step {
            self.current_step = step;
        }
        if let Some(error) = update.error_message {
            self.error_message = Some(error);
        }
        if let Some(response) = update.final_response {
            self.final_response = Some(response);
        }
    }
}

/// 单个阶段产生的状态增量
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub messages: Vec<String>,
    pub plan: Option<Plan>,
    pub tool_results: BTreeMap<TaskId, TaskResult>,
    pub needs_human: Option<bool>,
    pub current_step: Option<Step>,
    pub error_message: Option<String>,
    pub final_response: Option<String>,
}

impl StateUpdate {
    pub fn step(step: Step) -> Self {
        Self {
            current_step: Some(step),
            ..Self::default()
        }
    }

    /// 设置（或改写）本次增量的步骤
    pub fn step_to(mut self, step: Step) -> Self {
        self.current_step = Some(step);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn results<I>(mut self, results: I) -> Self
    where
        I: IntoIterator<Item = (TaskId, TaskResult)>,
    {
        self.tool_results.extend(results);
        self
    }

    pub fn needs_human(mut self, needs_human: bool) -> Self {
        self.needs_human = Some(needs_human);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    pub fn final_response(mut self, response: impl Into<String>) -> Self {
        self.final_response = Some(response.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Task;

    #[test]
    fn test_step_tokens_are_snake_case() {
        for step in Step::ALL {
            let json = serde_json::to_value(step).unwrap();
            assert_eq!(json, serde_json::Value::String(step.as_str().to_string()));
        }
        assert_eq!(Step::AwaitingHumanApproval.to_string(), "awaiting_human_approval");
    }

    #[test]
    fn test_apply_appends_and_merges() {
        let mut state = ChatState::begin_turn(None, "hi");
        state.apply(
            StateUpdate::step(Step::TasksExecuted)
                .message("Executed 1 tasks successfully")
                .results([("a".to_string(), TaskResult::completed("a", serde_json::json!(1), 1))]),
        );
        state.apply(
            StateUpdate::step(Step::ResponseGenerated)
                .results([("b".to_string(), TaskResult::failed("b", "boom", None))])
                .final_response("done"),
        );

        assert_eq!(state.messages, vec!["hi", "Executed 1 tasks successfully"]);
        assert_eq!(state.tool_results.len(), 2);
        assert_eq!(state.current_step, Step::ResponseGenerated);
        assert_eq!(state.final_response.as_deref(), Some("done"));
    }

    #[test]
    fn test_plan_is_overwritten() {
        let mut state = ChatState::default();
        state.apply(StateUpdate::default().plan(Plan::new(vec![Task::new("t1", "echo", "x")], "first")));
        state.apply(StateUpdate::default().plan(Plan::fallback("second")));
        let plan = state.plan.unwrap();
        assert_eq!(plan.reasoning, "second");
        assert!(plan.tasks.is_empty());
    }

    #[test]
    fn test_begin_turn_resets_turn_outputs_only() {
        let mut seed = ChatState::begin_turn(None, "first");
        seed.apply(
            StateUpdate::step(Step::AwaitingHumanApproval)
                .needs_human(true)
                .error("old")
                .final_response("old answer")
                .results([("t1".to_string(), TaskResult::pending_human_approval("mail"))]),
        );
        seed.human_approved = true;

        let state = ChatState::begin_turn(Some(seed), "second");
        assert_eq!(state.messages, vec!["first", "second"]);
        assert_eq!(state.current_step, Step::Start);
        assert!(state.error_message.is_none());
        assert!(state.final_response.is_none());
        assert!(state.needs_human);
        assert!(state.human_approved);
        assert!(state.tool_results.contains_key("t1"));
    }

    #[test]
    fn test_partial_json_is_valid_seed() {
        let seed: ChatState =
            serde_json::from_str(r#"{"messages": ["earlier"], "humanApproved": true}"#).unwrap();
        assert_eq!(seed.messages, vec!["earlier"]);
        assert!(seed.human_approved);
        assert_eq!(seed.current_step, Step::Start);

        let json = serde_json::to_value(ChatState::begin_turn(Some(seed), "now")).unwrap();
        assert_eq!(json["currentStep"], "start");
        assert!(json.get("toolResults").is_some());
    }
}
