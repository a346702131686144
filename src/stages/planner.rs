//! Planner 阶段
//!
//! 把对话交给推理后端，按回复形态分两路：
//! - 直接工具调用：立即执行（敏感工具未获批准时挂起），生成 Inline 计划，随后跳过 Task Runner
//! - 结构化计划：按计划契约校验，失败时降级为空计划而不是终止本轮
//! 后端调用本身失败时本轮终止（planning_failed）。

use std::collections::HashSet;

use crate::core::{ChatState, EngineError, StateUpdate, Step};
use crate::stages::{dispatch_inline, prompts, StageContext};
use crate::workflow::{parse_backend_output, parse_plan_document, BackendOutput, Plan, PlanSource, ToolCall};

pub async fn run(ctx: &StageContext, state: &ChatState) -> StateUpdate {
    let registry = ctx.dispatcher.registry();
    let messages = prompts::planner_messages(state, registry, ctx.config.system_prompt.as_deref());
    tracing::debug!(prompt = %prompts::conversation(state), "planner request");

    let output = match ctx.llm.complete(&messages).await {
        Ok(output) => output,
        Err(e) => {
            let err = EngineError::PlanningFailure(e.to_string());
            tracing::error!(error = %err, "planner backend call failed");
            return StateUpdate::step(Step::PlanningFailed)
                .error(err.to_string())
                .final_response(
                    "I'm sorry, I couldn't work out a plan for your request right now. Please try again.",
                );
        }
    };

    let plan = match parse_backend_output(&output) {
        BackendOutput::ToolCalls(calls) => return run_inline(ctx, state, calls).await,
        BackendOutput::PlanDocument(value) => match parse_plan_document(&value) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(error = %e, "plan document rejected, using empty plan");
                Plan::fallback(format!("Plan could not be validated: {e}"))
            }
        },
        BackendOutput::Text(text) => {
            tracing::warn!("backend replied without tools or plan, using empty plan");
            Plan::fallback(text)
        }
    };

    declared(ctx, state, plan)
}

/// 结构化计划：绑定敏感工具的任务一律需要人工确认
fn declared(ctx: &StageContext, state: &ChatState, mut plan: Plan) -> StateUpdate {
    let registry = ctx.dispatcher.registry();
    for task in plan.tasks.iter_mut() {
        if registry.is_sensitive(&task.tool) {
            task.requires_human = true;
        }
    }
    plan.normalize();

    let needs_human = plan.requires_human_approval && !state.human_approved;
    tracing::info!(
        tasks = plan.tasks.len(),
        complexity = ?plan.estimated_complexity,
        needs_human,
        "plan declared"
    );
    StateUpdate::step(Step::PlanningComplete)
        .plan(plan)
        .needs_human(needs_human)
}

async fn run_inline(ctx: &StageContext, state: &ChatState, calls: Vec<ToolCall>) -> StateUpdate {
    let mode = ctx.execution_mode();
    tracing::info!(calls = calls.len(), ?mode, "planner executing direct tool calls");

    let taken: HashSet<_> = state.tool_results.keys().cloned().collect();
    let batch = dispatch_inline(ctx, calls, state.human_approved, mode, &taken).await;

    let reasoning = format!(
        "Backend called {} tool(s) directly: {}",
        batch.tasks.len(),
        batch
            .tasks
            .iter()
            .map(|t| t.tool.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    let mut plan = Plan::new(batch.tasks, reasoning);
    plan.source = PlanSource::Inline {
        executed: batch.executed,
    };

    let needs_human = plan.requires_human_approval && !state.human_approved;
    StateUpdate::step(Step::PlanningComplete)
        .plan(plan)
        .results(batch.results)
        .needs_human(needs_human)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::{EngineConfig, StaticGate};
    use crate::llm::{LlmError, MockLlmClient};
    use crate::tools::{EchoTool, SendEmailTool, ToolDispatcher, ToolRegistry};
    use crate::workflow::TaskStatus;

    fn ctx(mock: MockLlmClient) -> StageContext {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        registry.register(SendEmailTool::new()).unwrap();
        StageContext {
            llm: Arc::new(mock),
            dispatcher: Arc::new(ToolDispatcher::new(Arc::new(registry), 5, 4)),
            gate: Arc::new(StaticGate::default()),
            config: EngineConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_direct_call_runs_inline() {
        let ctx = ctx(MockLlmClient::with_responses([
            r#"{"tool": "echo", "args": {"text": "hi"}}"#,
        ]));
        let mut state = ChatState::begin_turn(None, "say hi");
        state.apply(run(&ctx, &state).await);

        assert_eq!(state.current_step, Step::PlanningComplete);
        let plan = state.plan.as_ref().unwrap();
        assert!(plan.is_inline());
        assert!(!state.needs_human);
        let result = state.tool_results.values().next().unwrap();
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.result.as_ref().unwrap()["text"], "hi");
    }

    #[tokio::test]
    async fn test_direct_sensitive_call_is_deferred() {
        let ctx = ctx(MockLlmClient::with_responses([
            r#"{"tool": "send_email", "args": {"to": "a@b.c", "subject": "s", "body": "b"}}"#,
        ]));
        let state = ChatState::begin_turn(None, "mail it");
        let update = run(&ctx, &state).await;

        assert_eq!(update.needs_human, Some(true));
        let plan = update.plan.unwrap();
        assert!(plan.requires_human_approval);
        assert_eq!(plan.source, PlanSource::Inline { executed: vec![] });
        let (_, result) = update.tool_results.iter().next().unwrap();
        assert_eq!(result.status, TaskStatus::PendingHumanApproval);
    }

    #[tokio::test]
    async fn test_declared_plan_marks_sensitive_tasks() {
        let ctx = ctx(MockLlmClient::with_responses([
            r#"{"tasks": [{"id": "t1", "type": "send_email", "description": "Mail Bob"}], "reasoning": "mail"}"#,
        ]));
        let state = ChatState::begin_turn(None, "mail bob");
        let update = run(&ctx, &state).await;
        let plan = update.plan.unwrap();
        assert!(plan.tasks[0].requires_human);
        assert!(plan.requires_human_approval);
        assert_eq!(update.needs_human, Some(true));
        assert!(update.tool_results.is_empty());
    }

    #[tokio::test]
    async fn test_approved_seed_clears_needs_human() {
        let ctx = ctx(MockLlmClient::with_responses([
            r#"{"tasks": [{"id": "t1", "type": "send_email", "description": "Mail Bob"}]}"#,
        ]));
        let seed = ChatState {
            human_approved: true,
            ..ChatState::default()
        };
        let state = ChatState::begin_turn(Some(seed), "mail bob");
        let update = run(&ctx, &state).await;
        assert_eq!(update.needs_human, Some(false));
    }

    #[tokio::test]
    async fn test_invalid_plan_falls_back_to_empty() {
        let ctx = ctx(MockLlmClient::with_responses([r#"{"tasks": "not a list"}"#]));
        let state = ChatState::begin_turn(None, "do things");
        let update = run(&ctx, &state).await;
        assert_eq!(update.current_step, Some(Step::PlanningComplete));
        let plan = update.plan.unwrap();
        assert!(plan.tasks.is_empty());
        assert_eq!(plan.estimated_complexity, crate::workflow::Complexity::Simple);
    }

    #[tokio::test]
    async fn test_backend_failure_is_planning_failed() {
        let mock = MockLlmClient::new();
        mock.push_error(LlmError::Api("unreachable".to_string()));
        let ctx = ctx(mock);
        let state = ChatState::begin_turn(None, "anything");
        let update = run(&ctx, &state).await;
        assert_eq!(update.current_step, Some(Step::PlanningFailed));
        assert!(update.error_message.unwrap().contains("unreachable"));
        assert!(update.final_response.is_some());
        assert!(update.plan.is_none());
    }
}
