//! Task Runner 阶段
//!
//! 按优先级降序（同级保持原顺序）执行计划中的任务。需要人工确认的任务在 needs_human 为 true 时
//! 只记录 pending_human_approval；其余任务经调度器执行，单个失败不影响其它任务。
//! 结果在整批结束后一次性合并。

use crate::core::{ChatState, EngineError, StateUpdate, Step};
use crate::stages::{human_loop, StageContext};
use crate::tools::Invocation;
use crate::workflow::TaskResult;

pub async fn run(ctx: &StageContext, state: &ChatState) -> StateUpdate {
    let Some(plan) = state.plan.as_ref().filter(|p| !p.tasks.is_empty()) else {
        let err = EngineError::NoPlanAvailable;
        tracing::error!(error = %err, "task runner has nothing to execute");
        return StateUpdate::step(Step::ExecutionFailed)
            .error(err.to_string())
            .final_response(
                "I'm sorry, I couldn't find any concrete steps to carry out for this request. \
                 Could you rephrase it or add more detail?",
            );
    };

    let mode = ctx.execution_mode();
    let mut deferred = Vec::new();
    let mut invocations = Vec::new();
    for task in plan.tasks_by_priority() {
        if task.requires_human && state.needs_human {
            deferred.push((task.id.clone(), TaskResult::pending_human_approval(task.description.clone())));
        } else {
            invocations.push(Invocation {
                id: task.id.clone(),
                tool: task.tool.clone(),
                args: task.args(),
                description: task.description.clone(),
            });
        }
    }

    tracing::info!(
        execute = invocations.len(),
        deferred = deferred.len(),
        ?mode,
        "running plan tasks"
    );
    let results = ctx.dispatcher.run_batch(invocations, mode).await;
    let succeeded = results.iter().filter(|(_, r)| r.is_completed()).count();
    let failed = results.len() - succeeded;
    if failed > 0 {
        tracing::warn!(failed, "some tasks failed");
    }

    let update = StateUpdate::default()
        .message(format!("Executed {succeeded} tasks successfully"))
        .results(results);

    if deferred.is_empty() {
        update.step_to(Step::TasksExecuted)
    } else {
        update
            .results(deferred)
            .needs_human(true)
            .final_response(human_loop::escalation_text(plan))
            .step_to(Step::AwaitingHumanApproval)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use serde_json::{json, Value};

    use super::*;
    use crate::core::{EngineConfig, StaticGate};
    use crate::llm::MockLlmClient;
    use crate::tools::{FnTool, ToolDispatcher, ToolRegistry};
    use crate::workflow::{Plan, Priority, Task, TaskStatus};

    fn ctx_with_log(log: Arc<Mutex<Vec<String>>>) -> StageContext {
        let mut registry = ToolRegistry::new();
        registry
            .register(FnTool::new("record", "Record a label", move |args: Value| {
                let log = Arc::clone(&log);
                async move {
                    let label = args["label"].as_str().unwrap_or_default().to_string();
                    log.lock().unwrap().push(label.clone());
                    Ok(json!({ "label": label }))
                }
            }))
            .unwrap();
        registry
            .register(FnTool::new("explode", "Fails", |_| async { Err("handler exploded".to_string()) }))
            .unwrap();
        StageContext {
            llm: Arc::new(MockLlmClient::new()),
            dispatcher: Arc::new(ToolDispatcher::new(Arc::new(registry), 5, 4)),
            gate: Arc::new(StaticGate::default()),
            config: EngineConfig::default(),
        }
    }

    fn record(id: &str, priority: Priority) -> Task {
        Task::new(id, "record", format!("record {id}"))
            .with_params(json!({ "label": id }))
            .with_priority(priority)
    }

    fn state_with(plan: Plan, needs_human: bool) -> ChatState {
        ChatState {
            messages: vec!["go".to_string()],
            plan: Some(plan),
            needs_human,
            ..ChatState::default()
        }
    }

    #[tokio::test]
    async fn test_empty_plan_is_execution_failure() {
        let ctx = ctx_with_log(Arc::default());
        let update = run(&ctx, &state_with(Plan::fallback(""), false)).await;
        assert_eq!(update.current_step, Some(Step::ExecutionFailed));
        assert!(update.error_message.unwrap().contains("No plan available"));
        assert!(update.final_response.is_some());

        let update = run(&ctx, &ChatState::default()).await;
        assert_eq!(update.current_step, Some(Step::ExecutionFailed));
    }

    #[tokio::test]
    async fn test_runs_in_priority_order_sequentially() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ctx = ctx_with_log(Arc::clone(&log));
        let plan = Plan::new(
            vec![
                record("low", Priority::Low),
                record("high", Priority::High),
                record("mid", Priority::Medium),
            ],
            "",
        );
        let update = run(&ctx, &state_with(plan, false)).await;
        assert_eq!(update.current_step, Some(Step::TasksExecuted));
        assert_eq!(*log.lock().unwrap(), vec!["high", "mid", "low"]);
        assert_eq!(update.messages, vec!["Executed 3 tasks successfully"]);
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_siblings() {
        let ctx = ctx_with_log(Arc::default());
        let plan = Plan::new(
            vec![Task::new("boom", "explode", "explode"), record("ok", Priority::Low)],
            "",
        );
        let update = run(&ctx, &state_with(plan, false)).await;
        assert_eq!(update.tool_results["boom"].status, TaskStatus::Failed);
        assert!(update.tool_results["boom"].error.as_ref().unwrap().contains("handler exploded"));
        assert_eq!(update.tool_results["ok"].status, TaskStatus::Completed);
        assert!(update.error_message.is_none());
    }

    #[tokio::test]
    async fn test_human_task_pending_iff_needs_human() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ctx = ctx_with_log(Arc::clone(&log));
        let plan = Plan::new(
            vec![record("gated", Priority::Medium).with_requires_human(true), record("free", Priority::Medium)],
            "",
        );

        let update = run(&ctx, &state_with(plan.clone(), true)).await;
        assert_eq!(update.tool_results["gated"].status, TaskStatus::PendingHumanApproval);
        assert_eq!(update.tool_results["free"].status, TaskStatus::Completed);
        assert_eq!(update.current_step, Some(Step::AwaitingHumanApproval));
        assert!(update.final_response.unwrap().contains("record gated"));
        assert_eq!(*log.lock().unwrap(), vec!["free"]);

        let update = run(&ctx, &state_with(plan, false)).await;
        assert_eq!(update.tool_results["gated"].status, TaskStatus::Completed);
        assert_eq!(update.current_step, Some(Step::TasksExecuted));
    }
}
