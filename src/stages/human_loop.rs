//! Human Loop 阶段：终止本轮并把需要人工签字的任务交给调用方
//!
//! 调用方收集审批结果后，在下一轮的种子状态中设置 humanApproved 重新调用引擎。

use crate::core::{ChatState, EngineError, StateUpdate, Step};
use crate::workflow::Plan;

/// 人工审批说明：列出每个需要确认的任务（描述与工具类型）以及 Planner 的理由
pub fn escalation_text(plan: &Plan) -> String {
    let mut text = String::from("Human approval is required before I can continue.\n\nTasks awaiting approval:\n");
    let mut any = false;
    for task in plan.human_tasks() {
        any = true;
        text.push_str(&format!("- {} (type: {}, id: {})\n", task.description, task.tool, task.id));
    }
    if !any {
        text.push_str("- (the plan as a whole was flagged for review)\n");
    }
    if !plan.reasoning.trim().is_empty() {
        text.push_str(&format!("\nReasoning: {}\n", plan.reasoning.trim()));
    }
    text.push_str("\nReply with your approval to proceed, or tell me what to change.");
    text
}

pub fn run(state: &ChatState) -> StateUpdate {
    let Some(plan) = state.plan.as_ref() else {
        let err = EngineError::HumanLoopFailure("no plan to escalate".to_string());
        tracing::error!(error = %err, "human loop failed");
        return StateUpdate::step(Step::HumanLoopFailed)
            .error(err.to_string())
            .final_response(
                "I'm sorry, this request needs human review but I couldn't prepare the approval summary.",
            );
    };

    let text = escalation_text(plan);
    tracing::info!(tasks = plan.human_tasks().count(), "escalating to human");
    StateUpdate::step(Step::AwaitingHumanApproval)
        .needs_human(true)
        .message(text.clone())
        .final_response(text)
}
