//! Responder 阶段
//!
//! 根据原始请求、计划与工具结果合成最终答复。后端可以再请求一轮工具调用：结果以新 key 合并后
//! 再合成一次。后端失败时仍给出道歉与已执行内容的摘要，final_response 永不为空。

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use crate::core::{ChatState, EngineError, StateUpdate, Step};
use crate::stages::{dispatch_inline, prompts, StageContext};
use crate::workflow::{parse_backend_output, BackendOutput, TaskId, TaskResult, TaskStatus};

/// 不依赖后端的结果摘要：逐项列出已完成、失败与待审批的任务
pub fn summarize_results(results: &BTreeMap<TaskId, TaskResult>) -> String {
    if results.is_empty() {
        return "No tools were run for this request.".to_string();
    }
    let mut lines = Vec::with_capacity(results.len() + 1);
    lines.push("Here is what happened:".to_string());
    for (id, result) in results {
        let line = match result.status {
            TaskStatus::Completed => format!(
                "- [{id}] {}: completed -> {}",
                result.task,
                result.result.as_ref().map(compact).unwrap_or_default()
            ),
            TaskStatus::Failed => format!(
                "- [{id}] {}: failed ({})",
                result.task,
                result.error.as_deref().unwrap_or("unknown error")
            ),
            TaskStatus::PendingHumanApproval => {
                format!("- [{id}] {}: waiting for human approval", result.task)
            }
        };
        lines.push(line);
    }
    if results.values().any(|r| r.status == TaskStatus::Failed) {
        lines.push("Failed steps can be retried by sending the request again.".to_string());
    }
    lines.join("\n")
}

fn compact(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn apology(err: &EngineError, results: &BTreeMap<TaskId, TaskResult>) -> String {
    format!(
        "I'm sorry, I ran into a problem while writing the answer ({err}).\n\n{}",
        summarize_results(results)
    )
}

fn failed(err: EngineError, update: StateUpdate, results: &BTreeMap<TaskId, TaskResult>) -> StateUpdate {
    tracing::error!(error = %err, "responder failed");
    let text = apology(&err, results);
    update
        .error(err.to_string())
        .message(text.clone())
        .final_response(text)
        .step_to(Step::ResponseFailed)
}

/// 本轮计划涉及的结果；历史轮次的条目仍留在 state 中，但不进入合成
fn turn_results(state: &ChatState) -> BTreeMap<TaskId, TaskResult> {
    let Some(plan) = &state.plan else {
        return BTreeMap::new();
    };
    plan.tasks
        .iter()
        .filter_map(|task| {
            state
                .tool_results
                .get(&task.id)
                .map(|result| (task.id.clone(), result.clone()))
        })
        .collect()
}

/// `request` 为本轮的用户消息
pub async fn run(ctx: &StageContext, state: &ChatState, request: &str) -> StateUpdate {
    let registry = ctx.dispatcher.registry();
    let preamble = ctx.config.system_prompt.as_deref();
    let mode = ctx.execution_mode();
    let mut results = turn_results(state);
    let mut update = StateUpdate::default();

    let messages = prompts::responder_messages(state, request, &results, registry, preamble);
    let first = match ctx.llm.complete(&messages).await {
        Ok(text) => text,
        Err(e) => return failed(EngineError::ResponseGenerationFailure(e.to_string()), update, &results),
    };

    let answer = match parse_backend_output(&first) {
        BackendOutput::Text(text) => text,
        BackendOutput::PlanDocument(_) => {
            tracing::warn!("responder got a plan document, using result summary");
            summarize_results(&results)
        }
        BackendOutput::ToolCalls(calls) => {
            tracing::info!(calls = calls.len(), ?mode, "responder requested another tool round");
            let taken: HashSet<TaskId> = state.tool_results.keys().cloned().collect();
            let batch = dispatch_inline(ctx, calls, state.human_approved, mode, &taken).await;
            results.extend(batch.results.iter().cloned());
            update = update.results(batch.results);

            let messages = prompts::responder_messages(state, request, &results, registry, preamble);
            match ctx.llm.complete(&messages).await {
                Err(e) => {
                    return failed(EngineError::ResponseGenerationFailure(e.to_string()), update, &results)
                }
                Ok(second) => match parse_backend_output(&second) {
                    BackendOutput::Text(text) => text,
                    _ => {
                        tracing::warn!("second synthesis was not plain text, using result summary");
                        summarize_results(&results)
                    }
                },
            }
        }
    };

    let answer = if answer.trim().is_empty() {
        summarize_results(&results)
    } else {
        answer
    };
    tracing::info!(chars = answer.len(), "response generated");
    update
        .message(answer.clone())
        .final_response(answer)
        .step_to(Step::ResponseGenerated)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::core::{EngineConfig, StaticGate};
    use crate::llm::{LlmClient, LlmError, MockLlmClient};
    use crate::tools::{EchoTool, ToolDispatcher, ToolRegistry};
    use crate::workflow::{Plan, Task};

    fn ctx(mock: Arc<MockLlmClient>) -> StageContext {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        StageContext {
            llm: mock as Arc<dyn LlmClient>,
            dispatcher: Arc::new(ToolDispatcher::new(Arc::new(registry), 5, 4)),
            gate: Arc::new(StaticGate::default()),
            config: EngineConfig::default(),
        }
    }

    fn state() -> ChatState {
        let mut state = ChatState::begin_turn(None, "weather in Paris?");
        state.plan = Some(Plan::new(
            vec![Task::new("t1", "weather", "Weather in Paris").with_params(json!({"location": "Paris"}))],
            "look it up",
        ));
        state.tool_results.insert(
            "t1".to_string(),
            TaskResult::completed("Weather in Paris", json!({"location": "Paris", "temperature": 22.0}), 3),
        );
        state
    }

    #[tokio::test]
    async fn test_plain_answer() {
        let mock = Arc::new(MockLlmClient::with_responses(["It is 22°C in Paris."]));
        let update = run(&ctx(Arc::clone(&mock)), &state(), "weather in Paris?").await;
        assert_eq!(update.current_step, Some(Step::ResponseGenerated));
        assert_eq!(update.final_response.as_deref(), Some("It is 22°C in Paris."));
        assert_eq!(update.messages, vec!["It is 22°C in Paris."]);

        let prompt = &mock.calls()[0][1].content;
        assert!(prompt.contains("weather in Paris?"));
        assert!(prompt.contains("temperature"));
    }

    #[tokio::test]
    async fn test_second_round_merges_new_keys() {
        let mock = Arc::new(MockLlmClient::with_responses([
            r#"{"tool_calls": [{"id": "t1", "tool": "echo", "args": {"text": "more"}}]}"#,
            "Done: Paris is 22 degrees and echo said more.",
        ]));
        let update = run(&ctx(Arc::clone(&mock)), &state(), "weather in Paris?").await;

        assert_eq!(update.current_step, Some(Step::ResponseGenerated));
        // t1 已存在，新结果使用新 ID，旧结果不被覆盖
        assert_eq!(update.tool_results.len(), 1);
        assert!(!update.tool_results.contains_key("t1"));
        assert_eq!(mock.call_count(), 2);
        assert!(mock.calls()[1][1].content.contains("more"));
    }

    #[tokio::test]
    async fn test_repeated_tool_calls_fall_back_to_summary() {
        let mock = Arc::new(MockLlmClient::new());
        let update = run(&ctx(mock), &state(), "weather in Paris?").await;
        let text = update.final_response.unwrap();
        assert!(text.contains("Weather in Paris"));
        assert!(text.contains("22"));
        assert_eq!(update.current_step, Some(Step::ResponseGenerated));
    }

    #[tokio::test]
    async fn test_backend_failure_still_answers() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_error(LlmError::Timeout(60));
        let update = run(&ctx(mock), &state(), "weather in Paris?").await;
        assert_eq!(update.current_step, Some(Step::ResponseFailed));
        assert!(update.error_message.unwrap().contains("timed out"));
        let text = update.final_response.unwrap();
        assert!(text.starts_with("I'm sorry"));
        assert!(text.contains("Weather in Paris"));
    }

    #[tokio::test]
    async fn test_earlier_turn_results_stay_out_of_the_answer() {
        let mut state = state();
        state.tool_results.insert(
            "old".to_string(),
            TaskResult::pending_human_approval("Email the board"),
        );
        let mock = Arc::new(MockLlmClient::new());
        mock.push_error(LlmError::EmptyResponse);
        let update = run(&ctx(mock), &state, "weather in Paris?").await;

        let text = update.final_response.unwrap();
        assert!(text.contains("Weather in Paris"));
        assert!(!text.contains("Email the board"));
        assert!(update.tool_results.is_empty());
    }

    #[tokio::test]
    async fn test_second_round_ids_avoid_earlier_turns() {
        let mut state = state();
        state
            .tool_results
            .insert("c1".to_string(), TaskResult::completed("Echo old", json!("old"), 1));
        let mock = Arc::new(MockLlmClient::with_responses([
            r#"{"tool_calls": [{"id": "c1", "tool": "echo", "args": {"text": "new"}}]}"#,
            "ok",
        ]));
        let update = run(&ctx(Arc::clone(&mock)), &state, "weather in Paris?").await;

        assert!(!update.tool_results.contains_key("c1"));
        assert_eq!(update.tool_results.len(), 1);
        let prompt = &mock.calls()[1][1].content;
        assert!(prompt.contains("new"));
        assert!(!prompt.contains("Echo old"));
    }

    #[test]
    fn test_summary_mentions_failures() {
        let mut results = BTreeMap::new();
        results.insert("a".to_string(), TaskResult::failed("Send report", "smtp down", None));
        results.insert("b".to_string(), TaskResult::pending_human_approval("Email boss"));
        let text = summarize_results(&results);
        assert!(text.contains("Send report: failed (smtp down)"));
        assert!(text.contains("Email boss: waiting for human approval"));
        assert!(text.contains("retried"));
    }
}
