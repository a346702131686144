//! 各阶段的 system prompt 与上下文拼装
//!
//! 后端通过 prompt 与工具注册表绑定：工具列表（名称、描述、输入 schema）与工具调用 / 计划的 JSON Schema
//! 直接写入 system prompt，后端按约定格式回复，由 workflow::parse 解析。

use std::collections::BTreeMap;

use crate::core::ChatState;
use crate::llm::Message;
use crate::tools::{tool_call_schema_json, ToolRegistry};
use crate::workflow::{plan_schema_json, Plan, TaskId, TaskResult};

const DEFAULT_PREAMBLE: &str =
    "You are Hive, an assistant that completes user requests by orchestrating tools.";

fn tools_section(registry: &ToolRegistry) -> String {
    format!(
        "## Available tools\n{}\n\nTools marked \"sensitive\": true perform external side effects and need human approval.",
        registry.to_schema_json()
    )
}

/// Planner system prompt：直接调用工具，或给出多任务计划
pub fn planner_system_prompt(registry: &ToolRegistry, preamble: Option<&str>) -> String {
    format!(
        "{preamble}\n\n{tools}\n\n## How to respond\n\
         Reply with a single JSON document and nothing else.\n\
         1. To call tools right away, reply with JSON matching this schema \
         (a single {{\"tool\": ..., \"args\": ...}} object is also accepted):\n{calls}\n\
         2. For multi-step work, reply with a plan matching this schema. \
         Use the tool name as each task's \"type\", give every task a unique id, \
         and set \"requiresHuman\": true for tasks that use sensitive tools:\n{plan}",
        preamble = preamble.unwrap_or(DEFAULT_PREAMBLE),
        tools = tools_section(registry),
        calls = tool_call_schema_json(),
        plan = plan_schema_json(),
    )
}

/// Responder system prompt：根据计划与结果写最终答复，必要时再调用一轮工具
pub fn responder_system_prompt(registry: &ToolRegistry, preamble: Option<&str>) -> String {
    format!(
        "{preamble}\n\n{tools}\n\n## How to respond\n\
         Write the final answer for the user in plain text: summarize what ran, what failed, \
         and recommend next steps. Quote concrete values from the tool results.\n\
         If essential information is still missing you may request one more round of tool calls \
         by replying only with JSON matching:\n{calls}",
        preamble = preamble.unwrap_or(DEFAULT_PREAMBLE),
        tools = tools_section(registry),
        calls = tool_call_schema_json(),
    )
}

/// 对话记录：较早的消息作为上下文，最后一条作为本轮请求
pub fn conversation(state: &ChatState) -> String {
    let (current, history) = match state.messages.split_last() {
        Some((last, rest)) => (last.as_str(), rest),
        None => ("", &[][..]),
    };
    let mut out = String::new();
    if !history.is_empty() {
        out.push_str("Conversation so far:\n");
        for line in history {
            out.push_str("- ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }
    out.push_str("Current request: ");
    out.push_str(current);
    out
}

pub fn planner_messages(state: &ChatState, registry: &ToolRegistry, preamble: Option<&str>) -> Vec<Message> {
    vec![
        Message::system(planner_system_prompt(registry, preamble)),
        Message::user(conversation(state)),
    ]
}

/// 合成阶段的用户消息：原始请求、计划理由与全部工具结果
pub fn synthesis_context(
    request: &str,
    plan: Option<&Plan>,
    results: &BTreeMap<TaskId, TaskResult>,
) -> String {
    let reasoning = plan.map(|p| p.reasoning.as_str()).unwrap_or("");
    let results_json =
        serde_json::to_string_pretty(results).unwrap_or_else(|_| "{}".to_string());
    format!(
        "User request: {request}\n\nPlan reasoning: {reasoning}\n\nTool results (by task id):\n{results_json}"
    )
}

pub fn responder_messages(
    state: &ChatState,
    request: &str,
    results: &BTreeMap<TaskId, TaskResult>,
    registry: &ToolRegistry,
    preamble: Option<&str>,
) -> Vec<Message> {
    vec![
        Message::system(responder_system_prompt(registry, preamble)),
        Message::user(synthesis_context(request, state.plan.as_ref(), results)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;

    #[test]
    fn test_planner_prompt_binds_tools() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let prompt = planner_system_prompt(&registry, None);
        assert!(prompt.contains("\"echo\""));
        assert!(prompt.contains("tool_calls"));
        assert!(prompt.contains("tasks"));
        assert!(prompt.starts_with(DEFAULT_PREAMBLE));

        let custom = planner_system_prompt(&registry, Some("You are a test bot."));
        assert!(custom.starts_with("You are a test bot."));
    }

    #[test]
    fn test_conversation_marks_current_request() {
        let state = ChatState {
            messages: vec!["earlier".to_string(), "now".to_string()],
            ..ChatState::default()
        };
        let text = conversation(&state);
        assert!(text.contains("- earlier"));
        assert!(text.ends_with("Current request: now"));
    }
}
