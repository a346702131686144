//! 图中的四个阶段：Planner、Task Runner、Responder、Human Loop
//!
//! 每个阶段读取当前 ChatState，返回 StateUpdate，由 Orchestrator 归约；阶段之间不共享可变状态。

pub mod human_loop;
pub mod planner;
pub mod prompts;
pub mod responder;
pub mod task_runner;

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::core::{EngineConfig, FeatureGate};
use crate::llm::LlmClient;
use crate::tools::{ExecutionMode, Invocation, ToolDispatcher};
use crate::workflow::{Task, TaskId, TaskResult, ToolCall};

/// 阶段运行所需的协作者，Orchestrator 构建时注入
pub struct StageContext {
    pub llm: Arc<dyn LlmClient>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub gate: Arc<dyn FeatureGate>,
    pub config: EngineConfig,
}

impl StageContext {
    /// 本次阶段的执行模式：配置、后端与门控三者都允许时才并行
    pub fn execution_mode(&self) -> ExecutionMode {
        if self.config.parallel_tools
            && self.llm.supports_parallel_tools()
            && self.gate.allows_parallel()
        {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        }
    }
}

/// 后端直接发起的一批工具调用的执行结果
pub(crate) struct InlineBatch {
    /// 与调用一一对应的任务（敏感工具已标记 requires_human）
    pub tasks: Vec<Task>,
    /// 实际执行过的任务 ID
    pub executed: Vec<TaskId>,
    pub results: Vec<(TaskId, TaskResult)>,
}

/// 执行后端直接发起的调用：敏感工具未获批准时只记录 pending_human_approval，其余按执行模式分发。
/// `taken` 中已有的 ID 不会被复用，保证新结果不覆盖旧结果。
pub(crate) async fn dispatch_inline(
    ctx: &StageContext,
    calls: Vec<ToolCall>,
    human_approved: bool,
    mode: ExecutionMode,
    taken: &HashSet<TaskId>,
) -> InlineBatch {
    let registry = ctx.dispatcher.registry();
    let mut seen: HashSet<TaskId> = HashSet::new();
    let mut tasks = Vec::with_capacity(calls.len());
    let mut invocations = Vec::new();
    let mut results = Vec::new();

    for mut call in calls {
        if call.args.is_null() {
            call.args = Value::Object(Default::default());
        }
        let mut id = call.call_id();
        while taken.contains(&id) || seen.contains(&id) {
            id = ToolCall::new(call.tool.clone(), Value::Null).call_id();
        }
        seen.insert(id.clone());

        let sensitive = registry.is_sensitive(&call.tool);
        let description = format!("Call {}", call.tool);
        let task = Task::new(id.clone(), call.tool.clone(), description.clone())
            .with_params(call.args.clone())
            .with_requires_human(sensitive);

        if sensitive && !human_approved {
            tracing::info!(tool = %call.tool, task = %id, "sensitive tool call deferred for approval");
            results.push((id, TaskResult::pending_human_approval(description)));
        } else {
            invocations.push(Invocation {
                id,
                tool: call.tool,
                args: call.args,
                description,
            });
        }
        tasks.push(task);
    }

    let executed: Vec<TaskId> = invocations.iter().map(|inv| inv.id.clone()).collect();
    results.extend(ctx.dispatcher.run_batch(invocations, mode).await);

    InlineBatch {
        tasks,
        executed,
        results,
    }
}
