//! 工具调度器
//!
//! 持有 ToolRegistry、单次调用超时与并发许可；invoke 在超时内调用 registry.dispatch 并输出 JSON 审计日志，
//! run_batch 按执行模式串行或并发（fan-out / fan-in）执行一批调用，返回与输入同序的 TaskResult。
//! 结果只在全部调用结束后返回，由调用方统一合并，避免并发写结果表。

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::core::EngineError;
use crate::tools::registry::DispatchReport;
use crate::tools::ToolRegistry;
use crate::workflow::{TaskId, TaskResult};

/// 执行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

/// 批次中的一次调用
#[derive(Debug, Clone)]
pub struct Invocation {
    pub id: TaskId,
    pub tool: String,
    pub args: Value,
    /// 任务描述，回显到 TaskResult.task
    pub description: String,
}

/// 工具调度器：对每次调用施加超时，并限制并发批次的同时执行数
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64, max_concurrent: usize) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 执行单个工具；超时记为 ToolTimeout；输出 JSON 审计日志
    pub async fn invoke(&self, tool: &str, args: Value) -> DispatchReport {
        let preview = args_preview(&args);
        let report = match timeout(self.timeout, self.registry.dispatch(tool, args)).await {
            Ok(report) => report,
            Err(_) => DispatchReport {
                outcome: Err(EngineError::ToolTimeout {
                    tool: tool.to_string(),
                    secs: self.timeout.as_secs(),
                }),
                elapsed_ms: Some(self.timeout.as_millis() as u64),
            },
        };

        let outcome = match &report.outcome {
            Ok(_) => "ok",
            Err(EngineError::ContractViolation { .. }) | Err(EngineError::UnknownTool(_)) => "contract",
            Err(EngineError::ToolTimeout { .. }) => "timeout",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool,
            "ok": report.outcome.is_ok(),
            "outcome": outcome,
            "duration_ms": report.elapsed_ms,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        report
    }

    /// 执行一批调用；单个失败不影响其它调用，返回顺序与输入一致
    pub async fn run_batch(
        &self,
        invocations: Vec<Invocation>,
        mode: ExecutionMode,
    ) -> Vec<(TaskId, TaskResult)> {
        if mode == ExecutionMode::Sequential || invocations.len() <= 1 {
            let mut results = Vec::with_capacity(invocations.len());
            for inv in invocations {
                let report = self.invoke(&inv.tool, inv.args).await;
                results.push((inv.id, to_task_result(inv.description, report)));
            }
            return results;
        }

        tracing::debug!(batch = invocations.len(), "dispatching tool batch in parallel");
        let futures = invocations.into_iter().map(|inv| async move {
            let _permit = self.permits.acquire().await.ok();
            let report = self.invoke(&inv.tool, inv.args).await;
            (inv.id, to_task_result(inv.description, report))
        });
        join_all(futures).await
    }
}

fn to_task_result(description: String, report: DispatchReport) -> TaskResult {
    match report.outcome {
        Ok(value) => TaskResult::completed(description, value, report.elapsed_ms.unwrap_or(0)),
        Err(err) => TaskResult::failed(description, err.to_string(), report.elapsed_ms),
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
