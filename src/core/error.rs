//! 引擎错误类型
//!
//! 任务级错误（契约违例、工具失败、超时）只记录为单个任务的 failed 结果，不影响同批次其它任务；
//! 阶段级错误（规划失败、无计划、回复生成失败、人工环节失败）终止本轮，但仍会留下面向用户的 final_response。

use thiserror::Error;

/// 契约校验方向：调用前校验参数，调用后校验结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractDirection {
    Input,
    Output,
}

impl std::fmt::Display for ContractDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContractDirection::Input => write!(f, "input"),
            ContractDirection::Output => write!(f, "output"),
        }
    }
}

/// 编排引擎运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Contract violation ({direction}) for tool '{tool}': {details}")]
    ContractViolation {
        tool: String,
        direction: ContractDirection,
        details: String,
    },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool '{tool}' timed out after {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    /// 工具注册时 schema 本身无法编译
    #[error("Invalid contract for tool '{tool}': {details}")]
    InvalidContract { tool: String, details: String },

    /// 计划文档未通过校验（Planner 内部使用，随后降级为空计划）
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Planning failed: {0}")]
    PlanningFailure(String),

    #[error("No plan available: the plan has no tasks to execute")]
    NoPlanAvailable,

    #[error("Response generation failed: {0}")]
    ResponseGenerationFailure(String),

    #[error("Human loop failed: {0}")]
    HumanLoopFailure(String),
}
