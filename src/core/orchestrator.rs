//! 编排器：状态图主循环
//!
//! 节点：Planner → (Human Loop | Task Runner | Responder) → … → End。每个节点读取当前 ChatState、
//! 返回 StateUpdate，由 `ChatState::apply` 归约；同一时刻只有一个节点持有状态。
//! `run` 执行到终点并返回最终状态，`stream` 在每个节点结束后产出一份快照。

use std::sync::Arc;

use futures_util::stream::{self, Stream};

use crate::core::{ChatState, StateUpdate, Step};
use crate::stages::{human_loop, planner, responder, task_runner, StageContext};
use crate::tools::ToolRegistry;

/// 图中的节点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Planner,
    TaskRunner,
    Responder,
    HumanLoop,
    End,
}

/// 路由表：根据刚运行完的节点与归约后的状态决定下一个节点
pub fn route(from: Node, state: &ChatState) -> Node {
    match from {
        Node::Planner => {
            if state.error_message.is_some() {
                Node::End
            } else if state.needs_human && state.current_step == Step::PlanningComplete {
                Node::HumanLoop
            } else if state.plan.as_ref().is_some_and(|p| p.is_inline()) {
                // 直接调用已在 Planner 中执行，不再交给 Task Runner
                Node::Responder
            } else {
                Node::TaskRunner
            }
        }
        Node::TaskRunner => {
            if state.error_message.is_some() || state.current_step == Step::AwaitingHumanApproval {
                Node::End
            } else {
                Node::Responder
            }
        }
        Node::Responder | Node::HumanLoop | Node::End => Node::End,
    }
}

/// 编排器：可廉价克隆，克隆共享同一套后端、工具与配置
#[derive(Clone)]
pub struct Orchestrator {
    ctx: Arc<StageContext>,
}

impl Orchestrator {
    pub(crate) fn new(ctx: StageContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn registry(&self) -> &ToolRegistry {
        self.ctx.dispatcher.registry()
    }

    async fn execute(&self, node: Node, state: &ChatState, request: &str) -> StateUpdate {
        match node {
            Node::Planner => planner::run(&self.ctx, state).await,
            Node::TaskRunner => task_runner::run(&self.ctx, state).await,
            Node::Responder => responder::run(&self.ctx, state, request).await,
            Node::HumanLoop => human_loop::run(state),
            Node::End => StateUpdate::default(),
        }
    }

    /// 运行一个节点并归约，返回下一个节点
    async fn advance(&self, node: Node, state: &mut ChatState, request: &str) -> Node {
        let update = self.execute(node, state, request).await;
        state.apply(update);
        let next = route(node, state);
        if next == Node::End {
            // 批准只对播种它的这一轮有效
            state.human_approved = false;
        }
        tracing::info!(
            node = ?node,
            step = %state.current_step,
            next = ?next,
            messages = state.messages.len(),
            results = state.tool_results.len(),
            "stage finished"
        );
        next
    }

    /// 执行一轮直到终点，返回完整的最终状态
    pub async fn run(&self, user_message: &str, previous: Option<ChatState>) -> ChatState {
        let mut state = ChatState::begin_turn(previous, user_message);
        tracing::info!(turn_messages = state.messages.len(), "turn started");

        let mut node = Node::Planner;
        while node != Node::End {
            node = self.advance(node, &mut state, user_message).await;
        }

        if let Some(error) = &state.error_message {
            tracing::warn!(step = %state.current_step, error = %error, "turn ended with error");
        }
        state
    }

    /// 与 `run` 相同的执行过程，但在每个节点结束后产出一份状态快照；终点快照之后结束
    pub fn stream(
        &self,
        user_message: &str,
        previous: Option<ChatState>,
    ) -> impl Stream<Item = ChatState> + Send + 'static {
        let orchestrator = self.clone();
        let request = user_message.to_string();
        let state = ChatState::begin_turn(previous, user_message);

        stream::unfold(
            (orchestrator, request, state, Node::Planner),
            |(orchestrator, request, mut state, node)| async move {
                if node == Node::End {
                    return None;
                }
                let next = orchestrator.advance(node, &mut state, &request).await;
                let snapshot = state.clone();
                Some((snapshot, (orchestrator, request, state, next)))
            },
        )
    }
}
