//! 核心编排层：错误、会话状态与归约、功能门控、状态图与构建器

pub mod builder;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod state;

pub use builder::{EngineConfig, OrchestratorBuilder};
pub use error::{ContractDirection, EngineError};
pub use gate::{FeatureGate, StaticGate};
pub use orchestrator::{route, Node, Orchestrator};
pub use state::{ChatState, StateUpdate, Step};
