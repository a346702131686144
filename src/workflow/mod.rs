pub mod builder;
pub mod parse;
pub mod types;

pub use builder::PlanBuilder;
pub use parse::{parse_backend_output, parse_plan_document, plan_schema_json, BackendOutput, ToolCall};
pub use types::*;
