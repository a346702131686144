pub mod dispatcher;
pub mod echo;
pub mod email;
pub mod registry;
pub mod schema;
pub mod weather;

pub use dispatcher::{ExecutionMode, Invocation, ToolDispatcher};
pub use echo::EchoTool;
pub use email::SendEmailTool;
pub use registry::{DispatchReport, FnTool, Tool, ToolRegistry};
pub use schema::{tool_call_schema_json, Contract};
pub use weather::WeatherTool;
