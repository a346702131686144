//! 工具契约（JSON Schema）与工具调用格式 Schema
//!
//! Contract 在注册时编译一次 schema，之后每次调用前后用它校验参数与结果；
//! 可由 `schemars` 从 Rust 类型派生，也可直接给出 JSON。

use std::collections::HashMap;
use std::sync::Arc;

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

use crate::core::EngineError;

/// 已编译的 JSON Schema 契约
#[derive(Clone)]
pub struct Contract {
    schema: Value,
    validator: Arc<jsonschema::Validator>,
}

impl std::fmt::Debug for Contract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Contract").field("schema", &self.schema).finish()
    }
}

impl Contract {
    /// 从 JSON Schema 创建；schema 本身非法时返回 InvalidContract
    pub fn new(schema: Value) -> Result<Self, EngineError> {
        let validator = jsonschema::validator_for(&schema).map_err(|e| EngineError::InvalidContract {
            tool: String::new(),
            details: e.to_string(),
        })?;
        Ok(Self {
            schema,
            validator: Arc::new(validator),
        })
    }

    /// 从实现 schemars::JsonSchema 的类型派生
    pub fn from_type<T: JsonSchema>() -> Result<Self, EngineError> {
        let schema = serde_json::to_value(schema_for!(T)).map_err(|e| EngineError::InvalidContract {
            tool: String::new(),
            details: e.to_string(),
        })?;
        Self::new(schema)
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// 校验值；失败时返回以 `; ` 拼接的全部违例描述
    pub fn check(&self, value: &Value) -> Result<(), String> {
        let errors: Vec<String> = self.validator.iter_errors(value).map(|e| e.to_string()).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }
}

/// 工具调用请求格式：与 Planner 解析的 `{"tool": "...", "args": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，如 weather、send_email、echo
    pub tool: String,
    /// 工具参数，依工具的输入契约而定
    pub args: HashMap<String, serde_json::Value>,
}

/// 一次返回多个工具调用的格式
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallBatchFormat {
    pub tool_calls: Vec<ToolCallFormat>,
}

/// 返回批量工具调用的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallBatchFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct WeatherArgs {
        location: String,
        #[serde(default)]
        unit: Option<String>,
    }

    #[test]
    fn test_contract_accepts_valid_value() {
        let contract = Contract::from_type::<WeatherArgs>().unwrap();
        assert!(contract.check(&serde_json::json!({"location": "Paris"})).is_ok());
    }

    #[test]
    fn test_contract_reports_violations() {
        let contract = Contract::from_type::<WeatherArgs>().unwrap();
        let err = contract.check(&serde_json::json!({"unit": 3})).unwrap_err();
        assert!(err.contains("location"));
    }

    #[test]
    fn test_invalid_schema_is_rejected() {
        let result = Contract::new(serde_json::json!({"type": "no-such-type"}));
        assert!(matches!(result, Err(EngineError::InvalidContract { .. })));
    }

    #[test]
    fn test_tool_call_schema_mentions_tool_calls() {
        let schema = tool_call_schema_json();
        assert!(schema.contains("tool_calls"));
    }
}
