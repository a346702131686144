//! 根据配置创建推理后端
//!
//! 唯一读取 API Key 环境变量的地方；由二进制入口调用，引擎只接收构建好的 `Arc<dyn LlmClient>`。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient};

fn has_key(var: &str) -> bool {
    std::env::var(var).map(|k| !k.trim().is_empty()).unwrap_or(false)
}

/// 按 llm.provider 选择后端；对应的 API Key 不存在时回退到 Mock
pub fn create_llm_from_config(config: &AppConfig) -> Arc<dyn LlmClient> {
    let llm = &config.llm;
    match llm.provider.as_str() {
        "deepseek" if has_key("DEEPSEEK_API_KEY") || has_key("OPENAI_API_KEY") => {
            tracing::info!(provider = "deepseek", "using DeepSeek backend");
            Arc::new(
                create_deepseek_client(llm.model.as_deref())
                    .with_request_timeout(llm.timeouts.request)
                    .with_parallel_tool_calls(llm.parallel_tool_calls),
            )
        }
        "openai" if has_key("OPENAI_API_KEY") => {
            let model = llm.model.as_deref().unwrap_or("gpt-4o-mini");
            tracing::info!(provider = "openai", model, "using OpenAI-compatible backend");
            Arc::new(
                OpenAiClient::new(llm.base_url.as_deref(), model, None)
                    .with_request_timeout(llm.timeouts.request)
                    .with_parallel_tool_calls(llm.parallel_tool_calls),
            )
        }
        other => {
            if other != "mock" {
                tracing::warn!(provider = other, "no API key found, falling back to mock backend");
            }
            Arc::new(MockLlmClient::new().with_parallel_tools(llm.parallel_tool_calls))
        }
    }
}
