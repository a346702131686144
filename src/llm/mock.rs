//! Mock LLM 客户端（用于测试与无 API Key 时的本地运行）
//!
//! 预置回复队列按调用顺序返回；队列为空时取最后一条 User 消息，回显为 echo 工具调用。
//! 每次调用收到的消息都会被记录，测试可据此检查 prompt。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, Role};

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<Vec<Message>>>,
    parallel: bool,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依次返回给定回复
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new();
        for r in responses {
            mock.push_response(r);
        }
        mock
    }

    /// 声明支持并行工具调用
    pub fn with_parallel_tools(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(response.into()));
    }

    /// 下一次调用返回错误
    pub fn push_error(&self, error: LlmError) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(error));
    }

    /// 已记录的调用（每次调用的完整消息列表）
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());

        let scripted = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        if let Some(response) = scripted {
            return response;
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(serde_json::json!({
            "tool": "echo",
            "args": { "text": format!("Echo from Mock: {last_user}") }
        })
        .to_string())
    }

    fn supports_parallel_tools(&self) -> bool {
        self.parallel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_then_echo_fallback() {
        let mock = MockLlmClient::with_responses(["first"]);
        mock.push_error(LlmError::Timeout(3));
        let msgs = [Message::system("sys"), Message::user("hello \"quoted\"")];

        assert_eq!(mock.complete(&msgs).await.unwrap(), "first");
        assert_eq!(mock.complete(&msgs).await, Err(LlmError::Timeout(3)));

        let echoed = mock.complete(&msgs).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&echoed).unwrap();
        assert_eq!(value["tool"], "echo");
        assert!(value["args"]["text"].as_str().unwrap().contains("hello \"quoted\""));
        assert_eq!(mock.call_count(), 3);
    }
}
