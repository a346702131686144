//! send_email 工具：对外发信（敏感工具，需人工确认后执行）
//!
//! 发出的邮件写入内存 outbox，由宿主应用接管真正的投递。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::tools::Tool;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EmailArgs {
    /// 收件人地址
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// 已发出的邮件
#[derive(Debug, Clone, Serialize)]
pub struct SentEmail {
    pub message_id: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

/// 发信工具：outbox 可被克隆共享，便于宿主读取
#[derive(Debug, Clone, Default)]
pub struct SendEmailTool {
    outbox: Arc<Mutex<Vec<SentEmail>>>,
}

impl SendEmailTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn outbox(&self) -> Vec<SentEmail> {
        self.outbox.lock().await.clone()
    }
}

#[async_trait]
impl Tool for SendEmailTool {
    fn name(&self) -> &str {
        "send_email"
    }

    fn description(&self) -> &str {
        "Send an email on the user's behalf. Requires human approval. Args: to, subject, body."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(EmailArgs)).unwrap_or_default()
    }

    fn output_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "delivered": { "type": "boolean" },
                "message_id": { "type": "string" }
            },
            "required": ["delivered", "message_id"]
        })
    }

    fn is_sensitive(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let args: EmailArgs =
            serde_json::from_value(args).map_err(|e| format!("send_email: invalid args: {e}"))?;
        if !args.to.contains('@') {
            return Err(format!("send_email: invalid recipient '{}'", args.to));
        }

        let message_id = format!("msg_{}", uuid::Uuid::new_v4().simple());
        self.outbox.lock().await.push(SentEmail {
            message_id: message_id.clone(),
            to: args.to.clone(),
            subject: args.subject,
            body: args.body,
            sent_at: Utc::now(),
        });
        tracing::info!(to = %args.to, message_id = %message_id, "email queued for delivery");

        Ok(serde_json::json!({ "delivered": true, "message_id": message_id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_records_outbox() {
        let tool = SendEmailTool::new();
        let out = tool
            .execute(serde_json::json!({"to": "a@example.com", "subject": "Hi", "body": "Hello"}))
            .await
            .unwrap();
        assert_eq!(out["delivered"], true);
        let outbox = tool.outbox().await;
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].to, "a@example.com");
    }

    #[tokio::test]
    async fn test_invalid_recipient() {
        let tool = SendEmailTool::new();
        let err = tool
            .execute(serde_json::json!({"to": "nobody", "subject": "Hi", "body": "x"}))
            .await
            .unwrap_err();
        assert!(err.contains("recipient"));
        assert!(tool.outbox().await.is_empty());
        assert!(tool.is_sensitive());
    }
}
