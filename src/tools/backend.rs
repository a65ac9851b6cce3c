//! 能力后端客户端
//!
//! 五类能力端点（创意 / 报表 / 行情 / 落地页 / 计划管理）对编排核心是不透明服务，
//! 统一经由 POST {base_url}/{op} 调用，body 携带 params 与 operation_id（重试去重）。
//! 网络错误与 5xx/429 映射为瞬时失败，4xx 为永久失败。

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::tools::registry::ToolError;

/// 能力服务 HTTP 客户端
pub struct CapabilityClient {
    http: Client,
    base_url: String,
}

impl CapabilityClient {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("adpilot/0.1")
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// 调用能力端点；响应约定为 {"success": bool, "data": ..., "error": str, "consumed": u32}
    pub async fn call(
        &self,
        op: &str,
        params: &Value,
        operation_id: &str,
    ) -> Result<Value, ToolError> {
        let url = format!("{}/{}", self.base_url, op);
        let body = serde_json::json!({
            "params": params,
            "operation_id": operation_id,
        });

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolError::transient(format!("request failed: {e}")))?;

        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ToolError::transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(ToolError::permanent(format!("HTTP {status}")));
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| ToolError::transient(format!("bad response body: {e}")))?;

        if payload["success"].as_bool().unwrap_or(false) {
            Ok(payload["data"].clone())
        } else {
            let message = payload["error"].as_str().unwrap_or("unknown error").to_string();
            let consumed = payload["consumed"].as_u64().unwrap_or(0) as u32;
            let retryable = payload["retryable"].as_bool().unwrap_or(false);
            let err = if retryable {
                ToolError::transient(message)
            } else {
                ToolError::permanent(message)
            };
            Err(err.with_consumed(consumed))
        }
    }
}
