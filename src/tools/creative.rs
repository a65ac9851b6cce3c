//! 创意生成工具
//!
//! 多张图为多次子调用，按预估先扣费、失败退回未消耗部分（Upfront 计费）。
//! style 未指定时由 Evaluator 以预设选项形式向用户询问。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::backend::CapabilityClient;
use crate::tools::registry::{Billing, Tool, ToolCategory, ToolError};

/// 单张创意的点数单价
const CREDITS_PER_IMAGE: u32 = 5;

pub struct CreativeGenerateTool {
    client: Arc<CapabilityClient>,
}

impl CreativeGenerateTool {
    pub fn new(client: Arc<CapabilityClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for CreativeGenerateTool {
    fn name(&self) -> &str {
        "creative_generate"
    }

    fn description(&self) -> &str {
        "根据文案与风格生成广告创意图片，返回图片 URL 列表与 creative_id"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Creative
    }

    fn billing(&self) -> Billing {
        Billing::Upfront
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string", "description": "创意文案 / 画面描述" },
                "style": {
                    "type": "string",
                    "description": "视觉风格",
                    "enum": ["简约", "国潮", "科技感", "轻奢"]
                },
                "count": { "type": "integer", "description": "生成张数，默认 1" }
            },
            "required": ["prompt", "style"]
        })
    }

    fn estimate_cost(&self, params: &Value) -> u32 {
        let count = params["count"].as_u64().unwrap_or(1).max(1) as u32;
        CREDITS_PER_IMAGE * count
    }

    async fn invoke(&self, params: Value, operation_id: &str) -> Result<Value, ToolError> {
        self.client
            .call("creative/generate", &params, operation_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_scales_with_count() {
        let tool = CreativeGenerateTool::new(Arc::new(CapabilityClient::new("http://localhost", 5)));
        assert_eq!(tool.estimate_cost(&serde_json::json!({})), 5);
        assert_eq!(tool.estimate_cost(&serde_json::json!({"count": 4})), 20);
    }
}
