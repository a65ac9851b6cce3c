//! 落地页生成工具
//!
//! 常与创意生成串联：creative_url 多为前序步骤输出的符号引用。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::backend::CapabilityClient;
use crate::tools::registry::{Tool, ToolCategory, ToolError};

pub struct LandingPageTool {
    client: Arc<CapabilityClient>,
}

impl LandingPageTool {
    pub fn new(client: Arc<CapabilityClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for LandingPageTool {
    fn name(&self) -> &str {
        "landing_page_generate"
    }

    fn description(&self) -> &str {
        "生成商品落地页并返回 page_id 与预览链接"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::LandingPage
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "product_name": { "type": "string", "description": "商品名" },
                "template": {
                    "type": "string",
                    "description": "页面模板",
                    "enum": ["单品直购", "表单收集", "活动聚合"]
                },
                "creative_url": { "type": "string", "description": "可选：头图创意 URL" },
                "selling_points": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "可选：卖点列表"
                }
            },
            "required": ["product_name", "template"]
        })
    }

    fn estimate_cost(&self, _params: &Value) -> u32 {
        8
    }

    async fn invoke(&self, params: Value, operation_id: &str) -> Result<Value, ToolError> {
        self.client
            .call("landing-page/generate", &params, operation_id)
            .await
    }
}
