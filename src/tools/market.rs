//! 行情洞察工具

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::backend::CapabilityClient;
use crate::tools::registry::{Tool, ToolCategory, ToolError};

pub struct MarketInsightTool {
    client: Arc<CapabilityClient>,
}

impl MarketInsightTool {
    pub fn new(client: Arc<CapabilityClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for MarketInsightTool {
    fn name(&self) -> &str {
        "market_insight"
    }

    fn description(&self) -> &str {
        "查询行业大盘与竞品投放热度，返回热门素材方向与出价区间"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Market
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "industry": { "type": "string", "description": "行业，如 美妆 / 游戏 / 教育" },
                "keyword": { "type": "string", "description": "可选：聚焦的关键词" }
            },
            "required": ["industry"]
        })
    }

    fn estimate_cost(&self, _params: &Value) -> u32 {
        2
    }

    async fn invoke(&self, params: Value, operation_id: &str) -> Result<Value, ToolError> {
        self.client
            .call("market/insight", &params, operation_id)
            .await
    }
}
