//! 投放报表查询工具

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::backend::CapabilityClient;
use crate::tools::registry::{Tool, ToolCategory, ToolError};

pub struct ReportQueryTool {
    client: Arc<CapabilityClient>,
}

impl ReportQueryTool {
    pub fn new(client: Arc<CapabilityClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for ReportQueryTool {
    fn name(&self) -> &str {
        "report_query"
    }

    fn description(&self) -> &str {
        "查询投放报表（消耗、曝光、点击、转化），可按计划过滤；返回 report_id 与指标明细"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Reporting
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "date_range": {
                    "type": "string",
                    "description": "统计区间",
                    "enum": ["today", "yesterday", "last_7d", "last_30d"]
                },
                "campaign_id": { "type": "string", "description": "可选：只看某个计划" },
                "metrics": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "可选：指定指标，默认全部"
                }
            },
            "required": ["date_range"]
        })
    }

    fn estimate_cost(&self, _params: &Value) -> u32 {
        1
    }

    async fn invoke(&self, params: Value, operation_id: &str) -> Result<Value, ToolError> {
        self.client.call("report/query", &params, operation_id).await
    }
}
