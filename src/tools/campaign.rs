//! 计划管理工具族：查询 / 暂停 / 调预算 / 删除
//!
//! 暂停与删除是不可逆操作（Destructive），Evaluator 会强制人工确认；
//! 调预算按预算额折算点数当量参与费用阈值判断（触发「高花费需确认」）。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::backend::CapabilityClient;
use crate::tools::registry::{RiskLevel, Tool, ToolCategory, ToolError};

/// 预算金额（元）折算点数当量的分母；仅用于费用阈值判断，不实际扣点
const BUDGET_COST_DIVISOR: u64 = 10;

pub struct CampaignListTool {
    client: Arc<CapabilityClient>,
}

impl CampaignListTool {
    pub fn new(client: Arc<CapabilityClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for CampaignListTool {
    fn name(&self) -> &str {
        "campaign_list"
    }

    fn description(&self) -> &str {
        "查询账户下的投放计划列表（支持按状态/消耗排序），返回 campaign_id、名称与预算"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Campaign
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "status": { "type": "string", "description": "可选：active / paused / all" },
                "order_by": { "type": "string", "description": "可选：spend / ctr / created_at" },
                "limit": { "type": "integer", "description": "可选：返回条数" }
            },
            "required": []
        })
    }

    async fn invoke(&self, params: Value, operation_id: &str) -> Result<Value, ToolError> {
        self.client.call("campaign/list", &params, operation_id).await
    }
}

pub struct CampaignPauseTool {
    client: Arc<CapabilityClient>,
}

impl CampaignPauseTool {
    pub fn new(client: Arc<CapabilityClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for CampaignPauseTool {
    fn name(&self) -> &str {
        "campaign_pause"
    }

    fn description(&self) -> &str {
        "暂停一个正在投放的计划；不可自动恢复，需用户手动重启"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Campaign
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Destructive
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "campaign_id": { "type": "string", "description": "要暂停的计划 ID" }
            },
            "required": ["campaign_id"]
        })
    }

    async fn invoke(&self, params: Value, operation_id: &str) -> Result<Value, ToolError> {
        self.client.call("campaign/pause", &params, operation_id).await
    }
}

pub struct CampaignBudgetTool {
    client: Arc<CapabilityClient>,
}

impl CampaignBudgetTool {
    pub fn new(client: Arc<CapabilityClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for CampaignBudgetTool {
    fn name(&self) -> &str {
        "campaign_update_budget"
    }

    fn description(&self) -> &str {
        "修改计划日预算（元）；大额调整会要求用户确认"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Campaign
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::High
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "campaign_id": { "type": "string", "description": "计划 ID" },
                "daily_budget": { "type": "number", "description": "新的日预算（元）" }
            },
            "required": ["campaign_id", "daily_budget"]
        })
    }

    /// 预算额折算为点数当量，驱动费用阈值确认；本身不扣点
    fn estimate_cost(&self, params: &Value) -> u32 {
        let budget = params["daily_budget"].as_f64().unwrap_or(0.0).max(0.0) as u64;
        (budget / BUDGET_COST_DIVISOR) as u32
    }

    async fn invoke(&self, params: Value, operation_id: &str) -> Result<Value, ToolError> {
        self.client
            .call("campaign/update-budget", &params, operation_id)
            .await
    }
}

pub struct CampaignDeleteTool {
    client: Arc<CapabilityClient>,
}

impl CampaignDeleteTool {
    pub fn new(client: Arc<CapabilityClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for CampaignDeleteTool {
    fn name(&self) -> &str {
        "campaign_delete"
    }

    fn description(&self) -> &str {
        "删除计划及其投放记录；不可恢复"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Campaign
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Destructive
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "campaign_id": { "type": "string", "description": "要删除的计划 ID" }
            },
            "required": ["campaign_id"]
        })
    }

    async fn invoke(&self, params: Value, operation_id: &str) -> Result<Value, ToolError> {
        self.client
            .call("campaign/delete", &params, operation_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_cost_equivalent() {
        let tool = CampaignBudgetTool::new(Arc::new(CapabilityClient::new("http://localhost", 5)));
        assert_eq!(
            tool.estimate_cost(&serde_json::json!({"daily_budget": 2000.0})),
            200
        );
        assert_eq!(tool.estimate_cost(&serde_json::json!({})), 0);
    }
}
