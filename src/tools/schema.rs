//! 计划 JSON Schema 生成（schemars 自动生成，注入规划 prompt）
//!
//! 约束 LLM 输出的计划结构：kind / goal / complexity / steps（id、tool、params、
//! depends_on、rationale、estimated_cost），减少格式错误导致的重试。

use schemars::{schema_for, JsonSchema};

/// 计划步骤格式（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct PlanStepFormat {
    /// 步骤编号，从 1 开始
    pub id: u32,
    /// 已注册工具名
    pub tool: String,
    /// 工具参数；可用 {"$step": N, "$path": "data.xxx"} 引用前序步骤输出
    pub params: serde_json::Value,
    /// 依赖的前序步骤编号（必须小于本步骤编号）
    pub depends_on: Vec<u32>,
    /// 选择该步骤的理由
    pub rationale: String,
    /// 预估点数
    pub estimated_cost: u32,
}

/// 计划输出格式：{"kind": "plan" | "reply" | "clarify", ...}
#[allow(dead_code)]
#[derive(JsonSchema)]
struct PlannerOutputFormat {
    /// plan（执行计划）/ reply（直接回复）/ clarify（澄清提问）
    pub kind: String,
    /// kind=plan 时：任务目标概述
    pub goal: Option<String>,
    /// kind=plan 时：single_step / multi_step / exploratory
    pub complexity: Option<String>,
    /// kind=plan 时：步骤列表
    pub steps: Option<Vec<PlanStepFormat>>,
    /// kind=reply 时：直接回复内容
    pub content: Option<String>,
    /// kind=clarify 时：向用户提出的澄清问题
    pub question: Option<String>,
}

/// 返回计划输出的 JSON Schema 字符串，可拼入规划 prompt
pub fn planner_output_schema_json() -> String {
    let schema = schema_for!(PlannerOutputFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}
