//! 执行计划类型定义
//!
//! Planner 输出的 ExecutionPlan / PlanStep，Executor 产出的 StepResult，
//! 以及人工确认请求 ConfirmationRequest。计划在执行前必须通过 `validate`。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 任务复杂度分级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    /// 单步即可完成
    SingleStep,
    /// 多步固定计划
    MultiStep,
    /// 探索式：执行后可能需要追加规划
    Exploratory,
}

/// 计划中的一个工具调用步骤
///
/// 参数中允许出现符号引用 `{"$step": N, "$path": "data.campaigns[0].id"}`，
/// 执行时解析为前序步骤结果中的具体值。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// 步骤编号，从 1 开始
    pub id: u32,
    /// 目标工具名（必须已注册）
    pub tool: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// 依赖的前序步骤编号，必须严格小于本步骤编号
    #[serde(default)]
    pub depends_on: Vec<u32>,
    /// 规划理由（展示给用户 / 写入确认文案）
    #[serde(default)]
    pub rationale: String,
    /// 预估点数消耗
    #[serde(default)]
    pub estimated_cost: u32,
}

/// Planner 产出的执行计划
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub goal: String,
    pub complexity: Complexity,
    pub steps: Vec<PlanStep>,
    /// 各步骤预估点数之和（finalize 时计算）
    #[serde(default)]
    pub estimated_cost: u32,
    /// 总预估超过配置阈值时必须为 true，任何步骤执行前需用户确认
    #[serde(default)]
    pub requires_confirmation: bool,
}

/// 计划结构校验错误
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan has no steps")]
    Empty,
    #[error("step id must start from 1: {0}")]
    BadStepId(u32),
    #[error("duplicate step id: {0}")]
    DuplicateId(u32),
    #[error("step {step} references unknown tool: {tool}")]
    UnknownTool { step: u32, tool: String },
    #[error("step {step} depends on step {dep} which is not a strictly lower id")]
    ForwardDependency { step: u32, dep: u32 },
    #[error("step {step} depends on missing step {dep}")]
    MissingDependency { step: u32, dep: u32 },
}

impl ExecutionPlan {
    /// 结构校验：步骤编号从 1 起且不重复、工具均已注册、依赖只指向严格更小的编号。
    /// 自环 / 前向 / 环状引用在「依赖必须严格小于自身」这一条下同时被排除。
    pub fn validate(&self, registered: &HashSet<String>) -> Result<(), PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id == 0 {
                return Err(PlanError::BadStepId(step.id));
            }
            if !seen.insert(step.id) {
                return Err(PlanError::DuplicateId(step.id));
            }
            if !registered.contains(&step.tool) {
                return Err(PlanError::UnknownTool {
                    step: step.id,
                    tool: step.tool.clone(),
                });
            }
        }
        for step in &self.steps {
            for &dep in &step.depends_on {
                if dep >= step.id {
                    return Err(PlanError::ForwardDependency { step: step.id, dep });
                }
                if !seen.contains(&dep) {
                    return Err(PlanError::MissingDependency { step: step.id, dep });
                }
            }
        }
        Ok(())
    }

    /// 汇总预估点数，并按累计阈值落 requires_confirmation 标记
    pub fn finalize(&mut self, plan_cost_threshold: u32) {
        self.estimated_cost = self.steps.iter().map(|s| s.estimated_cost).sum();
        if self.estimated_cost > plan_cost_threshold {
            self.requires_confirmation = true;
        }
    }

    pub fn step(&self, id: u32) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// 步骤级错误（记录在 StepResult 中；code 仅用于日志与测试断言）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepError {
    pub code: String,
    pub message: String,
}

impl StepError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn cancelled_by_user() -> Self {
        Self::new("cancelled_by_user", "用户取消了该步骤")
    }

    pub fn skipped_dependency(dep: u32) -> Self {
        Self::new(
            "skipped_due_to_dependency_failure",
            format!("前置步骤 {dep} 未成功，跳过执行"),
        )
    }

    pub fn insufficient_credit(required: u32) -> Self {
        Self::new(
            "insufficient_credit",
            format!("点数余额不足（需要 {required}）"),
        )
    }
}

/// 单个步骤的执行结果；一经记录不再修改，按完成顺序追加
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: u32,
    pub tool: String,
    pub success: bool,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub error: Option<StepError>,
    /// 实际扣除的点数
    #[serde(default)]
    pub credits_spent: u32,
}

impl StepResult {
    pub fn ok(step_id: u32, tool: impl Into<String>, payload: serde_json::Value, credits: u32) -> Self {
        Self {
            step_id,
            tool: tool.into(),
            success: true,
            payload,
            error: None,
            credits_spent: credits,
        }
    }

    pub fn failed(step_id: u32, tool: impl Into<String>, error: StepError) -> Self {
        Self {
            step_id,
            tool: tool.into(),
            success: false,
            payload: serde_json::Value::Null,
            error: Some(error),
            credits_spent: 0,
        }
    }
}

/// 人机交互种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// 确认 / 取消
    Confirm,
    /// 从预设选项中选择
    Select,
    /// 自由文本输入
    Input,
}

/// 选择型交互的预设选项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmOption {
    pub id: String,
    pub label: String,
}

impl ConfirmOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Evaluator 产出、HITL Handler 消费的确认请求；用户应答合并后销毁
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub question: String,
    pub kind: InteractionKind,
    /// Select 时的预设；始终包含「取消」逃生项
    #[serde(default)]
    pub options: Vec<ConfirmOption>,
    /// 被挂起的步骤编号；计划级确认为 0
    pub step_id: u32,
    /// Input/Select 时要补齐的参数路径
    #[serde(default)]
    pub missing_param: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered() -> HashSet<String> {
        ["campaign_pause", "campaign_update_budget", "report_query"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn step(id: u32, tool: &str, deps: Vec<u32>) -> PlanStep {
        PlanStep {
            id,
            tool: tool.into(),
            params: serde_json::json!({}),
            depends_on: deps,
            rationale: String::new(),
            estimated_cost: 0,
        }
    }

    #[test]
    fn test_validate_ok() {
        let plan = ExecutionPlan {
            goal: "暂停计划后调预算".into(),
            complexity: Complexity::MultiStep,
            steps: vec![
                step(1, "campaign_pause", vec![]),
                step(2, "campaign_update_budget", vec![1]),
            ],
            estimated_cost: 0,
            requires_confirmation: false,
        };
        assert!(plan.validate(&registered()).is_ok());
    }

    #[test]
    fn test_validate_rejects_forward_and_self_reference() {
        let plan = ExecutionPlan {
            goal: "g".into(),
            complexity: Complexity::MultiStep,
            steps: vec![step(1, "report_query", vec![2]), step(2, "report_query", vec![])],
            estimated_cost: 0,
            requires_confirmation: false,
        };
        assert_eq!(
            plan.validate(&registered()),
            Err(PlanError::ForwardDependency { step: 1, dep: 2 })
        );

        let self_ref = ExecutionPlan {
            goal: "g".into(),
            complexity: Complexity::SingleStep,
            steps: vec![step(1, "report_query", vec![1])],
            estimated_cost: 0,
            requires_confirmation: false,
        };
        assert!(matches!(
            self_ref.validate(&registered()),
            Err(PlanError::ForwardDependency { step: 1, dep: 1 })
        ));
    }

    #[test]
    fn test_validate_rejects_unknown_tool() {
        let plan = ExecutionPlan {
            goal: "g".into(),
            complexity: Complexity::SingleStep,
            steps: vec![step(1, "made_up_tool", vec![])],
            estimated_cost: 0,
            requires_confirmation: false,
        };
        assert!(matches!(
            plan.validate(&registered()),
            Err(PlanError::UnknownTool { step: 1, .. })
        ));
    }

    #[test]
    fn test_finalize_sets_confirmation_over_threshold() {
        let mut plan = ExecutionPlan {
            goal: "g".into(),
            complexity: Complexity::MultiStep,
            steps: vec![
                PlanStep {
                    estimated_cost: 60,
                    ..step(1, "report_query", vec![])
                },
                PlanStep {
                    estimated_cost: 50,
                    ..step(2, "report_query", vec![])
                },
            ],
            estimated_cost: 0,
            requires_confirmation: false,
        };
        plan.finalize(100);
        assert_eq!(plan.estimated_cost, 110);
        assert!(plan.requires_confirmation);
    }
}
