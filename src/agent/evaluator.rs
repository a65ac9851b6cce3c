//! Evaluator：步骤风险评估
//!
//! 对每个待派发步骤按固定优先级检查：不可逆操作 > 高花费 > 参数缺失/含糊。
//! 既不可逆又超费用阈值时合并为一次确认（带费用），不会连续弹两次；
//! 缺参时有预设（Schema enum）给 Select，否则给 Input。取消选项始终存在。

use serde_json::Value;

use crate::plan::{
    ConfirmOption, ConfirmationRequest, ExecutionPlan, InteractionKind, PlanStep,
};
use crate::tools::{param_presets, required_params, RiskLevel, Tool};

/// 评估结论
#[derive(Debug, Clone)]
pub enum Decision {
    Proceed,
    /// 需要人机交互后才能执行
    Interact(ConfirmationRequest),
}

/// 风险策略阈值
pub struct Evaluator {
    /// 单步预估点数超过该值视为高花费
    pub per_step_cost_threshold: u32,
}

impl Evaluator {
    pub fn new(per_step_cost_threshold: u32) -> Self {
        Self {
            per_step_cost_threshold,
        }
    }

    /// 计划级评估：总预估超阈值的计划在任何步骤执行前需整体确认
    pub fn assess_plan(&self, plan: &ExecutionPlan) -> Decision {
        if !plan.requires_confirmation {
            return Decision::Proceed;
        }
        Decision::Interact(ConfirmationRequest {
            question: format!(
                "本次任务共 {} 步，预计消耗 {} 点：{}。是否继续？",
                plan.steps.len(),
                plan.estimated_cost,
                plan.goal
            ),
            kind: InteractionKind::Confirm,
            options: vec![],
            step_id: 0,
            missing_param: None,
        })
    }

    /// 单步评估；approved 为真时跳过风险门（用户已放行，只查缺参）
    pub fn assess_step(&self, step: &PlanStep, tool: &dyn Tool, approved: bool) -> Decision {
        if !approved {
            let destructive = tool.risk_level() == RiskLevel::Destructive;
            let cost = tool.estimate_cost(&step.params);
            let expensive = cost > self.per_step_cost_threshold;

            if destructive || expensive {
                let action = if step.rationale.is_empty() {
                    format!("执行 {}", tool.name())
                } else {
                    step.rationale.clone()
                };
                let question = match (destructive, expensive) {
                    (true, true) => format!(
                        "「{action}」不可逆且预计消耗 {cost} 点，确认执行吗？"
                    ),
                    (true, false) => format!("「{action}」不可逆，确认执行吗？"),
                    _ => format!("「{action}」预计消耗 {cost} 点，确认执行吗？"),
                };
                return Decision::Interact(ConfirmationRequest {
                    question,
                    kind: InteractionKind::Confirm,
                    options: vec![],
                    step_id: step.id,
                    missing_param: None,
                });
            }
        }

        // 缺参检查：符号引用视为已提供（执行期解析）
        let schema = tool.parameters_schema();
        for param in required_params(&schema) {
            if param_provided(&step.params, &param) {
                continue;
            }
            let presets = param_presets(&schema, &param);
            if presets.is_empty() {
                return Decision::Interact(ConfirmationRequest {
                    question: format!("请补充「{param}」后继续。"),
                    kind: InteractionKind::Input,
                    options: vec![],
                    step_id: step.id,
                    missing_param: Some(param),
                });
            }
            let mut options: Vec<ConfirmOption> = presets
                .iter()
                .map(|p| ConfirmOption::new(p.clone(), p.clone()))
                .collect();
            options.push(ConfirmOption::new("other", "其他（自行输入）"));
            options.push(ConfirmOption::new("cancel", "取消"));
            return Decision::Interact(ConfirmationRequest {
                question: format!("「{param}」未指定，请选择："),
                kind: InteractionKind::Select,
                options,
                step_id: step.id,
                missing_param: Some(param),
            });
        }

        Decision::Proceed
    }
}

fn param_provided(params: &Value, name: &str) -> bool {
    match &params[name] {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}
