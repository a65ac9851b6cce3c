//! 人机交互处理：挂起确认的应答合并
//!
//! Confirm：只有明确肯定词视为同意，其余一律当作取消。
//! Select：匹配预设 id/label；「other」转自由输入；未匹配重问一次后回退取消。
//! Input：空白重问，非空合并到 Evaluator 标记的缺参路径。
//! 取消时步骤记为 cancelled_by_user，循环转入回复阶段而非继续计划。

use serde_json::Value;

use crate::core::state::PendingInteraction;
use crate::plan::{ConfirmationRequest, InteractionKind, PlanStep};

/// 应答处理结果
#[derive(Debug)]
pub enum ResumeOutcome {
    /// 放行：参数已合并的步骤
    Approved(PlanStep),
    /// 重新询问（原挂起保留，reprompted 置位）
    Reprompt(ConfirmationRequest),
    /// 用户取消
    Cancelled,
}

const AFFIRMATIVES: &[&str] = &[
    "是", "好", "好的", "确认", "确定", "可以", "继续", "嗯", "行", "同意",
    "yes", "y", "ok", "okay", "confirm", "sure",
];

const CANCEL_WORDS: &[&str] = &["取消", "不", "不要", "算了", "cancel", "no", "n", "stop"];

fn is_affirmative(input: &str) -> bool {
    let t = input.trim().to_lowercase();
    AFFIRMATIVES.iter().any(|a| t == *a)
}

fn is_cancel(input: &str) -> bool {
    let t = input.trim().to_lowercase();
    CANCEL_WORDS.iter().any(|c| t == *c)
}

/// 在参数中按点分路径写入值（路径不存在时逐级创建对象）
pub fn merge_param(params: &mut Value, path: &str, value: Value) {
    if !params.is_object() {
        *params = serde_json::json!({});
    }
    let mut cursor = params;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, seg) in segments.iter().enumerate() {
        if i == segments.len() - 1 {
            cursor[seg] = value;
            return;
        }
        if !cursor[seg].is_object() {
            cursor[seg] = serde_json::json!({});
        }
        cursor = &mut cursor[seg];
    }
}

/// 处理用户对挂起交互的应答
pub fn resume(pending: &PendingInteraction, user_response: &str) -> ResumeOutcome {
    match pending.request.kind {
        InteractionKind::Confirm => {
            if is_affirmative(user_response) {
                ResumeOutcome::Approved(pending.step.clone())
            } else {
                // 非明确肯定一律取消
                ResumeOutcome::Cancelled
            }
        }
        InteractionKind::Select => resume_select(pending, user_response),
        InteractionKind::Input => resume_input(pending, user_response),
    }
}

fn resume_select(pending: &PendingInteraction, user_response: &str) -> ResumeOutcome {
    let response = user_response.trim();
    if is_cancel(response) || response.eq_ignore_ascii_case("cancel") {
        return ResumeOutcome::Cancelled;
    }

    let matched = pending
        .request
        .options
        .iter()
        .find(|o| o.id == response || o.label == response);

    let chose_other = response == "other"
        || response == "其他"
        || matched.is_some_and(|o| o.id == "other");
    if chose_other {
        // 转自由输入，沿用同一缺参路径
        return ResumeOutcome::Reprompt(ConfirmationRequest {
            question: format!(
                "请输入「{}」的值：",
                pending.request.missing_param.as_deref().unwrap_or("参数")
            ),
            kind: InteractionKind::Input,
            options: vec![],
            step_id: pending.request.step_id,
            missing_param: pending.request.missing_param.clone(),
        });
    }

    match matched {
        Some(option) if option.id != "cancel" => {
            let mut step = pending.step.clone();
            if let Some(path) = &pending.request.missing_param {
                merge_param(&mut step.params, path, Value::String(option.id.clone()));
            }
            ResumeOutcome::Approved(step)
        }
        Some(_) => ResumeOutcome::Cancelled,
        None if !pending.reprompted => {
            let mut request = pending.request.clone();
            request.question = format!("未识别的选择「{response}」。{}", pending.request.question);
            ResumeOutcome::Reprompt(request)
        }
        None => ResumeOutcome::Cancelled,
    }
}

fn resume_input(pending: &PendingInteraction, user_response: &str) -> ResumeOutcome {
    let response = user_response.trim();
    if response.is_empty() {
        // 空白输入重问；不限次数，但循环每轮只会经过一次
        return ResumeOutcome::Reprompt(pending.request.clone());
    }
    if is_cancel(response) {
        return ResumeOutcome::Cancelled;
    }
    let mut step = pending.step.clone();
    if let Some(path) = &pending.request.missing_param {
        merge_param(&mut step.params, path, Value::String(response.to_string()));
    }
    ResumeOutcome::Approved(step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::InteractionScope;
    use crate::plan::ConfirmOption;

    fn pending(kind: InteractionKind, options: Vec<ConfirmOption>, missing: Option<&str>) -> PendingInteraction {
        PendingInteraction {
            request: ConfirmationRequest {
                question: "确认？".into(),
                kind,
                options,
                step_id: 1,
                missing_param: missing.map(String::from),
            },
            step: PlanStep {
                id: 1,
                tool: "creative_generate".into(),
                params: serde_json::json!({"prompt": "新品上市"}),
                depends_on: vec![],
                rationale: String::new(),
                estimated_cost: 5,
            },
            scope: InteractionScope::Step,
            reprompted: false,
        }
    }

    #[test]
    fn test_confirm_requires_explicit_affirmative() {
        let p = pending(InteractionKind::Confirm, vec![], None);
        assert!(matches!(resume(&p, "确认"), ResumeOutcome::Approved(_)));
        assert!(matches!(resume(&p, "yes"), ResumeOutcome::Approved(_)));
        // 任何非肯定应答都是取消
        assert!(matches!(resume(&p, "等等再说"), ResumeOutcome::Cancelled));
        assert!(matches!(resume(&p, "嗯？"), ResumeOutcome::Cancelled));
    }

    #[test]
    fn test_select_merges_preset() {
        let p = pending(
            InteractionKind::Select,
            vec![
                ConfirmOption::new("国潮", "国潮"),
                ConfirmOption::new("cancel", "取消"),
            ],
            Some("style"),
        );
        match resume(&p, "国潮") {
            ResumeOutcome::Approved(step) => {
                assert_eq!(step.params["style"], "国潮");
                assert_eq!(step.params["prompt"], "新品上市");
            }
            other => panic!("expected approved, got {other:?}"),
        }
    }

    #[test]
    fn test_select_unmatched_reprompts_once_then_cancels() {
        let mut p = pending(
            InteractionKind::Select,
            vec![ConfirmOption::new("简约", "简约")],
            Some("style"),
        );
        assert!(matches!(resume(&p, "随便"), ResumeOutcome::Reprompt(_)));
        p.reprompted = true;
        assert!(matches!(resume(&p, "随便"), ResumeOutcome::Cancelled));
    }

    #[test]
    fn test_select_other_switches_to_input() {
        let p = pending(
            InteractionKind::Select,
            vec![ConfirmOption::new("简约", "简约")],
            Some("style"),
        );
        match resume(&p, "other") {
            ResumeOutcome::Reprompt(req) => assert_eq!(req.kind, InteractionKind::Input),
            other => panic!("expected input reprompt, got {other:?}"),
        }
    }

    #[test]
    fn test_input_blank_reprompts_and_merge_path() {
        let p = pending(InteractionKind::Input, vec![], Some("style"));
        assert!(matches!(resume(&p, "   "), ResumeOutcome::Reprompt(_)));
        match resume(&p, "赛博朋克") {
            ResumeOutcome::Approved(step) => assert_eq!(step.params["style"], "赛博朋克"),
            other => panic!("expected approved, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_param_nested_path() {
        let mut params = serde_json::json!({"a": 1});
        merge_param(&mut params, "targeting.region", Value::String("华东".into()));
        assert_eq!(params["targeting"]["region"], "华东");
        assert_eq!(params["a"], 1);
    }
}
