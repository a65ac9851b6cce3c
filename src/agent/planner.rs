//! Planner：把用户诉求规划为执行计划或直接回复
//!
//! 一次 LLM 调用产出 {"kind": "plan" | "reply" | "clarify"} JSON；除模型调用外无副作用。
//! 模型调用失败不在此层重试（重试是 Executor 对工具调用的职责），由循环转为
//! 「请稍后重试」的用户可见提示。

use std::sync::Arc;

use serde::Deserialize;

use crate::agent::context::EntityRef;
use crate::core::error::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::plan::ExecutionPlan;

/// Planner 输出
#[derive(Debug, Clone)]
pub enum PlannerOutput {
    /// 无需工具，直接回复
    Reply(String),
    /// 意图不明，向用户澄清
    Clarify(String),
    /// 执行计划
    Plan(ExecutionPlan),
}

#[derive(Deserialize)]
struct RawOutput {
    kind: String,
    #[serde(default)]
    goal: Option<String>,
    #[serde(default)]
    complexity: Option<crate::plan::Complexity>,
    #[serde(default)]
    steps: Option<Vec<crate::plan::PlanStep>>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    question: Option<String>,
}

/// 从 LLM 输出中提取 JSON（容忍 ```json 围栏与前后缀文本）
fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end > start {
        Some(&trimmed[start..=end])
    } else {
        None
    }
}

/// 解析 LLM 输出：无 JSON 时视为直接回复
pub fn parse_planner_output(output: &str) -> Result<PlannerOutput, AgentError> {
    let Some(json_str) = extract_json(output) else {
        return Ok(PlannerOutput::Reply(output.trim().to_string()));
    };

    let raw: RawOutput = serde_json::from_str(json_str)
        .map_err(|e| AgentError::Validation(format!("planner output: {e}")))?;

    match raw.kind.as_str() {
        "reply" => Ok(PlannerOutput::Reply(raw.content.unwrap_or_default())),
        "clarify" => Ok(PlannerOutput::Clarify(
            raw.question
                .unwrap_or_else(|| "能再具体描述一下你的需求吗？".to_string()),
        )),
        "plan" => {
            let steps = raw
                .steps
                .ok_or_else(|| AgentError::Validation("plan without steps".to_string()))?;
            Ok(PlannerOutput::Plan(ExecutionPlan {
                goal: raw.goal.unwrap_or_default(),
                complexity: raw
                    .complexity
                    .unwrap_or(crate::plan::Complexity::SingleStep),
                steps,
                estimated_cost: 0,
                requires_confirmation: false,
            }))
        }
        other => Err(AgentError::Validation(format!("unknown kind: {other}"))),
    }
}

/// Planner：持有 LLM 与基础 system prompt
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 规划调用：基础 prompt + 可用工具说明 + 输出 Schema + 已知实体 + 追加上下文
    pub async fn plan(
        &self,
        messages: &[Message],
        tool_definitions: &str,
        output_schema: &str,
        entities: &[EntityRef],
        extra_context: &str,
    ) -> Result<String, AgentError> {
        let mut system = format!(
            "{}\n\n## 可用工具\n{}\n\n## 输出格式（严格遵守该 JSON Schema，只输出一个 JSON 对象）\n{}",
            self.system_prompt, tool_definitions, output_schema
        );
        if !entities.is_empty() {
            system.push_str("\n\n## 会话中已知实体\n");
            for e in entities {
                system.push_str(&format!("- {}={}（{}）\n", e.kind, e.id, e.label));
            }
        }
        if !extra_context.is_empty() {
            system.push_str("\n\n");
            system.push_str(extra_context);
        }

        let mut full = vec![Message::system(system)];
        full.extend(messages.to_vec());
        self.llm
            .complete(&full)
            .await
            .map_err(AgentError::Model)
    }

    /// 压缩摘要：必须原样保留实体 ID
    pub async fn summarize(
        &self,
        messages: &[Message],
        entities: &[EntityRef],
    ) -> Result<String, AgentError> {
        let mut prompt = String::from(
            "将以下对话压缩为一段简短摘要，保留任务进展与结论。\
             下列实体 ID 必须原样出现在摘要中，不得省略或改写：\n",
        );
        for e in entities {
            prompt.push_str(&format!("- {}={}\n", e.kind, e.id));
        }
        prompt.push_str("\n对话：\n");
        for m in messages {
            let role = match m.role {
                crate::memory::Role::User => "用户",
                crate::memory::Role::Assistant => "助手",
                crate::memory::Role::System => "系统",
            };
            prompt.push_str(&format!("{role}：{}\n", m.content));
        }

        self.llm
            .complete(&[Message::user(prompt)])
            .await
            .map_err(AgentError::Model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply() {
        let out = parse_planner_output(r#"{"kind": "reply", "content": "今天消耗 1200 元"}"#);
        assert!(matches!(out, Ok(PlannerOutput::Reply(s)) if s.contains("1200")));
    }

    #[test]
    fn test_parse_plan_with_fence() {
        let raw = r#"好的，计划如下：
```json
{"kind": "plan", "goal": "暂停并调预算", "complexity": "multi_step",
 "steps": [
   {"id": 1, "tool": "campaign_pause", "params": {"campaign_id": "c_1"}},
   {"id": 2, "tool": "campaign_update_budget",
    "params": {"campaign_id": {"$step": 1, "$path": "campaign_id"}, "daily_budget": 800},
    "depends_on": [1], "estimated_cost": 80}
 ]}
```"#;
        let out = parse_planner_output(raw).unwrap();
        match out {
            PlannerOutput::Plan(plan) => {
                assert_eq!(plan.steps.len(), 2);
                assert_eq!(plan.steps[1].depends_on, vec![1]);
            }
            other => panic!("expected plan, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_plain_text_is_reply() {
        let out = parse_planner_output("直接和用户聊两句").unwrap();
        assert!(matches!(out, PlannerOutput::Reply(_)));
    }

    #[test]
    fn test_parse_bad_json_is_validation_error() {
        let out = parse_planner_output(r#"{"kind": "plan", "steps": "oops"}"#);
        assert!(matches!(out, Err(AgentError::Validation(_))));
    }
}
