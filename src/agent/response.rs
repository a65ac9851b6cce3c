//! Response Generator：汇总步骤结果生成最终回复
//!
//! 无论成功与否都必须产出内容：部分失败时报告「完成 m/n」而不是让用户空等；
//! 模型调用失败退化为模板文案。用户可见文案不含内部错误码。

use std::sync::Arc;

use crate::llm::LlmClient;
use crate::memory::Message;
use crate::plan::StepResult;

/// 单个结果载荷进入 prompt 的预览上限
const PAYLOAD_PREVIEW_CHARS: usize = 400;

pub struct ResponseGenerator {
    llm: Arc<dyn LlmClient>,
}

impl ResponseGenerator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 从累计结果合成自然语言回复；results 为空时直接复述 direct 文本
    pub async fn generate(
        &self,
        user_input: &str,
        results: &[StepResult],
        error_note: Option<&str>,
    ) -> String {
        if results.is_empty() {
            if let Some(note) = error_note {
                return note.to_string();
            }
        }

        let prompt = self.build_prompt(user_input, results, error_note);
        match self.llm.complete(&[Message::user(prompt)]).await {
            Ok(text) if !text.trim().is_empty() => text,
            _ => fallback_summary(results, error_note),
        }
    }

    fn build_prompt(
        &self,
        user_input: &str,
        results: &[StepResult],
        error_note: Option<&str>,
    ) -> String {
        let mut prompt = format!(
            "你是广告投放助手。用户的请求是：「{user_input}」。\
             以下是各步骤的执行结果，请用简洁友好的中文总结答复用户；\
             如有失败步骤要如实说明（不要出现内部错误码），如有取消要确认已取消。\n\n"
        );
        for r in results {
            let status = if r.success { "成功" } else { "失败" };
            let detail = if r.success {
                let s = r.payload.to_string();
                if s.chars().count() > PAYLOAD_PREVIEW_CHARS {
                    let preview: String = s.chars().take(PAYLOAD_PREVIEW_CHARS).collect();
                    format!("{preview}...")
                } else {
                    s
                }
            } else {
                r.error
                    .as_ref()
                    .map(|e| e.message.clone())
                    .unwrap_or_default()
            };
            prompt.push_str(&format!("- 步骤{}（{}）：{status}，{detail}\n", r.step_id, r.tool));
        }
        if let Some(note) = error_note {
            prompt.push_str(&format!("\n补充说明：{note}\n"));
        }
        prompt
    }
}

/// 模板兜底：确保总有输出
pub fn fallback_summary(results: &[StepResult], error_note: Option<&str>) -> String {
    if results.is_empty() {
        return error_note
            .unwrap_or("本次请求处理失败，请稍后重试。")
            .to_string();
    }

    let ok = results.iter().filter(|r| r.success).count();
    let total = results.len();
    let mut s = if ok == total {
        format!("已完成全部 {total} 个步骤。")
    } else {
        format!("已完成 {ok}/{total} 个步骤。")
    };
    for r in results.iter().filter(|r| !r.success) {
        let reason = r
            .error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "执行失败".to_string());
        s.push_str(&format!("「{}」未完成：{}。", r.tool, reason));
    }
    if let Some(note) = error_note {
        s.push(' ');
        s.push_str(note);
    }
    s
}
