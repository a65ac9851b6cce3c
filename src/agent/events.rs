//! 编排过程事件：经 SSE 等传输层逐行推送给前端
//!
//! 每个事件是一个带 type 标签的小对象；消费方必须忽略未知类型以保持向前兼容。

use serde::Serialize;

use crate::plan::{ConfirmOption, InteractionKind};

/// 流式事件（序列化为 JSON，一行一个）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 最终回复的增量文本
    Token { content: String },
    /// 正在调用模型规划
    Thinking,
    /// 计划已生成
    PlanReady {
        goal: String,
        steps: usize,
        estimated_cost: u32,
    },
    /// 某步骤开始调用工具
    ToolStart { tool: String },
    /// 工具调用结束
    ToolComplete {
        tool: String,
        result: serde_json::Value,
    },
    /// 瞬时失败后的退避重试
    StepRetrying {
        tool: String,
        attempt: u32,
        delay_ms: u64,
    },
    /// 需要用户确认 / 选择 / 输入
    ConfirmationRequest {
        question: String,
        kind: InteractionKind,
        options: Vec<ConfirmOption>,
        step_id: u32,
    },
    /// 正常结束标记
    Done,
    /// 不可恢复失败；code 仅供排障，文案面向用户
    Error { code: String, message: String },
}

/// 事件发送的便捷封装：接收端关闭时静默丢弃
pub fn send_event(tx: &Option<&tokio::sync::mpsc::UnboundedSender<AgentEvent>>, ev: AgentEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let ev = AgentEvent::Token {
            content: "已为".into(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "token");
        assert_eq!(json["content"], "已为");

        let ev = AgentEvent::ToolStart {
            tool: "campaign_pause".into(),
        };
        assert_eq!(serde_json::to_value(&ev).unwrap()["type"], "tool_start");

        let ev = AgentEvent::Done;
        assert_eq!(serde_json::to_value(&ev).unwrap()["type"], "done");
    }
}
