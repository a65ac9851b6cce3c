//! 编排状态：单次循环的工作内存与可恢复快照
//!
//! AgentState 随一条用户消息构建，循环结束时以「历史增量」形式落库丢弃；
//! 唯一跨请求边界存活的形态是 AWAITING_CONFIRMATION 的 JSON 快照——循环必须
//! 仅凭该快照即可重入，挂起等待不体现为进程内阻塞的协程。

use serde::{Deserialize, Serialize};

use crate::agent::context::EntityRef;
use crate::agent::intent::Classified;
use crate::core::error::AgentError;
use crate::memory::Message;
use crate::plan::{ConfirmationRequest, ExecutionPlan, PlanStep, StepResult};

/// 循环状态机的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Routing,
    Planning,
    AwaitingConfirmation,
    Executing,
    Responding,
    Persisting,
    Done,
    /// 不可恢复失败；仍会经过 Responding/Persisting 给出用户可见解释
    Failed,
}

/// 确认作用域：整个计划的费用确认，或单个步骤的风险/缺参确认
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionScope {
    Plan,
    Step,
}

/// 挂起的人机交互：请求 + 被挂起的步骤 + 重问标记
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingInteraction {
    pub request: ConfirmationRequest,
    pub step: PlanStep,
    pub scope: InteractionScope,
    /// Select/Input 未匹配时允许重问一次
    #[serde(default)]
    pub reprompted: bool,
}

/// 单次编排循环的可变工作内存
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub session_id: String,
    pub user_id: String,
    /// 工作历史：加载的持久化历史 + 本轮新增（压缩可能改写它）
    pub messages: Vec<Message>,
    /// 本轮新增、尚未落库的消息；与工作历史分开记账，压缩不影响落库
    #[serde(default)]
    pub turn_log: Vec<Message>,
    pub intent: Option<Classified>,
    pub plan: Option<ExecutionPlan>,
    /// 按完成顺序追加，带 step_id 标记，记录后不再修改
    pub results: Vec<StepResult>,
    /// 不变式：pending 非空时 phase 必为 AwaitingConfirmation，且计划中
    /// 被挂起的步骤不得执行直至其清空
    pub pending: Option<PendingInteraction>,
    /// 已获用户放行的步骤编号（恢复重入时 Evaluator 不再拦截）
    #[serde(default)]
    pub approved_steps: Vec<u32>,
    /// 计划级费用确认已通过
    #[serde(default)]
    pub plan_confirmed: bool,
    /// 计划校验失败已重新规划过一次
    #[serde(default)]
    pub replanned: bool,
    /// 已消耗的规划轮数（探索式追加规划受 max_rounds 约束）
    #[serde(default)]
    pub rounds_used: u32,
    /// 当前计划的结果在 results 中的起始下标；符号引用只解析当前计划的结果，
    /// 避免探索式重规划后步骤编号与旧计划冲突
    #[serde(default)]
    pub plan_results_from: usize,
    /// 会话中出现过的实体（压缩后仍保留，指代消解依赖）
    #[serde(default)]
    pub entities: Vec<EntityRef>,
    pub error: Option<String>,
    pub phase: LoopPhase,
}

impl AgentState {
    /// 以持久化历史为底构建新一轮状态
    pub fn fresh(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        history: Vec<Message>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            messages: history,
            turn_log: Vec::new(),
            intent: None,
            plan: None,
            results: Vec::new(),
            pending: None,
            approved_steps: Vec::new(),
            plan_confirmed: false,
            replanned: false,
            rounds_used: 0,
            plan_results_from: 0,
            entities: Vec::new(),
            error: None,
            phase: LoopPhase::Routing,
        }
    }

    pub fn push_message(&mut self, msg: Message) {
        self.messages.push(msg.clone());
        self.turn_log.push(msg);
    }

    /// 尚未落库的消息增量
    pub fn unsaved_messages(&self) -> &[Message] {
        &self.turn_log
    }

    pub fn mark_persisted(&mut self) {
        self.turn_log.clear();
    }

    pub fn record_result(&mut self, result: StepResult) {
        self.results.push(result);
    }

    pub fn has_result(&self, step_id: u32) -> bool {
        self.results.iter().any(|r| r.step_id == step_id)
    }

    pub fn is_awaiting(&self) -> bool {
        self.pending.is_some()
    }

    /// 挂起等待用户应答；同时维护 phase 不变式
    pub fn suspend(&mut self, pending: PendingInteraction) {
        self.pending = Some(pending);
        self.phase = LoopPhase::AwaitingConfirmation;
    }

    /// 序列化为快照 JSON
    pub fn snapshot(&self) -> Result<String, AgentError> {
        serde_json::to_string(self).map_err(|e| AgentError::Store(e.to_string()))
    }

    /// 从快照 JSON 恢复
    pub fn restore(snapshot: &str) -> Result<Self, AgentError> {
        serde_json::from_str(snapshot).map_err(|e| AgentError::Store(e.to_string()))
    }
}
