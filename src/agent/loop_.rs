//! 编排主循环（状态机）
//!
//! ROUTING -> PLANNING -> (AWAITING_CONFIRMATION ⇄ PLANNING) -> EXECUTING ->
//! PLANNING | RESPONDING -> PERSISTING -> END。
//! AWAITING_CONFIRMATION 是唯一跨用户轮次存活的状态：循环退出前把 AgentState
//! 快照落库，下一条用户消息携带应答重入。任何不可恢复失败仍会经过
//! RESPONDING/PERSISTING，保证用户总能得到解释。

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::agent::context::ContextManager;
use crate::agent::evaluator::{Decision, Evaluator};
use crate::agent::events::{send_event, AgentEvent};
use crate::agent::executor::StepExecutor;
use crate::agent::intent::{categories_for, IntentRecognizer};
use crate::agent::interaction::{self, ResumeOutcome};
use crate::agent::planner::{parse_planner_output, Planner, PlannerOutput};
use crate::agent::response::ResponseGenerator;
use crate::core::state::{AgentState, InteractionScope, LoopPhase, PendingInteraction};
use crate::memory::{round_count, Message, MemoryStore};
use crate::plan::{Complexity, PlanGraph, PlanStep, StepError, StepResult};
use crate::tools::{planner_output_schema_json, ToolRegistry};

/// 流式回复时每段字符数（模拟打字效果）
const CHUNK_CHARS: usize = 6;
/// 观察结果写回对话的预览上限
const OBSERVATION_PREVIEW_CHARS: usize = 200;
/// 持久化失败的有限重试次数
const PERSIST_ATTEMPTS: u32 = 2;

/// 单轮编排的结果
#[derive(Debug)]
pub struct TurnOutcome {
    /// 最终回复；挂起等待确认时为 None（问题经 confirmation_request 事件送出）
    pub response: Option<String>,
    pub awaiting: bool,
}

/// 循环内部的推进结果
enum Drive {
    /// 转入回复阶段；Some 为已定稿的直接回复（规划直答或澄清）
    Respond(Option<String>),
    /// 已挂起等待用户应答
    Awaiting,
}

enum ExecOutcome {
    Completed,
    Awaiting,
}

/// 单轮编排的全部依赖（参数封装，避免长参数列表）
pub struct OrchestrationTurn<'a> {
    pub planner: &'a Planner,
    pub evaluator: &'a Evaluator,
    pub executor: &'a StepExecutor,
    pub context: &'a ContextManager,
    pub response: &'a ResponseGenerator,
    pub intent: &'a IntentRecognizer,
    pub registry: &'a ToolRegistry,
    pub memory: &'a dyn MemoryStore,
    pub event_tx: Option<&'a UnboundedSender<AgentEvent>>,
    pub cancel: CancellationToken,
    /// 意图置信度低于该值时改为澄清提问
    pub intent_confidence_threshold: f32,
    /// 计划总预估超过该值时需整体确认
    pub plan_cost_threshold: u32,
    /// 规划轮数上限（探索式追加规划含在内）
    pub max_rounds: u32,
}

impl OrchestrationTurn<'_> {
    /// 处理一条用户消息：新请求或对挂起确认的应答
    pub async fn run(&self, state: &mut AgentState, user_input: &str) -> TurnOutcome {
        let drive = if state.is_awaiting() {
            self.resume(state, user_input).await
        } else {
            self.fresh(state, user_input).await
        };

        match drive {
            Drive::Awaiting => {
                self.persist(state).await;
                TurnOutcome {
                    response: None,
                    awaiting: true,
                }
            }
            Drive::Respond(direct) => {
                let text = self.respond(state, user_input, direct).await;
                self.persist(state).await;
                send_event(&self.event_tx, AgentEvent::Done);
                state.phase = LoopPhase::Done;
                TurnOutcome {
                    response: Some(text),
                    awaiting: false,
                }
            }
        }
    }

    /// 新请求：ROUTING 后进入规划/执行循环
    async fn fresh(&self, state: &mut AgentState, user_input: &str) -> Drive {
        state.phase = LoopPhase::Routing;

        // 跨轮实体从持久化历史恢复，保证「刚才的创意」这类指代在新一轮仍可解析
        if state.entities.is_empty() {
            state.entities = self.context.entities_from_history(&state.messages);
        }

        // 指代消解后的消息进入历史，规划与持久化都以此为准
        let resolved = self.context.resolve_references(user_input, &state.entities);
        state.push_message(Message::user(resolved.clone()));

        let classified = self.intent.recognize(&resolved).await;
        state.intent = Some(classified);
        tracing::debug!(intent = ?classified.intent, confidence = classified.confidence, "routed");

        if classified.confidence < self.intent_confidence_threshold {
            // 低置信度：以澄清提问替代规划
            let question = "想先和你确认一下需求：是要查投放数据、调整计划，还是生成创意或落地页？".to_string();
            send_event(
                &self.event_tx,
                AgentEvent::ConfirmationRequest {
                    question: question.clone(),
                    kind: crate::plan::InteractionKind::Input,
                    options: vec![],
                    step_id: 0,
                },
            );
            return Drive::Respond(Some(question));
        }

        self.drive(state).await
    }

    /// 对挂起确认的应答：合并 / 重问 / 取消
    async fn resume(&self, state: &mut AgentState, user_input: &str) -> Drive {
        state.push_message(Message::user(user_input.to_string()));
        let Some(pending) = state.pending.clone() else {
            return Drive::Respond(None);
        };

        match interaction::resume(&pending, user_input) {
            ResumeOutcome::Reprompt(request) => {
                send_event(
                    &self.event_tx,
                    AgentEvent::ConfirmationRequest {
                        question: request.question.clone(),
                        kind: request.kind,
                        options: request.options.clone(),
                        step_id: request.step_id,
                    },
                );
                state.suspend(PendingInteraction {
                    request,
                    step: pending.step,
                    scope: pending.scope,
                    reprompted: true,
                });
                Drive::Awaiting
            }
            ResumeOutcome::Cancelled => {
                state.pending = None;
                if pending.scope == InteractionScope::Step {
                    state.record_result(StepResult::failed(
                        pending.step.id,
                        &pending.step.tool,
                        StepError::cancelled_by_user(),
                    ));
                }
                // 已完成的结果保留并如实呈现，未开始的步骤不再尝试
                state.plan = None;
                Drive::Respond(None)
            }
            ResumeOutcome::Approved(step) => {
                state.pending = None;
                match pending.scope {
                    InteractionScope::Plan => state.plan_confirmed = true,
                    InteractionScope::Step => {
                        state.approved_steps.push(step.id);
                        // 合并了用户补充参数的步骤写回计划
                        if let Some(plan) = &mut state.plan {
                            if let Some(slot) = plan.steps.iter_mut().find(|s| s.id == step.id) {
                                *slot = step;
                            }
                        }
                    }
                }
                self.drive(state).await
            }
        }
    }

    /// PLANNING -> EXECUTING 推进，直到回复或挂起
    async fn drive(&self, state: &mut AgentState) -> Drive {
        loop {
            state.phase = LoopPhase::Planning;

            // 超过轮数阈值先压缩工作历史（摘要保实体 ID；落库增量另行记账）
            if self.context.should_compress(&state.messages) {
                state.messages = self
                    .context
                    .compress(self.planner, &state.messages, &state.entities)
                    .await;
            }

            if state.plan.is_none() {
                match self.plan_once(state).await {
                    PlanStage::Planned => {}
                    PlanStage::Retry => continue,
                    PlanStage::Direct(text) => return Drive::Respond(Some(text)),
                    PlanStage::GiveUp(note) => return Drive::Respond(Some(note)),
                }
            }

            // 计划级费用确认（任何步骤执行前）
            if !state.plan_confirmed {
                let decision = {
                    let plan = state.plan.as_ref().expect("plan installed above");
                    self.evaluator.assess_plan(plan)
                };
                match decision {
                    Decision::Proceed => state.plan_confirmed = true,
                    Decision::Interact(request) => {
                        send_event(
                            &self.event_tx,
                            AgentEvent::ConfirmationRequest {
                                question: request.question.clone(),
                                kind: request.kind,
                                options: request.options.clone(),
                                step_id: request.step_id,
                            },
                        );
                        let first_step = state
                            .plan
                            .as_ref()
                            .expect("plan installed above")
                            .steps[0]
                            .clone();
                        state.suspend(PendingInteraction {
                            request,
                            step: first_step,
                            scope: InteractionScope::Plan,
                            reprompted: false,
                        });
                        return Drive::Awaiting;
                    }
                }
            }

            state.phase = LoopPhase::Executing;
            match self.execute_plan(state).await {
                ExecOutcome::Awaiting => return Drive::Awaiting,
                ExecOutcome::Completed => {}
            }

            let complexity = state
                .plan
                .as_ref()
                .map(|p| p.complexity)
                .unwrap_or(Complexity::SingleStep);
            state.plan = None;
            state.plan_confirmed = false;

            // 探索式任务：带着观察结果回到规划，受轮数上限约束
            if complexity == Complexity::Exploratory
                && state.rounds_used < self.max_rounds
                && !self.cancel.is_cancelled()
            {
                continue;
            }
            return Drive::Respond(None);
        }
    }

    /// 执行当前计划：就绪集评估 -> 并发派发 -> 记录结果，直到计划耗尽或挂起
    async fn execute_plan(&self, state: &mut AgentState) -> ExecOutcome {
        let plan = state.plan.clone().expect("execute without plan");
        let mut graph = PlanGraph::new(&plan.steps);

        // 恢复重入：已有结果同步进依赖图
        for result in &state.results[state.plan_results_from..] {
            if graph.state(result.step_id).is_some() {
                graph.mark_running(result.step_id);
                graph.mark_finished(result.step_id, result.success);
            }
        }

        loop {
            if self.cancel.is_cancelled() {
                for id in graph.unfinished() {
                    if !state.has_result(id) {
                        let tool = plan.step(id).map(|s| s.tool.clone()).unwrap_or_default();
                        state.record_result(StepResult::failed(
                            id,
                            tool,
                            StepError::cancelled_by_user(),
                        ));
                    }
                }
                return ExecOutcome::Completed;
            }

            let ready = graph.ready();
            if ready.is_empty() {
                return ExecOutcome::Completed;
            }

            // 就绪步骤逐个过 Evaluator；被拦截的只挂起编号最小的一个
            let mut dispatchable: Vec<PlanStep> = Vec::new();
            let mut gated: Option<PendingInteraction> = None;
            for id in ready {
                let Some(step) = plan.step(id).cloned() else {
                    continue;
                };
                let Some(tool) = self.registry.get(&step.tool) else {
                    graph.mark_running(id);
                    let skipped = graph.mark_finished(id, false);
                    state.record_result(StepResult::failed(
                        id,
                        &step.tool,
                        StepError::new("unknown_tool", format!("未注册的工具 {}", step.tool)),
                    ));
                    self.record_skipped(state, &plan, id, &skipped);
                    continue;
                };
                let approved = state.approved_steps.contains(&id);
                match self.evaluator.assess_step(&step, tool.as_ref(), approved) {
                    Decision::Proceed => dispatchable.push(step),
                    Decision::Interact(request) => {
                        if gated.is_none() {
                            gated = Some(PendingInteraction {
                                request,
                                step,
                                scope: InteractionScope::Step,
                                reprompted: false,
                            });
                        }
                    }
                }
            }

            if dispatchable.is_empty() {
                if let Some(pending) = gated {
                    send_event(
                        &self.event_tx,
                        AgentEvent::ConfirmationRequest {
                            question: pending.request.question.clone(),
                            kind: pending.request.kind,
                            options: pending.request.options.clone(),
                            step_id: pending.request.step_id,
                        },
                    );
                    state.suspend(pending);
                    return ExecOutcome::Awaiting;
                }
                continue;
            }

            for step in &dispatchable {
                graph.mark_running(step.id);
            }
            let prior = state.results[state.plan_results_from..].to_vec();
            let batch = self
                .executor
                .dispatch(
                    &state.session_id,
                    &state.user_id,
                    dispatchable,
                    &prior,
                    self.event_tx.cloned(),
                    &self.cancel,
                )
                .await;

            let turn = round_count(&state.messages) as u32;
            for result in batch {
                let skipped = graph.mark_finished(result.step_id, result.success);
                state.push_message(Message::assistant(observation_line(&result)));
                let mut harvested = self.context.harvest_entities(std::slice::from_ref(&result), turn);
                state.entities.append(&mut harvested);
                let failed_id = result.step_id;
                state.record_result(result);
                self.record_skipped(state, &plan, failed_id, &skipped);
            }
        }
    }

    fn record_skipped(
        &self,
        state: &mut AgentState,
        plan: &crate::plan::ExecutionPlan,
        failed_id: u32,
        skipped: &[u32],
    ) {
        for &sid in skipped {
            let tool = plan.step(sid).map(|s| s.tool.clone()).unwrap_or_default();
            state.record_result(StepResult::failed(
                sid,
                tool,
                StepError::skipped_dependency(failed_id),
            ));
        }
    }

    /// 一次规划调用；校验失败重规划一次后放弃
    async fn plan_once(&self, state: &mut AgentState) -> PlanStage {
        if state.rounds_used >= self.max_rounds {
            return PlanStage::GiveUp(
                "这个任务的步骤超出了单次处理上限，已为你保留当前进度，请拆分后再试。".to_string(),
            );
        }
        state.rounds_used += 1;
        send_event(&self.event_tx, AgentEvent::Thinking);

        // 两阶段收窄：规划只暴露与意图相关的工具
        let categories = state
            .intent
            .map(|c| categories_for(c.intent))
            .unwrap_or_default();
        let active = if categories.is_empty() {
            self.registry.subset(&[])
        } else {
            self.registry.subset(&categories)
        };
        let definitions = active.definitions_json();
        let schema = planner_output_schema_json();

        let raw = match self
            .planner
            .plan(&state.messages, &definitions, &schema, &state.entities, "")
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(code = e.code(), error = %e, "planning call failed");
                state.error = Some(e.code().to_string());
                send_event(
                    &self.event_tx,
                    AgentEvent::Error {
                        code: e.code().to_string(),
                        message: "模型服务暂时不可用".to_string(),
                    },
                );
                return PlanStage::GiveUp("系统开小差了，请稍后重试。".to_string());
            }
        };

        let parsed = parse_planner_output(&raw);
        match parsed {
            Ok(PlannerOutput::Reply(text)) => PlanStage::Direct(text),
            Ok(PlannerOutput::Clarify(question)) => {
                send_event(
                    &self.event_tx,
                    AgentEvent::ConfirmationRequest {
                        question: question.clone(),
                        kind: crate::plan::InteractionKind::Input,
                        options: vec![],
                        step_id: 0,
                    },
                );
                PlanStage::Direct(question)
            }
            Ok(PlannerOutput::Plan(mut plan)) => {
                let names = active.names();
                if let Err(e) = plan.validate(&names) {
                    return self.handle_invalid_plan(state, e.to_string());
                }
                plan.finalize(self.plan_cost_threshold);
                send_event(
                    &self.event_tx,
                    AgentEvent::PlanReady {
                        goal: plan.goal.clone(),
                        steps: plan.steps.len(),
                        estimated_cost: plan.estimated_cost,
                    },
                );
                state.plan_results_from = state.results.len();
                state.plan = Some(plan);
                PlanStage::Planned
            }
            Err(e) => self.handle_invalid_plan(state, e.to_string()),
        }
    }

    /// 计划不合法：注入纠错提示重规划一次，再失败则放弃
    fn handle_invalid_plan(&self, state: &mut AgentState, detail: String) -> PlanStage {
        tracing::warn!(detail = %detail, replanned = state.replanned, "invalid plan");
        if !state.replanned {
            state.replanned = true;
            state.push_message(Message::system(format!(
                "上一次输出的计划不合法：{detail}。请重新输出一个 JSON 对象：\
                 只使用已注册的工具名，步骤编号从 1 递增，depends_on 只能引用更小的编号。"
            )));
            state.plan = None;
            PlanStage::Retry
        } else {
            state.error = Some("validation".to_string());
            send_event(
                &self.event_tx,
                AgentEvent::Error {
                    code: "validation".to_string(),
                    message: "无法生成有效的执行计划".to_string(),
                },
            );
            PlanStage::GiveUp("抱歉，这个请求我暂时没能规划出可执行的方案，请换个说法试试。".to_string())
        }
    }

    /// RESPONDING：合成最终回复并流式推送
    async fn respond(
        &self,
        state: &mut AgentState,
        user_input: &str,
        direct: Option<String>,
    ) -> String {
        state.phase = LoopPhase::Responding;

        let error_note = state.error.as_deref().map(|_| "处理过程中遇到了问题，请稍后重试。");
        let text = match direct {
            Some(text) if !text.is_empty() => text,
            _ => {
                self.response
                    .generate(user_input, &state.results, error_note)
                    .await
            }
        };

        let chars: Vec<char> = text.chars().collect();
        for chunk in chars.chunks(CHUNK_CHARS) {
            send_event(
                &self.event_tx,
                AgentEvent::Token {
                    content: chunk.iter().collect(),
                },
            );
        }

        state.push_message(Message::assistant(text.clone()));
        text
    }

    /// PERSISTING：历史增量落库（有限重试）+ 快照写入/清除；失败只记日志
    async fn persist(&self, state: &mut AgentState) {
        state.phase = LoopPhase::Persisting;

        let unsaved = state.unsaved_messages().to_vec();
        if !unsaved.is_empty() {
            let mut saved = false;
            for attempt in 1..=PERSIST_ATTEMPTS {
                match self.memory.save_messages(&state.session_id, &unsaved).await {
                    Ok(()) => {
                        saved = true;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(attempt, error = %e, "save messages failed");
                    }
                }
            }
            if saved {
                state.mark_persisted();
            }
        }

        let snapshot_result = if state.is_awaiting() {
            match state.snapshot() {
                Ok(json) => self.memory.save_snapshot(&state.session_id, &json).await,
                Err(e) => Err(e),
            }
        } else {
            self.memory.clear_snapshot(&state.session_id).await
        };
        if let Err(e) = snapshot_result {
            tracing::warn!(error = %e, "snapshot persistence failed");
        }
    }
}

/// 规划阶段的内部结果
enum PlanStage {
    Planned,
    /// 直接回复 / 澄清提问
    Direct(String),
    /// 注入纠错提示后重试
    Retry,
    GiveUp(String),
}

fn observation_line(result: &StepResult) -> String {
    let detail = if result.success {
        let s = result.payload.to_string();
        if s.chars().count() > OBSERVATION_PREVIEW_CHARS {
            let preview: String = s.chars().take(OBSERVATION_PREVIEW_CHARS).collect();
            format!("{preview}...")
        } else {
            s
        }
    } else {
        result
            .error
            .as_ref()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "失败".to_string())
    };
    format!(
        "步骤{} {} -> {}：{}",
        result.step_id,
        result.tool,
        if result.success { "成功" } else { "失败" },
        detail
    )
}
