//! Executor：单步执行与并发派发
//!
//! 单步流程：解析符号引用 -> 点数校验 -> （Upfront 先扣费）-> 带超时调用工具 ->
//! 成功扣费 / 失败按瞬时性退避重试，重试耗尽时退回未消耗的预扣点数。
//! 扣费与退款的 operation_id 由 (session_id, step_id) 派生，重试天然幂等。
//! 互不依赖的就绪步骤并发派发（信号量限流），结果按完成顺序返回、带 step_id 标记。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::agent::events::AgentEvent;
use crate::core::backoff::RetryPolicy;
use crate::credit::CreditGateway;
use crate::plan::{PlanStep, StepError, StepResult};
use crate::tools::{Billing, ToolError, ToolRegistry};

/// 步骤执行器；字段均为共享句柄，clone 成本低，供并发派发时随任务移动
#[derive(Clone)]
pub struct StepExecutor {
    registry: Arc<ToolRegistry>,
    credit: Arc<dyn CreditGateway>,
    retry: RetryPolicy,
    call_timeout: Duration,
    semaphore: Arc<Semaphore>,
}

impl StepExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        credit: Arc<dyn CreditGateway>,
        retry: RetryPolicy,
        call_timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            registry,
            credit,
            retry,
            call_timeout,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// 执行一个依赖已全部满足的步骤
    pub async fn run_step(
        &self,
        session_id: &str,
        user_id: &str,
        step: &PlanStep,
        prior: &[StepResult],
        event_tx: Option<UnboundedSender<AgentEvent>>,
        cancel: &CancellationToken,
    ) -> StepResult {
        let Some(tool) = self.registry.get(&step.tool) else {
            return StepResult::failed(
                step.id,
                &step.tool,
                StepError::new("unknown_tool", format!("未注册的工具 {}", step.tool)),
            );
        };

        // 1. 符号引用解析；缺失引用是计划级错误，不重试
        let resolved = match resolve_params(&step.params, prior) {
            Ok(v) => v,
            Err(msg) => {
                return StepResult::failed(step.id, &step.tool, StepError::new("invalid_reference", msg));
            }
        };

        // 2. 点数校验：不足则短路，不调用也不扣费
        let estimate = tool.estimate_cost(&resolved);
        if estimate > 0 {
            match self.credit.check(user_id, estimate).await {
                Ok(true) => {}
                Ok(false) => {
                    return StepResult::failed(
                        step.id,
                        &step.tool,
                        StepError::insufficient_credit(estimate),
                    );
                }
                Err(e) => {
                    return StepResult::failed(
                        step.id,
                        &step.tool,
                        StepError::new(e.code(), e.to_string()),
                    );
                }
            }
        }

        let op_id = format!("{session_id}:{}", step.id);
        let upfront = tool.billing() == Billing::Upfront && estimate > 0;
        if upfront {
            if let Err(e) = self.credit.deduct(user_id, estimate, &op_id).await {
                return StepResult::failed(step.id, &step.tool, StepError::new(e.code(), e.to_string()));
            }
        }

        if let Some(tx) = &event_tx {
            let _ = tx.send(AgentEvent::ToolStart {
                tool: step.tool.clone(),
            });
        }

        // 3-5. 带超时调用 + 指数退避重试
        let start = Instant::now();
        let mut attempt = 0u32;
        let mut last_err: ToolError;
        loop {
            attempt += 1;

            if cancel.is_cancelled() {
                if upfront {
                    let _ = self
                        .credit
                        .refund(user_id, estimate, &format!("{op_id}:refund"))
                        .await;
                }
                return StepResult::failed(step.id, &step.tool, StepError::cancelled_by_user());
            }

            let outcome = {
                let _permit = self
                    .semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("tool semaphore closed");
                timeout(self.call_timeout, tool.invoke(resolved.clone(), &op_id)).await
            };

            match outcome {
                Ok(Ok(payload)) => {
                    let actual = payload["credits_consumed"]
                        .as_u64()
                        .map(|v| v as u32)
                        .unwrap_or(estimate);
                    if upfront {
                        if actual < estimate {
                            let _ = self
                                .credit
                                .refund(user_id, estimate - actual, &format!("{op_id}:refund"))
                                .await;
                        }
                    } else if actual > 0 {
                        if let Err(e) = self.credit.deduct(user_id, actual, &op_id).await {
                            tracing::warn!(step = step.id, error = %e, "deduct after success failed");
                        }
                    }

                    self.audit(&step.tool, true, "ok", attempt, start.elapsed());
                    if let Some(tx) = &event_tx {
                        let _ = tx.send(AgentEvent::ToolComplete {
                            tool: step.tool.clone(),
                            result: payload.clone(),
                        });
                    }
                    return StepResult::ok(step.id, &step.tool, payload, actual);
                }
                Ok(Err(err)) => {
                    last_err = err;
                }
                Err(_elapsed) => {
                    // 超时按瞬时失败处理，进入重试
                    last_err = ToolError::transient(format!(
                        "timed out after {}s",
                        self.call_timeout.as_secs()
                    ));
                }
            }

            if last_err.retryable && attempt < self.retry.max_attempts {
                let delay = self.retry.delay_for(attempt);
                if let Some(tx) = &event_tx {
                    let _ = tx.send(AgentEvent::StepRetrying {
                        tool: step.tool.clone(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                    });
                }
                tracing::debug!(
                    tool = %step.tool,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            // 6. 重试耗尽或不可重试：落失败，退回未消耗的预扣部分
            if upfront {
                let unconsumed = estimate.saturating_sub(last_err.consumed);
                if unconsumed > 0 {
                    let _ = self
                        .credit
                        .refund(user_id, unconsumed, &format!("{op_id}:refund"))
                        .await;
                }
            }
            let outcome_tag = if last_err.retryable { "exhausted" } else { "error" };
            self.audit(&step.tool, false, outcome_tag, attempt, start.elapsed());

            let code = if last_err.retryable {
                "connectivity"
            } else {
                "tool_execution"
            };
            let mut result =
                StepResult::failed(step.id, &step.tool, StepError::new(code, last_err.message));
            result.credits_spent = if upfront { last_err.consumed } else { 0 };
            return result;
        }
    }

    /// 并发派发一批互不依赖的就绪步骤；等待全部结束后按完成顺序返回
    pub async fn dispatch(
        &self,
        session_id: &str,
        user_id: &str,
        steps: Vec<PlanStep>,
        prior: &[StepResult],
        event_tx: Option<UnboundedSender<AgentEvent>>,
        cancel: &CancellationToken,
    ) -> Vec<StepResult> {
        let prior: Arc<Vec<StepResult>> = Arc::new(prior.to_vec());
        let mut join_set = JoinSet::new();

        for step in steps {
            let executor = self.clone();
            let session_id = session_id.to_string();
            let user_id = user_id.to_string();
            let prior = prior.clone();
            let event_tx = event_tx.clone();
            let cancel = cancel.clone();
            join_set.spawn(async move {
                executor
                    .run_step(&session_id, &user_id, &step, &prior, event_tx, &cancel)
                    .await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!(error = %e, "step task panicked"),
            }
        }
        results
    }

    /// 每次工具调用一条结构化审计日志
    fn audit(&self, tool: &str, ok: bool, outcome: &str, attempts: u32, elapsed: Duration) {
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool,
            "ok": ok,
            "outcome": outcome,
            "attempts": attempts,
            "duration_ms": elapsed.as_millis() as u64,
        });
        tracing::info!(audit = %audit.to_string(), "tool");
    }
}

/// 递归解析符号引用：{"$step": N, "$path": "data.xxx[0]"} 替换为前序结果中的值
pub fn resolve_params(params: &Value, prior: &[StepResult]) -> Result<Value, String> {
    match params {
        Value::Object(map) => {
            if let Some(step_id) = map.get("$step").and_then(|v| v.as_u64()) {
                let result = prior
                    .iter()
                    .find(|r| r.step_id == step_id as u32)
                    .ok_or_else(|| format!("引用的步骤 {step_id} 没有结果"))?;
                if !result.success {
                    return Err(format!("引用的步骤 {step_id} 未成功"));
                }
                return match map.get("$path").and_then(|v| v.as_str()) {
                    Some(path) => extract_path(&result.payload, path)
                        .ok_or_else(|| format!("步骤 {step_id} 的结果中不存在路径 {path}")),
                    None => Ok(result.payload.clone()),
                };
            }
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), resolve_params(v, prior)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(arr) => {
            let mut out = Vec::with_capacity(arr.len());
            for v in arr {
                out.push(resolve_params(v, prior)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

/// 按点分路径取值，段内支持 [idx] 下标：如 "campaigns[0].id"
fn extract_path(value: &Value, path: &str) -> Option<Value> {
    let mut cursor = value;
    for segment in path.split('.') {
        let (field, indices) = parse_segment(segment);
        if !field.is_empty() {
            cursor = cursor.get(field)?;
        }
        for idx in indices {
            cursor = cursor.get(idx)?;
        }
    }
    Some(cursor.clone())
}

fn parse_segment(segment: &str) -> (&str, Vec<usize>) {
    match segment.find('[') {
        None => (segment, Vec::new()),
        Some(pos) => {
            let field = &segment[..pos];
            let indices = segment[pos..]
                .split('[')
                .filter(|s| !s.is_empty())
                .filter_map(|s| s.trim_end_matches(']').parse().ok())
                .collect();
            (field, indices)
        }
    }
}
