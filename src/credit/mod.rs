//! 点数网关
//!
//! 包装计费服务的 check / deduct / refund 三个窄接口，均以 operation_id 幂等：
//! 同一 operation_id 的重复 deduct 只扣一次（返回 AlreadyApplied），重复 refund 只退一次。
//! Executor 以 "{session_id}:{step_id}" 派生 operation_id，重试不会重复扣费。

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::core::error::AgentError;

/// 扣费结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeductOutcome {
    Applied,
    /// 同一 operation_id 已扣过，余额不再变化
    AlreadyApplied,
}

#[async_trait]
pub trait CreditGateway: Send + Sync {
    /// 余额是否足以覆盖预估消耗
    async fn check(&self, user_id: &str, estimated: u32) -> Result<bool, AgentError>;

    async fn deduct(
        &self,
        user_id: &str,
        amount: u32,
        operation_id: &str,
    ) -> Result<DeductOutcome, AgentError>;

    async fn refund(&self, user_id: &str, amount: u32, operation_id: &str)
        -> Result<(), AgentError>;
}

/// 内存实现：本地运行与测试用
pub struct InMemoryCreditGateway {
    balances: RwLock<HashMap<String, i64>>,
    applied: RwLock<HashSet<String>>,
    initial_balance: i64,
}

impl InMemoryCreditGateway {
    pub fn new(initial_balance: u32) -> Self {
        Self {
            balances: RwLock::new(HashMap::new()),
            applied: RwLock::new(HashSet::new()),
            initial_balance: initial_balance as i64,
        }
    }

    pub async fn balance(&self, user_id: &str) -> i64 {
        self.balances
            .read()
            .await
            .get(user_id)
            .copied()
            .unwrap_or(self.initial_balance)
    }
}

#[async_trait]
impl CreditGateway for InMemoryCreditGateway {
    async fn check(&self, user_id: &str, estimated: u32) -> Result<bool, AgentError> {
        Ok(self.balance(user_id).await >= estimated as i64)
    }

    async fn deduct(
        &self,
        user_id: &str,
        amount: u32,
        operation_id: &str,
    ) -> Result<DeductOutcome, AgentError> {
        let mut applied = self.applied.write().await;
        if !applied.insert(format!("deduct:{operation_id}")) {
            return Ok(DeductOutcome::AlreadyApplied);
        }
        let mut balances = self.balances.write().await;
        let entry = balances
            .entry(user_id.to_string())
            .or_insert(self.initial_balance);
        *entry -= amount as i64;
        Ok(DeductOutcome::Applied)
    }

    async fn refund(
        &self,
        user_id: &str,
        amount: u32,
        operation_id: &str,
    ) -> Result<(), AgentError> {
        let mut applied = self.applied.write().await;
        if !applied.insert(format!("refund:{operation_id}")) {
            return Ok(());
        }
        let mut balances = self.balances.write().await;
        let entry = balances
            .entry(user_id.to_string())
            .or_insert(self.initial_balance);
        *entry += amount as i64;
        Ok(())
    }
}

/// 计费服务 HTTP 客户端
pub struct HttpCreditGateway {
    http: reqwest::Client,
    base_url: String,
}

impl HttpCreditGateway {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("adpilot/0.1")
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post(&self, op: &str, body: Value) -> Result<Value, AgentError> {
        let url = format!("{}/credits/{}", self.base_url, op);
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Connectivity(format!("credit gateway: {e}")))?;
        if !resp.status().is_success() {
            return Err(AgentError::Connectivity(format!(
                "credit gateway HTTP {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| AgentError::Connectivity(format!("credit gateway body: {e}")))
    }
}

#[async_trait]
impl CreditGateway for HttpCreditGateway {
    async fn check(&self, user_id: &str, estimated: u32) -> Result<bool, AgentError> {
        let payload = self
            .post(
                "check",
                serde_json::json!({ "user_id": user_id, "estimated": estimated }),
            )
            .await?;
        Ok(payload["allowed"].as_bool().unwrap_or(false))
    }

    async fn deduct(
        &self,
        user_id: &str,
        amount: u32,
        operation_id: &str,
    ) -> Result<DeductOutcome, AgentError> {
        let payload = self
            .post(
                "deduct",
                serde_json::json!({
                    "user_id": user_id,
                    "amount": amount,
                    "operation_id": operation_id,
                }),
            )
            .await?;
        if payload["already_applied"].as_bool().unwrap_or(false) {
            Ok(DeductOutcome::AlreadyApplied)
        } else {
            Ok(DeductOutcome::Applied)
        }
    }

    async fn refund(
        &self,
        user_id: &str,
        amount: u32,
        operation_id: &str,
    ) -> Result<(), AgentError> {
        self.post(
            "refund",
            serde_json::json!({
                "user_id": user_id,
                "amount": amount,
                "operation_id": operation_id,
            }),
        )
        .await?;
        Ok(())
    }
}
