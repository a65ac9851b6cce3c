//! 错误类型与瞬时性分类
//!
//! Executor 依据 `is_transient` 决定是否进入退避重试；错误码只进日志，不对用户展示。

use thiserror::Error;

/// 编排过程中可能出现的错误（连接、工具、点数、计划校验、模型调用等）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 后端不可达 / 网络超时，可重试
    #[error("backend unreachable: {0}")]
    Connectivity(String),

    /// 工具执行返回失败；retryable 由工具自身声明（幂等工具才可安全重试）
    #[error("tool {tool} failed: {message}")]
    ToolExecution {
        tool: String,
        message: String,
        retryable: bool,
    },

    /// 单次工具调用超时，按瞬时失败处理
    #[error("tool {0} timed out")]
    ToolTimeout(String),

    /// 点数余额不足：该步骤直接短路，不调用、不扣费、不重试
    #[error("insufficient credit: require {required}")]
    InsufficientCredit { required: u32 },

    /// 计划/参数不合法（规划缺陷），触发一次重新规划后放弃
    #[error("invalid plan: {0}")]
    Validation(String),

    /// LLM 调用失败，本轮规划/回复终止，提示用户重试
    #[error("model call failed: {0}")]
    Model(String),

    /// 用户取消：步骤的正常终态，不算失败
    #[error("cancelled by user")]
    Cancelled,

    /// 持久化层错误（对用户响应 best-effort，不致命）
    #[error("store error: {0}")]
    Store(String),

    /// 规划命中未注册的工具名
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

impl AgentError {
    /// 是否瞬时失败（进入退避重试）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AgentError::Connectivity(_)
                | AgentError::ToolTimeout(_)
                | AgentError::ToolExecution { retryable: true, .. }
        )
    }

    /// 日志用错误码；不出现在用户可见文案中
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Connectivity(_) => "connectivity",
            AgentError::ToolExecution { .. } => "tool_execution",
            AgentError::ToolTimeout(_) => "tool_timeout",
            AgentError::InsufficientCredit { .. } => "insufficient_credit",
            AgentError::Validation(_) => "validation",
            AgentError::Model(_) => "model",
            AgentError::Cancelled => "user_cancelled",
            AgentError::Store(_) => "store",
            AgentError::UnknownTool(_) => "unknown_tool",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AgentError::Connectivity("dns".into()).is_transient());
        assert!(AgentError::ToolTimeout("report_query".into()).is_transient());
        assert!(AgentError::ToolExecution {
            tool: "creative_generate".into(),
            message: "503".into(),
            retryable: true,
        }
        .is_transient());
        assert!(!AgentError::ToolExecution {
            tool: "campaign_pause".into(),
            message: "permission denied".into(),
            retryable: false,
        }
        .is_transient());
        assert!(!AgentError::InsufficientCredit { required: 10 }.is_transient());
        assert!(!AgentError::Validation("bad ref".into()).is_transient());
    }
}
