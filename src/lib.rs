//! AdPilot - 广告 SaaS 对话式自动化核心
//!
//! 用户的一句自然语言请求在这里被拆解为带依赖顺序的工具调用序列：
//! 风险与高花费操作经人工确认放行，点数在调用前后校验/扣减/退回，
//! 瞬时失败走退避重试，最终结果合成为流式回复。
//!
//! 模块划分：
//! - **agent**: 编排循环（意图路由、规划、评估、人机交互、执行、回复）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、退避策略、编排状态与装配
//! - **credit**: 点数网关（check / deduct / refund，operation_id 幂等）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 对话历史与会话持久化（SQLite）
//! - **observability**: 日志初始化
//! - **plan**: 执行计划类型、校验与依赖调度
//! - **tools**: 工具注册表与五类能力端点委托

pub mod agent;
pub mod config;
pub mod core;
pub mod credit;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod plan;
pub mod tools;

pub use crate::agent::{AgentEvent, OrchestrationTurn, TurnOutcome};
pub use crate::core::{AgentState, Orchestrator};
