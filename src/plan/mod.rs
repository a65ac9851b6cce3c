//! 执行计划：类型、结构校验与依赖调度

pub mod graph;
pub mod types;

pub use graph::{NodeState, PlanGraph};
pub use types::{
    Complexity, ConfirmOption, ConfirmationRequest, ExecutionPlan, InteractionKind, PlanError,
    PlanStep, StepError, StepResult,
};
