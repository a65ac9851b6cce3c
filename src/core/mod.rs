//! 核心层：错误分类、退避策略、编排状态与装配

pub mod backoff;
pub mod error;
pub mod orchestrator;
pub mod state;

pub use backoff::RetryPolicy;
pub use error::AgentError;
pub use orchestrator::{build_registry, Orchestrator};
pub use state::{AgentState, InteractionScope, LoopPhase, PendingInteraction};
