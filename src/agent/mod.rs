//! 编排层：意图路由、规划、风险评估、人机交互、执行与回复合成

pub mod context;
pub mod evaluator;
pub mod events;
pub mod executor;
pub mod intent;
pub mod interaction;
pub mod loop_;
pub mod planner;
pub mod response;

pub use context::{ContextManager, EntityRef};
pub use evaluator::{Decision, Evaluator};
pub use events::AgentEvent;
pub use executor::StepExecutor;
pub use intent::{categories_for, Classified, Intent, IntentRecognizer};
pub use interaction::{merge_param, resume, ResumeOutcome};
pub use loop_::{OrchestrationTurn, TurnOutcome};
pub use planner::{parse_planner_output, Planner, PlannerOutput};
pub use response::ResponseGenerator;
