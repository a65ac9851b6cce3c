//! 工具层：注册表、能力后端客户端与五类能力工具

pub mod backend;
pub mod campaign;
pub mod creative;
pub mod landing;
pub mod market;
pub mod registry;
pub mod report;
pub mod schema;

pub use backend::CapabilityClient;
pub use campaign::{CampaignBudgetTool, CampaignDeleteTool, CampaignListTool, CampaignPauseTool};
pub use creative::CreativeGenerateTool;
pub use landing::LandingPageTool;
pub use market::MarketInsightTool;
pub use registry::{
    param_presets, required_params, Billing, RiskLevel, Tool, ToolCategory, ToolError,
    ToolRegistry,
};
pub use report::ReportQueryTool;
pub use schema::planner_output_schema_json;
