//! 编排器装配：进程启动时构建全部组件
//!
//! 负责：加载配置、创建 LLM / 点数网关 / 会话存储、注册能力工具并校验注册表、
//! 组装 Planner / Evaluator / Executor / ContextManager / ResponseGenerator，
//! 对外暴露 handle_message：加载历史与挂起快照 -> 驱动单轮编排 -> 返回结果。
//! 注册表作为显式依赖注入各组件，不走全局单例，便于按会话隔离测试。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::agent::{
    AgentEvent, ContextManager, Evaluator, IntentRecognizer, OrchestrationTurn, Planner,
    ResponseGenerator, StepExecutor, TurnOutcome,
};
use crate::config::{load_config, AppConfig};
use crate::core::backoff::RetryPolicy;
use crate::core::state::AgentState;
use crate::credit::{CreditGateway, HttpCreditGateway, InMemoryCreditGateway};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{InMemoryStore, MemoryStore, SqliteMemoryStore};
use crate::tools::{
    CampaignBudgetTool, CampaignDeleteTool, CampaignListTool, CampaignPauseTool,
    CapabilityClient, CreativeGenerateTool, LandingPageTool, MarketInsightTool, ReportQueryTool,
    ToolRegistry,
};

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
pub(crate) fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        let base = cfg
            .llm
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.deepseek.com/v1".to_string());
        let key = std::env::var("DEEPSEEK_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok();
        tracing::info!("Using DeepSeek LLM ({})", cfg.llm.model);
        Arc::new(OpenAiClient::new(
            Some(&base),
            &cfg.llm.model,
            key.as_deref(),
        ))
    } else if use_openai {
        tracing::info!("Using OpenAI LLM ({})", cfg.llm.model);
        Arc::new(OpenAiClient::new(
            cfg.llm.base_url.as_deref(),
            &cfg.llm.model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient::new())
    }
}

/// 注册五类能力工具；重名视为装载错误
pub fn build_registry(client: Arc<CapabilityClient>) -> anyhow::Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry
        .register(CreativeGenerateTool::new(client.clone()))
        .map_err(anyhow::Error::msg)?;
    registry
        .register(ReportQueryTool::new(client.clone()))
        .map_err(anyhow::Error::msg)?;
    registry
        .register(MarketInsightTool::new(client.clone()))
        .map_err(anyhow::Error::msg)?;
    registry
        .register(LandingPageTool::new(client.clone()))
        .map_err(anyhow::Error::msg)?;
    registry
        .register(CampaignListTool::new(client.clone()))
        .map_err(anyhow::Error::msg)?;
    registry
        .register(CampaignPauseTool::new(client.clone()))
        .map_err(anyhow::Error::msg)?;
    registry
        .register(CampaignBudgetTool::new(client.clone()))
        .map_err(anyhow::Error::msg)?;
    registry
        .register(CampaignDeleteTool::new(client))
        .map_err(anyhow::Error::msg)?;
    Ok(registry)
}

fn load_system_prompt() -> String {
    ["config/prompts/system.txt", "../config/prompts/system.txt"]
        .into_iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .unwrap_or_else(|| {
            "你是广告投放平台的智能助手，负责把用户需求拆解为工具调用计划。\
             只使用提供的工具；拿不准的参数不要编造，留空让系统向用户确认。"
                .to_string()
        })
}

/// 编排器：持有全部共享组件，按会话驱动编排循环
pub struct Orchestrator {
    cfg: AppConfig,
    registry: Arc<ToolRegistry>,
    memory: Arc<dyn MemoryStore>,
    planner: Planner,
    evaluator: Evaluator,
    executor: StepExecutor,
    context: ContextManager,
    response: ResponseGenerator,
    intent: IntentRecognizer,
}

impl Orchestrator {
    /// 以显式依赖装配（测试与嵌入场景）
    pub fn new(
        cfg: AppConfig,
        llm: Arc<dyn LlmClient>,
        registry: ToolRegistry,
        credit: Arc<dyn CreditGateway>,
        memory: Arc<dyn MemoryStore>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(!registry.is_empty(), "tool registry must not be empty");
        let registry = Arc::new(registry);

        let retry = RetryPolicy::new(
            cfg.orchestrator.retry_max_attempts,
            Duration::from_millis(cfg.orchestrator.backoff_base_ms),
            Duration::from_millis(cfg.orchestrator.backoff_max_ms),
        );
        let executor = StepExecutor::new(
            registry.clone(),
            credit,
            retry,
            Duration::from_secs(cfg.orchestrator.tool_timeout_secs),
            cfg.orchestrator.max_concurrent_tools,
        );

        Ok(Self {
            planner: Planner::new(llm.clone(), load_system_prompt()),
            evaluator: Evaluator::new(cfg.orchestrator.per_step_cost_threshold),
            executor,
            context: ContextManager::new(
                cfg.orchestrator.compress_after_rounds,
                cfg.orchestrator.compress_keep_recent,
            ),
            response: ResponseGenerator::new(llm.clone()),
            intent: IntentRecognizer::new(llm),
            registry,
            memory,
            cfg,
        })
    }

    /// 从配置文件与环境变量装配（生产路径）
    pub fn from_config(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let cfg = load_config(config_path).unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            AppConfig::default()
        });

        let llm = create_llm_from_config(&cfg);

        let capability = Arc::new(CapabilityClient::new(
            cfg.tools.backend_url.clone(),
            cfg.tools.timeout_secs,
        ));
        let registry = build_registry(capability)?;

        let credit: Arc<dyn CreditGateway> = match cfg.credit.backend.as_str() {
            "memory" => Arc::new(InMemoryCreditGateway::new(cfg.credit.initial_balance)),
            _ => Arc::new(HttpCreditGateway::new(
                cfg.credit.base_url.clone(),
                cfg.credit.timeout_secs,
            )),
        };

        let memory: Arc<dyn MemoryStore> = match cfg.memory.backend.as_str() {
            "memory" => Arc::new(InMemoryStore::new()),
            _ => {
                if let Some(parent) = cfg.memory.db_path.parent() {
                    std::fs::create_dir_all(parent).ok();
                }
                Arc::new(SqliteMemoryStore::new(&cfg.memory.db_path)?)
            }
        };

        Self::new(cfg, llm, registry, credit, memory)
    }

    /// 处理一条用户消息：加载历史与挂起快照，驱动单轮编排
    ///
    /// 会话由 Web 层创建与鉴权；这里只按 session_id 读写关联状态。
    pub async fn handle_message(
        &self,
        session_id: &str,
        user_id: &str,
        input: &str,
        event_tx: Option<&UnboundedSender<AgentEvent>>,
        cancel: CancellationToken,
    ) -> anyhow::Result<TurnOutcome> {
        let mut state = match self.memory.load_snapshot(session_id).await {
            Ok(Some(snapshot)) => match AgentState::restore(&snapshot) {
                Ok(state) if state.is_awaiting() => state,
                _ => {
                    tracing::warn!(session_id, "stale snapshot ignored");
                    self.fresh_state(session_id, user_id).await
                }
            },
            Ok(None) => self.fresh_state(session_id, user_id).await,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "snapshot load failed");
                self.fresh_state(session_id, user_id).await
            }
        };

        let turn = OrchestrationTurn {
            planner: &self.planner,
            evaluator: &self.evaluator,
            executor: &self.executor,
            context: &self.context,
            response: &self.response,
            intent: &self.intent,
            registry: &self.registry,
            memory: self.memory.as_ref(),
            event_tx,
            cancel,
            intent_confidence_threshold: self.cfg.orchestrator.intent_confidence_threshold,
            plan_cost_threshold: self.cfg.orchestrator.plan_cost_threshold,
            max_rounds: self.cfg.orchestrator.max_rounds,
        };

        Ok(turn.run(&mut state, input).await)
    }

    async fn fresh_state(&self, session_id: &str, user_id: &str) -> AgentState {
        let history = self
            .memory
            .load_messages(session_id, self.cfg.app.history_load_limit)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(session_id, error = %e, "history load failed");
                Vec::new()
            });
        AgentState::fresh(session_id, user_id, history)
    }
}
