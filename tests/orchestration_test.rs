//! 编排集成测试
//!
//! 用脚本化 Mock LLM + 桩工具 + 内存点数/存储驱动完整的
//! 规划 -> 确认 -> 执行 -> 回复流程，覆盖确认门控、取消收敛、
//! 计划级费用确认、重规划一次与跨轮指代解析等场景。

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use adpilot::agent::AgentEvent;
use adpilot::config::AppConfig;
use adpilot::core::Orchestrator;
use adpilot::credit::InMemoryCreditGateway;
use adpilot::llm::MockLlmClient;
use adpilot::memory::{InMemoryStore, MemoryStore};
use adpilot::tools::{Billing, RiskLevel, Tool, ToolCategory, ToolError, ToolRegistry};

/// 桩工具：记录调用次数与最近一次参数，返回固定载荷
struct StubTool {
    name: &'static str,
    category: ToolCategory,
    risk: RiskLevel,
    billing: Billing,
    /// 固定点数；配合 budget_derived 折算预算
    fixed_cost: u32,
    budget_derived: bool,
    payload: Value,
    calls: Arc<AtomicU32>,
    last_params: Arc<Mutex<Value>>,
}

impl StubTool {
    fn new(name: &'static str, category: ToolCategory, payload: Value) -> Self {
        Self {
            name,
            category,
            risk: RiskLevel::Low,
            billing: Billing::PerCall,
            fixed_cost: 0,
            budget_derived: false,
            payload,
            calls: Arc::new(AtomicU32::new(0)),
            last_params: Arc::new(Mutex::new(Value::Null)),
        }
    }

    fn destructive(mut self) -> Self {
        self.risk = RiskLevel::Destructive;
        self
    }

    fn budget_derived(mut self) -> Self {
        self.budget_derived = true;
        self
    }

    fn handles(&self) -> (Arc<AtomicU32>, Arc<Mutex<Value>>) {
        (self.calls.clone(), self.last_params.clone())
    }
}

#[async_trait]
impl Tool for StubTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "stub"
    }
    fn category(&self) -> ToolCategory {
        self.category
    }
    fn risk_level(&self) -> RiskLevel {
        self.risk
    }
    fn billing(&self) -> Billing {
        self.billing
    }
    fn estimate_cost(&self, params: &Value) -> u32 {
        if self.budget_derived {
            (params["daily_budget"].as_f64().unwrap_or(0.0) as u32) / 10
        } else {
            self.fixed_cost
        }
    }
    async fn invoke(&self, params: Value, _op: &str) -> Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_params.lock().unwrap() = params;
        Ok(self.payload.clone())
    }
}

fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.orchestrator.backoff_base_ms = 4;
    cfg.orchestrator.backoff_max_ms = 50;
    cfg.orchestrator.tool_timeout_secs = 2;
    cfg.orchestrator.per_step_cost_threshold = 50;
    cfg.orchestrator.plan_cost_threshold = 100;
    cfg
}

fn build(
    cfg: AppConfig,
    llm: Arc<MockLlmClient>,
    registry: ToolRegistry,
    store: Arc<InMemoryStore>,
) -> Orchestrator {
    Orchestrator::new(
        cfg,
        llm,
        registry,
        Arc::new(InMemoryCreditGateway::new(1000)),
        store,
    )
    .expect("orchestrator")
}

fn collect_events(rx: &mut tokio::sync::mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

fn has_confirmation_for(events: &[AgentEvent], step_id: u32) -> bool {
    events.iter().any(|e| {
        matches!(e, AgentEvent::ConfirmationRequest { step_id: id, .. } if *id == step_id)
    })
}

/// 场景：暂停计划（不可逆）+ 预算翻倍（高花费，依赖步骤 1）。
/// 步骤 1 在任何执行前被确认拦截；放行后执行步骤 1，再因费用拦截步骤 2。
#[tokio::test]
async fn test_pause_then_double_budget_confirmation_chain() {
    let pause = StubTool::new(
        "campaign_pause",
        ToolCategory::Campaign,
        serde_json::json!({"campaign_id": "c_01", "status": "paused"}),
    )
    .destructive();
    let budget = StubTool::new(
        "campaign_update_budget",
        ToolCategory::Campaign,
        serde_json::json!({"campaign_id": "c_01", "daily_budget": 1600.0}),
    )
    .budget_derived();
    let (pause_calls, _) = pause.handles();
    let (budget_calls, budget_params) = budget.handles();

    let mut registry = ToolRegistry::new();
    registry.register(pause).unwrap();
    registry.register(budget).unwrap();

    let llm = Arc::new(MockLlmClient::new());
    llm.push(
        r#"{"kind": "plan", "goal": "暂停计划并把预算翻倍", "complexity": "multi_step",
            "steps": [
              {"id": 1, "tool": "campaign_pause",
               "params": {"campaign_id": "c_01"}, "rationale": "暂停计划 c_01"},
              {"id": 2, "tool": "campaign_update_budget",
               "params": {"campaign_id": {"$step": 1, "$path": "campaign_id"}, "daily_budget": 1600.0},
               "depends_on": [1], "rationale": "预算翻倍到 1600"}
            ]}"#,
    );

    let store = Arc::new(InMemoryStore::new());
    let orch = build(test_config(), llm.clone(), registry, store);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    // 第 1 轮：生成计划后立即被步骤 1 的不可逆确认拦截，未执行任何步骤
    let outcome = orch
        .handle_message("s1", "u1", "把跑量最差的计划暂停，然后预算翻倍", Some(&tx), CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.awaiting);
    assert_eq!(pause_calls.load(Ordering::SeqCst), 0);
    assert_eq!(budget_calls.load(Ordering::SeqCst), 0);
    let events = collect_events(&mut rx);
    assert!(has_confirmation_for(&events, 1));

    // 第 2 轮：确认步骤 1 -> 执行暂停 -> 步骤 2 因费用再次拦截
    let outcome = orch
        .handle_message("s1", "u1", "确认", Some(&tx), CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.awaiting);
    assert_eq!(pause_calls.load(Ordering::SeqCst), 1);
    assert_eq!(budget_calls.load(Ordering::SeqCst), 0);
    let events = collect_events(&mut rx);
    assert!(has_confirmation_for(&events, 2));
    let cost_question = events.iter().find_map(|e| match e {
        AgentEvent::ConfirmationRequest { question, step_id: 2, .. } => Some(question.clone()),
        _ => None,
    });
    assert!(cost_question.unwrap().contains("160"));

    // 第 3 轮：确认步骤 2 -> 执行 -> 产出最终回复
    llm.push("已暂停计划 c_01 并把日预算调整为 1600 元。");
    let outcome = orch
        .handle_message("s1", "u1", "确认", Some(&tx), CancellationToken::new())
        .await
        .unwrap();
    assert!(!outcome.awaiting);
    assert!(outcome.response.is_some());
    assert_eq!(budget_calls.load(Ordering::SeqCst), 1);
    // 符号引用解析：步骤 2 收到了步骤 1 结果中的 campaign_id
    assert_eq!(budget_params.lock().unwrap()["campaign_id"], "c_01");
}

/// 场景：取消挂起的确认只放弃该步骤与未开始步骤，已完成结果保留并进入回复
#[tokio::test]
async fn test_cancellation_keeps_prior_results() {
    let report = StubTool::new(
        "report_query",
        ToolCategory::Reporting,
        serde_json::json!({"report_id": "r_1", "spend": 1280.5}),
    );
    let delete = StubTool::new(
        "campaign_delete",
        ToolCategory::Campaign,
        serde_json::json!({"ok": true}),
    )
    .destructive();
    let (report_calls, _) = report.handles();
    let (delete_calls, _) = delete.handles();

    let mut registry = ToolRegistry::new();
    registry.register(report).unwrap();
    registry.register(delete).unwrap();

    let llm = Arc::new(MockLlmClient::new());
    llm.push(
        r#"{"kind": "plan", "goal": "查报表后删除没量的计划", "complexity": "multi_step",
            "steps": [
              {"id": 1, "tool": "report_query", "params": {"date_range": "yesterday"}},
              {"id": 2, "tool": "campaign_delete",
               "params": {"campaign_id": "c_02"}, "depends_on": [1], "rationale": "删除计划 c_02"}
            ]}"#,
    );

    let store = Arc::new(InMemoryStore::new());
    let orch = build(test_config(), llm.clone(), registry, store);

    let outcome = orch
        .handle_message("s2", "u1", "看下昨天的报表，顺便把没量的计划删了", None, CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.awaiting);
    assert_eq!(report_calls.load(Ordering::SeqCst), 1);

    llm.push("报表已经拿到；删除操作按你的要求取消了。");
    let outcome = orch
        .handle_message("s2", "u1", "算了", None, CancellationToken::new())
        .await
        .unwrap();
    assert!(!outcome.awaiting);
    assert!(outcome.response.is_some());
    // 删除从未被调用；报表结果保留
    assert_eq!(delete_calls.load(Ordering::SeqCst), 0);
    assert_eq!(report_calls.load(Ordering::SeqCst), 1);
}

/// 场景：计划总预估超过阈值时，任何步骤执行前先做计划级整体确认
#[tokio::test]
async fn test_aggregate_cost_gates_whole_plan() {
    let creative = StubTool::new(
        "creative_generate",
        ToolCategory::Creative,
        serde_json::json!({"creative_id": "cr_1", "urls": ["https://cdn/a.png"]}),
    );
    let (creative_calls, _) = creative.handles();

    let mut registry = ToolRegistry::new();
    registry.register(creative).unwrap();

    let llm = Arc::new(MockLlmClient::new());
    llm.push(
        r#"{"kind": "plan", "goal": "两组风格各生成一批创意", "complexity": "multi_step",
            "steps": [
              {"id": 1, "tool": "creative_generate",
               "params": {"prompt": "新品上市", "style": "简约"}, "estimated_cost": 60},
              {"id": 2, "tool": "creative_generate",
               "params": {"prompt": "新品上市", "style": "国潮"}, "estimated_cost": 60}
            ]}"#,
    );

    let store = Arc::new(InMemoryStore::new());
    let orch = build(test_config(), llm.clone(), registry, store);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let outcome = orch
        .handle_message("s3", "u1", "帮我生成创意，两种风格各来一批", Some(&tx), CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.awaiting);
    // 计划级确认（step_id 0），未执行任何步骤
    let events = collect_events(&mut rx);
    assert!(has_confirmation_for(&events, 0));
    assert_eq!(creative_calls.load(Ordering::SeqCst), 0);

    llm.push("两批创意都已生成。");
    let outcome = orch
        .handle_message("s3", "u1", "好的", Some(&tx), CancellationToken::new())
        .await
        .unwrap();
    assert!(!outcome.awaiting);
    // 两个互不依赖的步骤都已执行
    assert_eq!(creative_calls.load(Ordering::SeqCst), 2);
}

/// 场景：计划不合法（前向依赖）触发一次重规划；再次不合法则放弃并给出解释
#[tokio::test]
async fn test_invalid_plan_replans_once_then_gives_up() {
    let pause = StubTool::new(
        "campaign_pause",
        ToolCategory::Campaign,
        serde_json::json!({"ok": true}),
    )
    .destructive();
    let (pause_calls, _) = pause.handles();

    let mut registry = ToolRegistry::new();
    registry.register(pause).unwrap();

    let llm = Arc::new(MockLlmClient::new());
    // 第一版：前向依赖；第二版：未注册工具
    llm.push(
        r#"{"kind": "plan", "goal": "g", "complexity": "single_step",
            "steps": [{"id": 1, "tool": "campaign_pause", "params": {"campaign_id": "c"}, "depends_on": [2]},
                      {"id": 2, "tool": "campaign_pause", "params": {"campaign_id": "c"}}]}"#,
    );
    llm.push(
        r#"{"kind": "plan", "goal": "g", "complexity": "single_step",
            "steps": [{"id": 1, "tool": "made_up_tool", "params": {}}]}"#,
    );

    let store = Arc::new(InMemoryStore::new());
    let orch = build(test_config(), llm.clone(), registry, store);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let outcome = orch
        .handle_message("s4", "u1", "暂停那几条在跑的计划", Some(&tx), CancellationToken::new())
        .await
        .unwrap();
    assert!(!outcome.awaiting);
    assert!(outcome.response.unwrap().contains("抱歉"));
    assert_eq!(pause_calls.load(Ordering::SeqCst), 0);
    let events = collect_events(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::Error { code, .. } if code == "validation")));
}

/// 场景：历史达到压缩阈值后，「刚才的创意」仍解析到正确的实体 ID
#[tokio::test]
async fn test_reference_resolution_survives_compression() {
    let creative = StubTool::new(
        "creative_generate",
        ToolCategory::Creative,
        serde_json::json!({"creative_id": "cr_7", "name": "国潮主图"}),
    );

    let mut registry = ToolRegistry::new();
    registry.register(creative).unwrap();

    let llm = Arc::new(MockLlmClient::new());
    let store = Arc::new(InMemoryStore::new());
    let mut cfg = test_config();
    cfg.orchestrator.compress_after_rounds = 2;
    cfg.orchestrator.compress_keep_recent = 1;
    let orch = build(cfg, llm.clone(), registry, store.clone());

    // 第 1 轮：生成创意，观察结果（含 creative_id）写入历史
    llm.push(
        r#"{"kind": "plan", "goal": "生成创意", "complexity": "single_step",
            "steps": [{"id": 1, "tool": "creative_generate",
                       "params": {"prompt": "新品上市", "style": "国潮"}}]}"#,
    );
    llm.push("创意已生成。");
    orch.handle_message("s5", "u1", "帮我生成创意，国潮风", None, CancellationToken::new())
        .await
        .unwrap();

    // 第 2 轮：闲聊
    llm.push("smalltalk 0.9");
    llm.push(r#"{"kind": "reply", "content": "不客气！"}"#);
    orch.handle_message("s5", "u1", "谢谢", None, CancellationToken::new())
        .await
        .unwrap();

    // 第 3 轮：超过压缩阈值，指代「刚才的创意」
    llm.push("creative 0.9"); // 意图分类
    llm.push("此前对话已压缩：生成过创意 creative=cr_7（国潮主图）。"); // 压缩摘要
    llm.push(r#"{"kind": "reply", "content": "好的，马上为这个创意安排新版本。"}"#);
    let outcome = orch
        .handle_message("s5", "u1", "把刚才的创意再出一版", None, CancellationToken::new())
        .await
        .unwrap();
    assert!(!outcome.awaiting);

    // 指代消解后的消息带着具体 creative_id 落库
    let messages = store.load_messages("s5", 100).await.unwrap();
    let annotated = messages
        .iter()
        .find(|m| m.content.contains("把刚才的创意再出一版"))
        .expect("annotated user message persisted");
    assert!(annotated.content.contains("creative=cr_7"), "{}", annotated.content);
}

/// 场景：挂起确认期间进程重启（新建编排器实例），仅凭持久化快照即可恢复
#[tokio::test]
async fn test_awaiting_confirmation_survives_restart() {
    fn registry_with(pause: StubTool) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(pause).unwrap();
        registry
    }

    let store = Arc::new(InMemoryStore::new());

    let pause = StubTool::new(
        "campaign_pause",
        ToolCategory::Campaign,
        serde_json::json!({"ok": true}),
    )
    .destructive();
    let (calls_1, _) = pause.handles();
    let llm = Arc::new(MockLlmClient::new());
    llm.push(
        r#"{"kind": "plan", "goal": "暂停计划", "complexity": "single_step",
            "steps": [{"id": 1, "tool": "campaign_pause",
                       "params": {"campaign_id": "c_9"}, "rationale": "暂停计划 c_9"}]}"#,
    );
    let orch = build(test_config(), llm, registry_with(pause), store.clone());
    let outcome = orch
        .handle_message("s6", "u1", "暂停计划 c_9", None, CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.awaiting);
    assert_eq!(calls_1.load(Ordering::SeqCst), 0);
    drop(orch);

    // 重启：全新组件实例，共享同一存储
    let pause = StubTool::new(
        "campaign_pause",
        ToolCategory::Campaign,
        serde_json::json!({"ok": true}),
    )
    .destructive();
    let (calls_2, _) = pause.handles();
    let llm = Arc::new(MockLlmClient::new());
    llm.push("已暂停计划 c_9。");
    let orch = build(test_config(), llm, registry_with(pause), store.clone());
    let outcome = orch
        .handle_message("s6", "u1", "确认", None, CancellationToken::new())
        .await
        .unwrap();
    assert!(!outcome.awaiting);
    assert_eq!(calls_2.load(Ordering::SeqCst), 1);
    // 快照已清除，后续消息按新请求处理
    assert!(store.load_snapshot("s6").await.unwrap().is_none());
}
