//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ADPILOT__*` 覆盖（双下划线表示嵌套，
//! 如 `ADPILOT__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub credit: CreditSection,
    #[serde(default)]
    pub memory: MemorySection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 进入上下文的历史条数上限
    #[serde(default = "default_history_load_limit")]
    pub history_load_limit: usize,
}

fn default_history_load_limit() -> usize {
    40
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    /// openai 兼容端点；优先级由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

/// [orchestrator] 段：重试、退避、确认阈值、压缩与并发
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// 工具调用重试上限（含首次）
    pub retry_max_attempts: u32,
    /// 退避基础延迟（毫秒）
    pub backoff_base_ms: u64,
    /// 退避封顶延迟（毫秒）
    pub backoff_max_ms: u64,
    /// 单步点数超过该值需确认
    pub per_step_cost_threshold: u32,
    /// 计划总点数超过该值需整体确认
    pub plan_cost_threshold: u32,
    /// 对话轮数超过该值触发压缩
    pub compress_after_rounds: usize,
    /// 压缩后原样保留的最近轮数
    pub compress_keep_recent: usize,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 单轮规划次数上限（探索式追加规划含在内）
    pub max_rounds: u32,
    /// 工具并发上限
    pub max_concurrent_tools: usize,
    /// 意图置信度低于该值时改为澄清提问
    pub intent_confidence_threshold: f32,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            retry_max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8000,
            per_step_cost_threshold: 50,
            plan_cost_threshold: 100,
            compress_after_rounds: 12,
            compress_keep_recent: 4,
            tool_timeout_secs: 30,
            max_rounds: 4,
            max_concurrent_tools: 3,
            intent_confidence_threshold: 0.6,
        }
    }
}

/// [tools] 段：能力后端地址与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub backend_url: String,
    pub timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8700/api".to_string(),
            timeout_secs: 20,
        }
    }
}

/// [credit] 段：计费服务
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CreditSection {
    /// http / memory（memory 供本地与测试）
    pub backend: String,
    pub base_url: String,
    pub timeout_secs: u64,
    /// memory 后端的初始余额
    pub initial_balance: u32,
}

impl Default for CreditSection {
    fn default() -> Self {
        Self {
            backend: "http".to_string(),
            base_url: "http://127.0.0.1:8701".to_string(),
            timeout_secs: 10,
            initial_balance: 1000,
        }
    }
}

/// [memory] 段：会话存储
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// sqlite / memory
    pub backend: String,
    pub db_path: PathBuf,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            db_path: PathBuf::from("data/sessions.db"),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmSection::default(),
            orchestrator: OrchestratorSection::default(),
            tools: ToolsSection::default(),
            credit: CreditSection::default(),
            memory: MemorySection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 ADPILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ADPILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ADPILOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
