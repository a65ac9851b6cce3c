//! 工具注册表
//!
//! 所有能力端点实现 Tool trait（名称 / 描述 / 类目 / 风险级别 / 参数 Schema / 计费方式 /
//! 点数预估 / 异步调用），由 ToolRegistry 按名注册与查找。注册表在进程启动时构建完成后
//! 不再变更；按类目过滤得到的子集是纯函数产物，供规划前的两阶段收窄使用。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 能力类目（与意图路由对应）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// 创意生成
    Creative,
    /// 投放报表
    Reporting,
    /// 行情洞察
    Market,
    /// 落地页
    LandingPage,
    /// 计划管理
    Campaign,
}

/// 风险级别；Destructive 的操作执行前必须人工确认
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Destructive,
}

/// 计费方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Billing {
    /// 成功后按实际消耗扣费
    PerCall,
    /// 调用前按预估扣费，失败时退回未消耗部分（多次子调用的工具）
    Upfront,
}

/// 工具调用错误；retryable 表示可安全重试（幂等或带 operation_id 去重），
/// consumed 记录失败前已实际消耗的点数（Upfront 计费退款用）
#[derive(Debug, Clone)]
pub struct ToolError {
    pub message: String,
    pub retryable: bool,
    pub consumed: u32,
}

impl ToolError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            consumed: 0,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            consumed: 0,
        }
    }

    pub fn with_consumed(mut self, consumed: u32) -> Self {
        self.consumed = consumed;
        self
    }
}

/// 工具 trait：编排核心眼中的不透明可调用端点
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（计划 step 中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    fn category(&self) -> ToolCategory;

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Low
    }

    fn billing(&self) -> Billing {
        Billing::PerCall
    }

    /// 参数 JSON Schema（required 数组与属性 enum 同时驱动 Evaluator 的缺参/预设判断）
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 按参数预估点数消耗；0 表示免费操作
    fn estimate_cost(&self, _params: &Value) -> u32 {
        0
    }

    /// 执行调用；params 已完成符号引用解析，operation_id 供重试去重
    async fn invoke(&self, params: Value, operation_id: &str) -> Result<Value, ToolError>;
}

/// 工具注册表：按名称存储 Arc<dyn Tool>
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；重名是装载期错误而非运行时意外
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), String> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(format!("duplicate tool name: {name}"));
        }
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> std::collections::HashSet<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 按类目过滤出子集（两阶段收窄：规划只看到与意图相关的工具）
    pub fn subset(&self, categories: &[ToolCategory]) -> ToolRegistry {
        let tools = self
            .tools
            .iter()
            .filter(|(_, t)| categories.contains(&t.category()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        ToolRegistry { tools }
    }

    /// 生成注入规划 prompt 的工具说明 JSON（名称、描述、类目、风险、参数 Schema）
    pub fn definitions_json(&self) -> String {
        let mut defs: Vec<Value> = self
            .tools
            .values()
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "category": tool.category(),
                    "risk_level": tool.risk_level(),
                    "parameters": tool.parameters_schema(),
                })
            })
            .collect();
        defs.sort_by(|a, b| {
            a["name"]
                .as_str()
                .unwrap_or_default()
                .cmp(b["name"].as_str().unwrap_or_default())
        });
        serde_json::to_string_pretty(&defs).unwrap_or_else(|_| "[]".to_string())
    }
}

/// 从参数 Schema 中读出 required 字段名
pub fn required_params(schema: &Value) -> Vec<String> {
    schema["required"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

/// 从参数 Schema 中读出某属性的 enum 预设值（Evaluator 据此决定 Select 还是 Input）
pub fn param_presets(schema: &Value, param: &str) -> Vec<String> {
    schema["properties"][param]["enum"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyTool {
        name: &'static str,
        category: ToolCategory,
    }

    #[async_trait]
    impl Tool for DummyTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "dummy"
        }
        fn category(&self) -> ToolCategory {
            self.category
        }
        async fn invoke(&self, _params: Value, _operation_id: &str) -> Result<Value, ToolError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut reg = ToolRegistry::new();
        reg.register(DummyTool {
            name: "a",
            category: ToolCategory::Reporting,
        })
        .unwrap();
        assert!(reg
            .register(DummyTool {
                name: "a",
                category: ToolCategory::Reporting,
            })
            .is_err());
    }

    #[test]
    fn test_subset_filters_by_category() {
        let mut reg = ToolRegistry::new();
        reg.register(DummyTool {
            name: "report_query",
            category: ToolCategory::Reporting,
        })
        .unwrap();
        reg.register(DummyTool {
            name: "campaign_pause",
            category: ToolCategory::Campaign,
        })
        .unwrap();

        let sub = reg.subset(&[ToolCategory::Campaign]);
        assert_eq!(sub.len(), 1);
        assert!(sub.contains("campaign_pause"));
        // 原注册表不受影响
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_schema_helpers() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "style": { "type": "string", "enum": ["简约", "国潮", "科技感"] },
                "prompt": { "type": "string" }
            },
            "required": ["prompt", "style"]
        });
        assert_eq!(required_params(&schema), vec!["prompt", "style"]);
        assert_eq!(param_presets(&schema, "style").len(), 3);
        assert!(param_presets(&schema, "prompt").is_empty());
    }
}
