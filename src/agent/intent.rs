//! 意图识别与工具收窄
//!
//! 先用廉价规则匹配（不调 LLM）识别常见投放话术，未命中再走 LLM 分类；
//! 识别结果映射到能力类目，规划只暴露相关子集的工具（两阶段收窄）。
//! 置信度低于阈值时上层改为向用户澄清，而非强行规划。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::llm::LlmClient;
use crate::memory::Message;
use crate::tools::ToolCategory;

/// 识别出的意图类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// 闲聊 / 产品咨询，直接回答
    Smalltalk,
    /// 创意生成
    Creative,
    /// 报表查询
    Reporting,
    /// 行情 / 竞品洞察
    Market,
    /// 落地页
    LandingPage,
    /// 计划操作（暂停 / 预算 / 删除等）
    CampaignOps,
    /// 无法判断
    Unclear,
}

/// 意图 + 置信度
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Classified {
    pub intent: Intent,
    pub confidence: f32,
}

impl Classified {
    pub fn certain(intent: Intent) -> Self {
        Self {
            intent,
            confidence: 1.0,
        }
    }
}

/// 意图对应的能力类目；Unclear 不收窄（全量），Smalltalk 无需工具
pub fn categories_for(intent: Intent) -> Vec<ToolCategory> {
    match intent {
        Intent::Creative => vec![ToolCategory::Creative, ToolCategory::Market],
        Intent::Reporting => vec![ToolCategory::Reporting, ToolCategory::Campaign],
        Intent::Market => vec![ToolCategory::Market],
        Intent::LandingPage => vec![ToolCategory::LandingPage, ToolCategory::Creative],
        Intent::CampaignOps => vec![ToolCategory::Campaign, ToolCategory::Reporting],
        Intent::Smalltalk => vec![],
        Intent::Unclear => vec![
            ToolCategory::Creative,
            ToolCategory::Reporting,
            ToolCategory::Market,
            ToolCategory::LandingPage,
            ToolCategory::Campaign,
        ],
    }
}

/// 意图识别器
pub struct IntentRecognizer {
    llm: Arc<dyn LlmClient>,
    /// 启用快速规则匹配（不调用 LLM）
    enable_fast_match: bool,
}

impl IntentRecognizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            enable_fast_match: true,
        }
    }

    /// 识别用户意图；LLM 失败时回退 Unclear（低置信度，上层澄清）
    pub async fn recognize(&self, user_input: &str) -> Classified {
        if self.enable_fast_match {
            if let Some(intent) = self.fast_match(user_input) {
                return Classified::certain(intent);
            }
        }

        self.llm_recognize(user_input).await.unwrap_or(Classified {
            intent: Intent::Unclear,
            confidence: 0.3,
        })
    }

    /// 快速规则匹配：常见投放话术
    fn fast_match(&self, input: &str) -> Option<Intent> {
        let lower = input.to_lowercase();

        let creative = ["生成创意", "做几张图", "出图", "素材图", "创意图", "生成图片"];
        if creative.iter().any(|k| lower.contains(k)) {
            return Some(Intent::Creative);
        }

        let reporting = ["报表", "消耗", "曝光", "点击率", "转化", "roi", "数据怎么样"];
        if reporting.iter().any(|k| lower.contains(k)) {
            return Some(Intent::Reporting);
        }

        let market = ["行情", "竞品", "大盘", "行业热度", "市场洞察"];
        if market.iter().any(|k| lower.contains(k)) {
            return Some(Intent::Market);
        }

        let landing = ["落地页", "landing"];
        if landing.iter().any(|k| lower.contains(k)) {
            return Some(Intent::LandingPage);
        }

        let campaign = ["暂停", "停掉", "删除计划", "调预算", "加预算", "降预算", "预算改", "启动计划"];
        if campaign.iter().any(|k| lower.contains(k)) {
            return Some(Intent::CampaignOps);
        }

        None
    }

    /// LLM 分类：输出 "label confidence"，如 "campaign_ops 0.85"
    async fn llm_recognize(&self, user_input: &str) -> Result<Classified, String> {
        let system_prompt = "你是广告投放助手的意图分类器。\
            将用户输入归为以下之一并给出 0~1 置信度，只输出「标签 置信度」一行：\
            smalltalk / creative / reporting / market / landing_page / campaign_ops / unclear";

        let messages = vec![
            Message::system(system_prompt),
            Message::user(format!("用户输入：{user_input}")),
        ];

        let response = self.llm.complete(&messages).await?;
        let mut parts = response.split_whitespace();
        let label = parts.next().unwrap_or("unclear").trim().to_lowercase();
        let confidence: f32 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);

        let intent = match label.as_str() {
            "smalltalk" => Intent::Smalltalk,
            "creative" => Intent::Creative,
            "reporting" => Intent::Reporting,
            "market" => Intent::Market,
            "landing_page" => Intent::LandingPage,
            "campaign_ops" => Intent::CampaignOps,
            _ => Intent::Unclear,
        };

        Ok(Classified { intent, confidence })
    }
}
