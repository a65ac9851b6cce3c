//! 上下文管理：指代消解与历史压缩
//!
//! 指代消解：把「那个 / 上一个 / 它 / 再加 XX」这类表达绑定到最近一次匹配的实体
//! 提及（同类优先，最近者胜），改写为携带具体 ID 的表达。
//! 压缩：对话超过轮数阈值后，较旧的轮次被一条摘要替换，最近几轮原样保留；
//! 摘要有损，但仍在进行的计划所引用的实体 ID 必须原样写入摘要。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::agent::planner::Planner;
use crate::memory::{round_count, Message, Role};
use crate::plan::StepResult;

/// 会话中出现过的实体提及
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRef {
    /// campaign / creative / landing_page / report
    pub kind: String,
    pub id: String,
    /// 展示名（计划名、商品名等），可为空
    pub label: String,
    /// 出现的轮次，用于最近者胜
    pub turn: u32,
}

fn demonstrative_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(那个|那条|这个|这条|上一个|上一条|刚才(?:的|那个)?|之前(?:的|那个)?|它|再加|多加|the previous one|that one)",
        )
        .expect("demonstrative regex")
    })
}

/// 输入中的类别暗示词 -> 实体 kind
fn kind_hint(input: &str) -> Option<&'static str> {
    let lower = input.to_lowercase();
    if lower.contains("计划") || lower.contains("campaign") || lower.contains("预算") {
        Some("campaign")
    } else if lower.contains("创意") || lower.contains("素材") || lower.contains("图") {
        Some("creative")
    } else if lower.contains("落地页") || lower.contains("页面") {
        Some("landing_page")
    } else if lower.contains("报表") || lower.contains("报告") {
        Some("report")
    } else {
        None
    }
}

/// 上下文管理器
pub struct ContextManager {
    /// 对话轮数超过该值时触发压缩
    pub compress_after_rounds: usize,
    /// 压缩后保留的最近轮数（原样）
    pub keep_recent_rounds: usize,
}

impl ContextManager {
    pub fn new(compress_after_rounds: usize, keep_recent_rounds: usize) -> Self {
        Self {
            compress_after_rounds,
            keep_recent_rounds: keep_recent_rounds.max(1),
        }
    }

    /// 指代消解：命中指代词时，绑定到最近的匹配实体并在原文后标注具体 ID。
    /// 同类暗示（如「那个计划」）优先绑定同 kind 实体；无暗示时取最近任意实体。
    pub fn resolve_references(&self, input: &str, entities: &[EntityRef]) -> String {
        if entities.is_empty() || !demonstrative_pattern().is_match(input) {
            return input.to_string();
        }

        let hint = kind_hint(input);
        let target = entities
            .iter()
            .filter(|e| hint.map_or(true, |k| e.kind == k))
            .max_by_key(|e| e.turn)
            .or_else(|| entities.iter().max_by_key(|e| e.turn));

        match target {
            Some(entity) => {
                let label = if entity.label.is_empty() {
                    entity.kind.clone()
                } else {
                    entity.label.clone()
                };
                format!("{input}（指 {label}，{}={}）", entity.kind, entity.id)
            }
            None => input.to_string(),
        }
    }

    /// 从步骤结果载荷中提取实体（*_id 字段 + 同级 name/title 作为展示名）
    pub fn harvest_entities(&self, results: &[StepResult], turn: u32) -> Vec<EntityRef> {
        let mut found = Vec::new();
        for result in results.iter().filter(|r| r.success) {
            collect_entities(&result.payload, turn, &mut found);
        }
        found
    }

    /// 从持久化历史中恢复实体提及：观察行里的 JSON 载荷（"xxx_id": "..."）
    /// 与摘要/标注里的 kind=id 形式。新一轮状态构建时调用，使跨轮指代可解析。
    pub fn entities_from_history(&self, messages: &[Message]) -> Vec<EntityRef> {
        static JSON_ID: OnceLock<Regex> = OnceLock::new();
        static ANNOTATED: OnceLock<Regex> = OnceLock::new();
        let json_id = JSON_ID.get_or_init(|| {
            Regex::new(r#""([a-z_]+)_id"\s*:\s*"([^"]+)""#).expect("json id regex")
        });
        let annotated = ANNOTATED.get_or_init(|| {
            Regex::new(r"(campaign|creative|landing_page|page|report)=([A-Za-z0-9_\-]+)")
                .expect("annotated id regex")
        });

        let mut found = Vec::new();
        let mut turn = 0u32;
        for msg in messages {
            if msg.role == Role::User {
                turn += 1;
            }
            for cap in json_id.captures_iter(&msg.content) {
                found.push(EntityRef {
                    kind: cap[1].to_string(),
                    id: cap[2].to_string(),
                    label: String::new(),
                    turn,
                });
            }
            for cap in annotated.captures_iter(&msg.content) {
                found.push(EntityRef {
                    kind: cap[1].to_string(),
                    id: cap[2].to_string(),
                    label: String::new(),
                    turn,
                });
            }
        }
        found
    }

    /// 是否达到压缩阈值
    pub fn should_compress(&self, messages: &[Message]) -> bool {
        round_count(messages) > self.compress_after_rounds
    }

    /// 压缩历史：较旧轮次摘要为一条 system 消息（保留实体 ID），最近几轮原样保留。
    /// 摘要模型调用失败时退化为机械摘要（实体清单），压缩不使本轮失败。
    pub async fn compress(
        &self,
        planner: &Planner,
        messages: &[Message],
        entities: &[EntityRef],
    ) -> Vec<Message> {
        let split = self.split_index(messages);
        if split == 0 {
            return messages.to_vec();
        }
        let (older, recent) = messages.split_at(split);

        let summary = match planner.summarize(older, entities).await {
            Ok(s) if !s.trim().is_empty() => s,
            _ => mechanical_summary(older, entities),
        };

        let mut out = vec![Message::system(format!("此前对话摘要：\n{summary}"))];
        out.extend_from_slice(recent);
        out
    }

    /// 找到「最近 keep_recent_rounds 轮」的起始下标
    fn split_index(&self, messages: &[Message]) -> usize {
        let mut rounds = 0;
        for (idx, msg) in messages.iter().enumerate().rev() {
            if msg.role == Role::User {
                rounds += 1;
                if rounds == self.keep_recent_rounds {
                    return idx;
                }
            }
        }
        0
    }
}

fn collect_entities(value: &serde_json::Value, turn: u32, out: &mut Vec<EntityRef>) {
    match value {
        serde_json::Value::Object(map) => {
            let label = map
                .get("name")
                .or_else(|| map.get("title"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            for (key, v) in map {
                if let (Some(kind), Some(id)) = (key.strip_suffix("_id"), v.as_str()) {
                    out.push(EntityRef {
                        kind: kind.to_string(),
                        id: id.to_string(),
                        label: label.clone(),
                        turn,
                    });
                }
            }
            for v in map.values() {
                collect_entities(v, turn, out);
            }
        }
        serde_json::Value::Array(arr) => {
            for v in arr {
                collect_entities(v, turn, out);
            }
        }
        _ => {}
    }
}

/// 机械摘要：不丢实体 ID 的兜底
fn mechanical_summary(older: &[Message], entities: &[EntityRef]) -> String {
    let rounds = round_count(older);
    let mut s = format!("已压缩 {rounds} 轮较早对话。");
    if !entities.is_empty() {
        s.push_str("涉及实体：");
        let items: Vec<String> = entities
            .iter()
            .map(|e| {
                if e.label.is_empty() {
                    format!("{}={}", e.kind, e.id)
                } else {
                    format!("{}（{}={}）", e.label, e.kind, e.id)
                }
            })
            .collect();
        s.push_str(&items.join("、"));
    }
    s
}
