//! 重试退避策略
//!
//! 指数退避：基础延迟逐次翻倍，叠加小幅随机抖动，封顶于最大延迟；
//! 重试次数由上限约束（默认 3 次）。仅 Executor 对工具调用使用，规划调用失败不重试。

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 总尝试次数上限（含首次）
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// 第 attempt 次失败后的等待时长（attempt 从 1 起）：base * 2^(attempt-1) + 抖动
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);
        backoff + self.jitter()
    }

    /// 抖动上限取 base 的四分之一，保证翻倍序列仍然严格递增
    fn jitter(&self) -> Duration {
        let cap = (self.base_delay.as_millis() as u64 / 4).max(1);
        Duration::from_millis(rand::rng().random_range(0..cap))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_secs(8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_strictly_increase_below_cap() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(8));
        let d1 = policy.delay_for(1);
        let d2 = policy.delay_for(2);
        let d3 = policy.delay_for(3);
        // 抖动上限 25ms，小于每次翻倍的增量
        assert!(d2 > d1);
        assert!(d3 > d2);
    }

    #[test]
    fn test_delay_capped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(500), Duration::from_secs(2));
        let d = policy.delay_for(10);
        assert!(d <= Duration::from_secs(2) + Duration::from_millis(125));
    }
}
