//! 令牌桶限流
//!
//! 进程内所有会话共享一个桶，构造 OracleGateway 时显式传入。

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitSection;

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// 令牌桶：容量 capacity，每秒补充 refill_per_sec 个
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_sec: if refill_per_sec.is_finite() && refill_per_sec > 0.0 {
                refill_per_sec
            } else {
                1.0
            },
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(section: &RateLimitSection) -> Self {
        Self::new(section.capacity, section.refill_per_sec)
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// 取一个令牌；桶空时等待到下一个令牌可用
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };
            tracing::debug!("Rate limit reached, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// 不等待；取到返回 true
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// 当前可用令牌数（向下取整）
    pub async fn available(&self) -> u32 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens.floor() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bucket_drains_to_empty() {
        let bucket = TokenBucket::new(2, 0.001);
        assert!(bucket.try_acquire().await);
        assert!(bucket.try_acquire().await);
        assert!(!bucket.try_acquire().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let bucket = TokenBucket::new(1, 2.0);
        bucket.acquire().await;
        assert_eq!(bucket.available().await, 0);

        let start = Instant::now();
        bucket.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(450));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped() {
        let bucket = TokenBucket::new(3, 10.0);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(bucket.available().await, 3);
    }
}
