//! Sliding-window request admission.
//!
//! Requests are keyed per tenant when one is known, per client address
//! otherwise. With Redis available the window lives in a sorted set shared by
//! every instance; without it each process keeps its own timestamp log.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RateLimitConfig;
use crate::error::{GatewayError, Result};

const REDIS_PREFIX: &str = "ratelimit";

/// `tenant:<id>`, else `ip:<addr>`, else `anonymous`
pub fn derive_key(tenant_id: Option<&str>, client_ip: Option<&str>) -> String {
    match (present(tenant_id), present(client_ip)) {
        (Some(tenant), _) => format!("tenant:{}", tenant),
        (None, Some(ip)) => format!("ip:{}", ip),
        (None, None) => "anonymous".to_string(),
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the current window after this one
    pub remaining: u32,
    /// Wait before the next request can be admitted; 0 when allowed
    pub retry_after_ms: u64,
}

impl RateDecision {
    fn allow(remaining: u32) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after_ms: 0,
        }
    }

    fn deny(retry_after_ms: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after_ms,
        }
    }

    /// `RateLimited` for a denied decision
    pub fn ensure_allowed(&self, key: &str) -> Result<()> {
        if self.allowed {
            Ok(())
        } else {
            Err(GatewayError::RateLimited {
                key: key.to_string(),
                retry_after_ms: self.retry_after_ms,
            })
        }
    }
}

pub struct RateLimiter {
    enabled: bool,
    window: Duration,
    max_requests: u32,
    local: DashMap<String, VecDeque<Instant>>,
    last_sweep: Mutex<Instant>,
    redis: Option<ConnectionManager>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, redis: Option<ConnectionManager>) -> Self {
        Self {
            enabled: config.enabled,
            window: Duration::from_secs(config.window_secs.max(1)),
            max_requests: config.max_requests,
            local: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
            redis: redis.filter(|_| config.use_redis),
        }
    }

    /// Admit or reject one request for `key`; admitted requests consume a slot
    pub async fn check(&self, key: &str) -> RateDecision {
        if !self.enabled {
            return RateDecision::allow(self.max_requests);
        }

        if let Some(connection) = &self.redis {
            match self.check_redis(connection.clone(), key).await {
                Ok(decision) => return decision,
                Err(e) => warn!("Redis rate limiting failed for {}, using local window: {}", key, e),
            }
        }

        self.check_local(key)
    }

    fn check_local(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        self.sweep_idle(now);

        let mut log = self.local.entry(key.to_string()).or_default();
        while log
            .front()
            .is_some_and(|at| now.duration_since(*at) >= self.window)
        {
            log.pop_front();
        }

        if (log.len() as u32) < self.max_requests {
            log.push_back(now);
            return RateDecision::allow(self.max_requests - log.len() as u32);
        }

        if log.is_empty() {
            // Only reachable with a zero limit; keep no state for the key
            drop(log);
            self.local.remove(key);
            debug!("Rate limit reached for {}", key);
            return RateDecision::deny(self.window.as_millis() as u64);
        }

        let retry_after = log
            .front()
            .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(self.window);
        debug!("Rate limit reached for {}", key);
        RateDecision::deny(retry_after.as_millis() as u64)
    }

    /// Drop keys whose newest request has left the window, at most once per window
    fn sweep_idle(&self, now: Instant) {
        {
            let mut last_sweep = self.last_sweep.lock();
            if now.duration_since(*last_sweep) < self.window {
                return;
            }
            *last_sweep = now;
        }

        let before = self.local.len();
        self.local
            .retain(|_, log| log.back().is_some_and(|at| now.duration_since(*at) < self.window));
        let dropped = before.saturating_sub(self.local.len());
        if dropped > 0 {
            debug!("Dropped {} idle rate limit keys", dropped);
        }
    }

    async fn check_redis(&self, mut connection: ConnectionManager, key: &str) -> Result<RateDecision> {
        let redis_key = format!("{}:{}", REDIS_PREFIX, key);
        let window_ms = self.window.as_millis() as i64;
        let now_ms = Utc::now().timestamp_millis();
        let member = format!("{}-{}", now_ms, Uuid::new_v4());

        let (count, oldest): (u64, Vec<String>) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE").arg(&redis_key).arg(0).arg(now_ms - window_ms).ignore()
            .cmd("ZADD").arg(&redis_key).arg(now_ms).arg(&member).ignore()
            .cmd("ZCARD").arg(&redis_key)
            .cmd("PEXPIRE").arg(&redis_key).arg(window_ms).ignore()
            .cmd("ZRANGE").arg(&redis_key).arg(0).arg(0).arg("WITHSCORES")
            .query_async(&mut connection)
            .await?;

        if count <= self.max_requests as u64 {
            return Ok(RateDecision::allow(self.max_requests - count as u32));
        }

        // Over the limit: give the slot back
        redis::cmd("ZREM")
            .arg(&redis_key)
            .arg(&member)
            .query_async::<_, ()>(&mut connection)
            .await?;

        let oldest_ms = oldest
            .get(1)
            .and_then(|score| score.parse::<f64>().ok())
            .map(|score| score as i64)
            .unwrap_or(now_ms);
        let retry_after_ms = (oldest_ms + window_ms - now_ms).max(0) as u64;
        Ok(RateDecision::deny(retry_after_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32) -> RateLimiter {
        RateLimiter::new(
            &RateLimitConfig {
                enabled: true,
                window_secs: 60,
                max_requests,
                use_redis: true,
            },
            None,
        )
    }

    #[test]
    fn keys_prefer_tenant_then_ip() {
        assert_eq!(derive_key(Some("t1"), Some("10.0.0.1")), "tenant:t1");
        assert_eq!(derive_key(None, Some("10.0.0.1")), "ip:10.0.0.1");
        assert_eq!(derive_key(Some(" "), Some("10.0.0.1")), "ip:10.0.0.1");
        assert_eq!(derive_key(None, None), "anonymous");
    }

    #[tokio::test]
    async fn admits_up_to_limit_then_rejects() {
        let limiter = limiter(2);
        let first = limiter.check("tenant:t1").await;
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        assert!(limiter.check("tenant:t1").await.allowed);

        let third = limiter.check("tenant:t1").await;
        assert!(!third.allowed);
        assert!(third.retry_after_ms > 0 && third.retry_after_ms <= 60_000);

        let err = third.ensure_allowed("tenant:t1").unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn keys_are_limited_independently() {
        let limiter = limiter(1);
        assert!(limiter.check("tenant:a").await.allowed);
        assert!(limiter.check("tenant:b").await.allowed);
        assert!(!limiter.check("tenant:a").await.allowed);
    }

    #[tokio::test]
    async fn idle_keys_are_dropped_once_their_window_passes() {
        let limiter = RateLimiter::new(
            &RateLimitConfig {
                enabled: true,
                window_secs: 1,
                max_requests: 5,
                use_redis: false,
            },
            None,
        );
        for i in 0..1000 {
            assert!(limiter.check(&format!("ip:10.0.{}.{}", i / 256, i % 256)).await.allowed);
        }
        assert_eq!(limiter.local.len(), 1000);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(limiter.check("ip:192.168.0.1").await.allowed);
        assert_eq!(limiter.local.len(), 1);
    }

    #[tokio::test]
    async fn zero_limit_keeps_no_state() {
        let limiter = limiter(0);
        let decision = limiter.check("tenant:t1").await;
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after_ms, 60_000);
        assert!(limiter.local.is_empty());
    }

    #[tokio::test]
    async fn disabled_limiter_admits_everything() {
        let limiter = RateLimiter::new(
            &RateLimitConfig {
                enabled: false,
                max_requests: 1,
                ..RateLimitConfig::default()
            },
            None,
        );
        for _ in 0..5 {
            assert!(limiter.check("anonymous").await.allowed);
        }
    }
}
