//! Fixed-window request limiting per client key
//!
//! Counts live either in process memory or in a shared Upstash Redis database. Without
//! either, every request is allowed: fine for a single dev instance, no protection at all
//! once several instances serve traffic.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::Config;

/// Outcome of one rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
}

#[derive(thiserror::Error, Debug)]
pub enum RateLimitStoreError {
    #[error("Counter store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Counter store returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Counter store returned an unexpected reply: {0}")]
    Malformed(String),
}

/// Storage for per-key request counters
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Record one request for `key` and return the count for the current window.
    ///
    /// A value above `limit` means the request is denied.
    async fn hit(&self, key: &str, limit: u32, window: Duration)
        -> Result<u32, RateLimitStoreError>;
}

struct RateLimitEntry {
    count: u32,
    reset_at: Instant,
}

/// Counters in a process-wide map; stale windows are overwritten lazily
#[derive(Default)]
pub struct InMemoryCounterStore {
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// [`CounterStore::hit`] at an explicit instant
    pub fn hit_at(&self, key: &str, limit: u32, window: Duration, now: Instant) -> u32 {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());

        match entries.get_mut(key) {
            Some(entry) if now < entry.reset_at => {
                if entry.count >= limit {
                    return limit + 1;
                }
                entry.count += 1;
                entry.count
            }
            _ => {
                entries.insert(
                    key.to_string(),
                    RateLimitEntry {
                        count: 1,
                        reset_at: now + window,
                    },
                );
                1
            }
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn hit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<u32, RateLimitStoreError> {
        Ok(self.hit_at(key, limit, window, Instant::now()))
    }
}

#[derive(Debug, Deserialize)]
struct UpstashReply {
    result: Option<serde_json::Value>,
    error: Option<String>,
}

/// Shared counters in Upstash Redis over its REST API
pub struct UpstashCounterStore {
    client: Client,
    url: String,
    token: String,
}

impl UpstashCounterStore {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl CounterStore for UpstashCounterStore {
    async fn hit(
        &self,
        key: &str,
        _limit: u32,
        window: Duration,
    ) -> Result<u32, RateLimitStoreError> {
        // INCR and EXPIRE in one transaction; NX keeps the window fixed
        let commands = serde_json::json!([
            ["INCR", key],
            ["EXPIRE", key, window.as_secs().to_string(), "NX"],
        ]);

        let resp = self
            .client
            .post(format!("{}/multi-exec", self.url))
            .bearer_auth(&self.token)
            .json(&commands)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().await.unwrap_or_default();
            return Err(RateLimitStoreError::Status { status, message });
        }

        let replies: Vec<UpstashReply> = resp.json().await?;
        let first = replies
            .into_iter()
            .next()
            .ok_or_else(|| RateLimitStoreError::Malformed("empty transaction reply".into()))?;

        if let Some(error) = first.error {
            return Err(RateLimitStoreError::Malformed(error));
        }

        first
            .result
            .and_then(|v| v.as_u64())
            .map(|count| count.min(u32::MAX as u64) as u32)
            .ok_or_else(|| RateLimitStoreError::Malformed("INCR did not return a number".into()))
    }
}

/// Gate in front of the pipeline
pub struct RateLimiter {
    store: Option<Arc<dyn CounterStore>>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Option<Arc<dyn CounterStore>>, limit: u32, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
        }
    }

    /// Always allows
    pub fn permissive(limit: u32) -> Self {
        Self::new(None, limit, Duration::from_secs(3600))
    }

    /// In-memory counters with the given limits
    pub fn in_memory(limit: u32, window: Duration) -> Self {
        Self::new(Some(Arc::new(InMemoryCounterStore::new())), limit, window)
    }

    /// Shared store when configured, else memory when enabled, else permissive
    pub fn from_config(config: &Config) -> Self {
        let limit = config.rate_limit.max_requests;
        let window = Duration::from_secs(config.rate_limit.window_secs);
        let creds = &config.credentials;

        let store: Option<Arc<dyn CounterStore>> = match (&creds.upstash_url, &creds.upstash_token) {
            (Some(url), Some(token)) => {
                tracing::info!("Rate limiting with shared Upstash counters");
                Some(Arc::new(UpstashCounterStore::new(url.clone(), token.clone())))
            }
            _ if config.rate_limit.in_memory => {
                tracing::info!("Rate limiting with in-memory counters");
                Some(Arc::new(InMemoryCounterStore::new()))
            }
            _ => {
                tracing::warn!(
                    "No rate-limit store configured, all requests are allowed. Do not run several instances like this"
                );
                None
            }
        };

        Self::new(store, limit, window)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn is_enforcing(&self) -> bool {
        self.store.is_some()
    }

    /// Count a request from `client_key` and decide whether it may proceed
    pub async fn check(&self, client_key: &str) -> RateLimitDecision {
        let Some(store) = &self.store else {
            return RateLimitDecision {
                allowed: true,
                remaining: self.limit,
            };
        };

        let key = format!("rl:{client_key}");
        match store.hit(&key, self.limit, self.window).await {
            Ok(count) => RateLimitDecision {
                allowed: count <= self.limit,
                remaining: self.limit.saturating_sub(count),
            },
            Err(e) => {
                tracing::error!(error = %e, "Rate-limit store failed, allowing request");
                RateLimitDecision {
                    allowed: true,
                    remaining: self.limit,
                }
            }
        }
    }
}
