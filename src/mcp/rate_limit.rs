//! MCP Rate Limiting
//!
//! Per-principal rate limiting for MCP tool calls and resource reads.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::registry::ToolCategory;

const WINDOW: Duration = Duration::from_secs(60);

/// Rate limit configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub query_per_minute: u32,
    pub read_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            query_per_minute: 30,
            read_per_minute: 120,
        }
    }
}

/// Tracks rate limit state for a single principal
#[derive(Debug)]
struct PrincipalRateLimitState {
    query_count: u32,
    read_count: u32,
    window_start: Instant,
}

impl PrincipalRateLimitState {
    fn new() -> Self {
        Self {
            query_count: 0,
            read_count: 0,
            window_start: Instant::now(),
        }
    }

    fn reset_if_expired(&mut self) {
        if self.window_start.elapsed() > WINDOW {
            self.query_count = 0;
            self.read_count = 0;
            self.window_start = Instant::now();
        }
    }
}

/// Rate limiter for MCP requests
pub struct McpRateLimiter {
    config: RateLimitConfig,
    states: Mutex<HashMap<String, PrincipalRateLimitState>>,
}

impl McpRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Check if a request is allowed and record it if so
    /// Returns Ok(()) if allowed, Err(retry_after_secs) if rate limited
    pub fn check_and_record(&self, key: &str, category: ToolCategory) -> Result<(), u32> {
        let mut states = self
            .states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if states.len() > 1024 {
            states.retain(|_, state| state.window_start.elapsed() < WINDOW * 5);
        }

        let state = states
            .entry(key.to_string())
            .or_insert_with(PrincipalRateLimitState::new);

        // Reset window if expired
        state.reset_if_expired();

        let (current, limit) = match category {
            ToolCategory::Query => (&mut state.query_count, self.config.query_per_minute),
            ToolCategory::Read => (&mut state.read_count, self.config.read_per_minute),
        };

        if *current >= limit {
            let elapsed = state.window_start.elapsed().as_secs();
            let retry_after = WINDOW.as_secs().saturating_sub(elapsed) as u32;
            return Err(retry_after.max(1));
        }

        *current += 1;
        Ok(())
    }

    /// Current (query, read) usage for a principal
    pub fn get_usage(&self, key: &str) -> Option<(u32, u32)> {
        let states = self
            .states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        states.get(key).map(|s| (s.query_count, s.read_count))
    }
}

impl Default for McpRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
