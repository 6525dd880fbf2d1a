//! Attempt-based rate limiting keyed by identifier and action.
//!
//! Each `(identifier, action)` pair gets a fixed window. Once the attempts in
//! a window exceed the action's threshold the key is blocked for the action's
//! block duration; after the block lapses the key starts from a fresh window.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{PolicyConfig, RateLimitConfig};
use crate::error::GuardError;
use crate::observability::metrics;

/// The kind of operation being throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Login,
    TwoFactor,
    PasswordReset,
    Api,
    Registration,
    Email,
}

impl ActionType {
    pub const ALL: [ActionType; 6] = [
        ActionType::Login,
        ActionType::TwoFactor,
        ActionType::PasswordReset,
        ActionType::Api,
        ActionType::Registration,
        ActionType::Email,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Login => "login",
            ActionType::TwoFactor => "two_factor",
            ActionType::PasswordReset => "password_reset",
            ActionType::Api => "api",
            ActionType::Registration => "registration",
            ActionType::Email => "email",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "login" => Ok(ActionType::Login),
            "two_factor" | "2fa" => Ok(ActionType::TwoFactor),
            "password_reset" => Ok(ActionType::PasswordReset),
            "api" => Ok(ActionType::Api),
            "registration" => Ok(ActionType::Registration),
            "email" => Ok(ActionType::Email),
            other => Err(GuardError::InvalidInput(format!("unknown action type '{other}'"))),
        }
    }
}

/// Limits for one action type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_attempts: u32,
    pub window: Duration,
    pub block_duration: Duration,
}

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// Longest window or block a policy may specify. Longer values are clamped.
pub const MAX_POLICY_SECS: u64 = 365 * 24 * HOUR;

const fn clamp_secs(secs: u64) -> u64 {
    if secs > MAX_POLICY_SECS {
        MAX_POLICY_SECS
    } else {
        secs
    }
}

impl RateLimitPolicy {
    pub const fn new(max_attempts: u32, window_secs: u64, block_secs: u64) -> Self {
        Self {
            max_attempts,
            window: Duration::from_secs(clamp_secs(window_secs)),
            block_duration: Duration::from_secs(clamp_secs(block_secs)),
        }
    }

    /// Built-in limits for an action.
    pub const fn default_for(action: ActionType) -> Self {
        match action {
            ActionType::Login => Self::new(5, 15 * MINUTE, 30 * MINUTE),
            ActionType::TwoFactor => Self::new(3, 5 * MINUTE, 15 * MINUTE),
            ActionType::PasswordReset => Self::new(3, HOUR, HOUR),
            ActionType::Api => Self::new(100, MINUTE, 5 * MINUTE),
            ActionType::Registration => Self::new(3, HOUR, 24 * HOUR),
            ActionType::Email => Self::new(5, HOUR, HOUR),
        }
    }
}

impl From<&PolicyConfig> for RateLimitPolicy {
    fn from(config: &PolicyConfig) -> Self {
        Self::new(config.max_attempts, config.window_secs, config.block_secs)
    }
}

/// Build the full policy table: defaults overlaid with configured overrides.
///
/// Override keys that do not name an action are ignored; validation rejects
/// them before a config gets this far.
pub fn policies_from_config(config: &RateLimitConfig) -> HashMap<ActionType, RateLimitPolicy> {
    let mut policies: HashMap<_, _> = ActionType::ALL
        .iter()
        .map(|action| (*action, RateLimitPolicy::default_for(*action)))
        .collect();

    for (name, policy) in &config.policies {
        if let Ok(action) = name.parse::<ActionType>() {
            policies.insert(action, RateLimitPolicy::from(policy));
        }
    }
    policies
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Attempts left in the current window.
    pub remaining_attempts: u32,
    /// Time until the window (or block) ends.
    pub reset_in: Duration,
    /// Set only when the key is blocked.
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    fn allowed(remaining_attempts: u32, reset_in: Duration) -> Self {
        Self {
            allowed: true,
            remaining_attempts,
            reset_in,
            retry_after: None,
        }
    }

    fn blocked(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining_attempts: 0,
            reset_in: retry_after,
            retry_after: Some(retry_after),
        }
    }

    /// Convert a denial into [`GuardError::RateLimited`].
    pub fn into_result(self) -> Result<Self, GuardError> {
        if self.allowed {
            Ok(self)
        } else {
            Err(GuardError::RateLimited {
                retry_after: self.retry_after.unwrap_or(self.reset_in),
            })
        }
    }
}

/// Snapshot of one tracked key, for inspection.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitEntry {
    pub identifier: String,
    pub action: ActionType,
    pub attempts: u32,
    pub window_age_secs: u64,
    pub blocked_for_secs: Option<u64>,
}

/// End of a block starting at `now`, saturating instead of overflowing `Instant`.
fn block_deadline(now: Instant, block: Duration) -> Instant {
    let mut block = block;
    loop {
        if let Some(until) = now.checked_add(block) {
            return until;
        }
        block /= 2;
    }
}

#[derive(Debug, Clone)]
struct Attempts {
    count: u32,
    window_start: Instant,
    blocked_until: Option<Instant>,
}

impl Attempts {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
            blocked_until: None,
        }
    }

    fn is_expired(&self, policy: &RateLimitPolicy, now: Instant) -> bool {
        match self.blocked_until {
            Some(until) => now >= until,
            None => now.saturating_duration_since(self.window_start) >= policy.window,
        }
    }
}

/// In-memory attempt tracker.
///
/// State lives in this process only; several instances behind a load balancer
/// each keep their own counters.
pub struct RateLimiter {
    entries: DashMap<(String, ActionType), Attempts>,
    policies: ArcSwap<HashMap<ActionType, RateLimitPolicy>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(policies_from_config(&RateLimitConfig::default()))
    }
}

impl RateLimiter {
    pub fn new(policies: HashMap<ActionType, RateLimitPolicy>) -> Self {
        Self {
            entries: DashMap::new(),
            policies: ArcSwap::from_pointee(policies),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(policies_from_config(config))
    }

    /// Policy in force for an action.
    pub fn policy(&self, action: ActionType) -> RateLimitPolicy {
        self.policies
            .load()
            .get(&action)
            .copied()
            .unwrap_or_else(|| RateLimitPolicy::default_for(action))
    }

    /// Replace the policy table. Existing counters are kept.
    pub fn update_policies(&self, policies: HashMap<ActionType, RateLimitPolicy>) {
        self.policies.store(Arc::new(policies));
    }

    /// Record an attempt and decide whether it may proceed.
    pub fn check_limit(&self, identifier: &str, action: ActionType) -> RateLimitDecision {
        self.check_limit_at(identifier, action, Instant::now())
    }

    pub fn check_limit_at(
        &self,
        identifier: &str,
        action: ActionType,
        now: Instant,
    ) -> RateLimitDecision {
        let policy = self.policy(action);
        let mut entry = self
            .entries
            .entry((identifier.to_string(), action))
            .or_insert_with(|| Attempts::new(now));
        let attempts = entry.value_mut();

        if let Some(until) = attempts.blocked_until {
            if now < until {
                return RateLimitDecision::blocked(until.saturating_duration_since(now));
            }
        }
        if attempts.is_expired(&policy, now) {
            *attempts = Attempts::new(now);
        }

        attempts.count += 1;
        if attempts.count > policy.max_attempts {
            attempts.blocked_until = Some(block_deadline(now, policy.block_duration));
            drop(entry);

            tracing::warn!(
                identifier = %identifier,
                action = %action,
                block_secs = policy.block_duration.as_secs(),
                "Rate limit exceeded, blocking"
            );
            metrics::record_rate_limited(action.as_str());
            return RateLimitDecision::blocked(policy.block_duration);
        }

        let elapsed = now.saturating_duration_since(attempts.window_start);
        RateLimitDecision::allowed(
            policy.max_attempts - attempts.count,
            policy.window.saturating_sub(elapsed),
        )
    }

    /// Report whether the next attempt would be allowed, without recording one.
    pub fn peek(&self, identifier: &str, action: ActionType) -> RateLimitDecision {
        self.peek_at(identifier, action, Instant::now())
    }

    pub fn peek_at(&self, identifier: &str, action: ActionType, now: Instant) -> RateLimitDecision {
        let policy = self.policy(action);
        let Some(entry) = self.entries.get(&(identifier.to_string(), action)) else {
            return RateLimitDecision::allowed(policy.max_attempts, policy.window);
        };

        if let Some(until) = entry.blocked_until {
            if now < until {
                return RateLimitDecision::blocked(until.saturating_duration_since(now));
            }
        }
        if entry.is_expired(&policy, now) {
            return RateLimitDecision::allowed(policy.max_attempts, policy.window);
        }

        let elapsed = now.saturating_duration_since(entry.window_start);
        let remaining = policy.max_attempts.saturating_sub(entry.count);
        RateLimitDecision {
            allowed: remaining > 0,
            remaining_attempts: remaining,
            reset_in: policy.window.saturating_sub(elapsed),
            retry_after: None,
        }
    }

    /// Forget a key, e.g. after a successful login. Returns whether it existed.
    pub fn reset(&self, identifier: &str, action: ActionType) -> bool {
        let removed = self.entries.remove(&(identifier.to_string(), action)).is_some();
        if removed {
            tracing::debug!(identifier = %identifier, action = %action, "Rate limit reset");
        }
        removed
    }

    /// Drop every entry whose window and block have both lapsed.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Instant::now())
    }

    pub fn cleanup_expired_at(&self, now: Instant) -> usize {
        let policies = self.policies.load();
        let mut removed = 0;
        self.entries.retain(|(_, action), attempts| {
            let policy = policies
                .get(action)
                .copied()
                .unwrap_or_else(|| RateLimitPolicy::default_for(*action));
            let keep = !attempts.is_expired(&policy, now);
            if !keep {
                removed += 1;
            }
            keep
        });
        metrics::record_tracked_entries(self.entries.len());
        removed
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of all tracked keys, sorted by action then identifier.
    pub fn entries(&self) -> Vec<RateLimitEntry> {
        self.entries_at(Instant::now())
    }

    pub fn entries_at(&self, now: Instant) -> Vec<RateLimitEntry> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|r| {
                let (identifier, action) = r.key();
                let attempts = r.value();
                RateLimitEntry {
                    identifier: identifier.clone(),
                    action: *action,
                    attempts: attempts.count,
                    window_age_secs: now.saturating_duration_since(attempts.window_start).as_secs(),
                    blocked_for_secs: attempts
                        .blocked_until
                        .filter(|until| *until > now)
                        .map(|until| until.saturating_duration_since(now).as_secs()),
                }
            })
            .collect();
        out.sort_by(|a, b| (a.action, &a.identifier).cmp(&(b.action, &b.identifier)));
        out
    }

    /// Snapshot of currently blocked keys.
    pub fn blocked_entries(&self) -> Vec<RateLimitEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.blocked_for_secs.is_some())
            .collect()
    }

    /// Periodically sweep expired entries until shutdown is signalled.
    pub fn spawn_cleanup(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = self.cleanup_expired();
                        if removed > 0 {
                            tracing::debug!(removed, remaining = self.len(), "Expired rate limit entries swept");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Rate limit cleanup stopped");
                        break;
                    }
                }
            }
        })
    }
}
