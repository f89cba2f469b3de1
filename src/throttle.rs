//! Scope-keyed rate limiting over the shared counter store.
//!
//! Provides:
//! - `RateLimiter` - windowed counter throttle with a side-effect-free peek
//! - `ThrottleRules` - configured thresholds per action, with per-namespace
//!   overrides and exempt caller classes

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::store::KvStore;

/// Threshold value meaning "no limit configured": always permitted, and the
/// counter store is never touched.
pub const NO_LIMIT: u64 = 0;

/// Where a throttled call originates. System-initiated calls are exempt by
/// default: operator-configured hooks must not be shed by tenant limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerSource {
    Project,
    Group,
    System,
}

/// Configured throttle thresholds.
///
/// Resolution order for a given (namespace, action): namespace override,
/// then the action default, then [`NO_LIMIT`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleRules {
    /// Counting window. Counters reset when the window rolls over.
    pub window_ms: u64,
    /// Default threshold per action name. 0 means unlimited.
    pub actions: BTreeMap<String, u64>,
    /// Per-root-namespace overrides, keyed by namespace then action.
    pub namespace_overrides: BTreeMap<String, BTreeMap<String, u64>>,
    /// Caller classes that are never throttled.
    pub exempt_sources: Vec<CallerSource>,
}

impl Default for ThrottleRules {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            actions: BTreeMap::new(),
            namespace_overrides: BTreeMap::new(),
            exempt_sources: vec![CallerSource::System],
        }
    }
}

impl ThrottleRules {
    pub fn threshold_for(&self, namespace: &str, action: &str) -> u64 {
        if let Some(overrides) = self.namespace_overrides.get(namespace)
            && let Some(&threshold) = overrides.get(action)
        {
            return threshold;
        }
        self.actions.get(action).copied().unwrap_or(NO_LIMIT)
    }

    pub fn exempt(&self, source: CallerSource) -> bool {
        self.exempt_sources.contains(&source)
    }
}

/// Identifies one throttle domain: a root namespace, the action being
/// performed under it, and the caller class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThrottleScope {
    pub namespace: String,
    pub action: String,
    pub source: CallerSource,
}

impl ThrottleScope {
    pub fn new(
        namespace: impl Into<String>,
        action: impl Into<String>,
        source: CallerSource,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            action: action.into(),
            source,
        }
    }
}

/// Windowed counter throttle.
///
/// Enforcement is best-effort: a store failure logs a warning and reports
/// "not throttled" rather than taking the caller down with it.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    rules: ThrottleRules,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, rules: ThrottleRules) -> Self {
        Self { store, rules }
    }

    /// Count this call against the scope's window and report whether the
    /// post-increment count exceeds the configured threshold.
    pub fn throttled(&self, scope: &ThrottleScope) -> bool {
        self.check(scope, true)
    }

    /// Report whether the scope is currently over its threshold without
    /// counting this call.
    pub fn peek(&self, scope: &ThrottleScope) -> bool {
        self.check(scope, false)
    }

    fn check(&self, scope: &ThrottleScope, increment: bool) -> bool {
        if self.rules.exempt(scope.source) {
            return false;
        }
        let threshold = self.rules.threshold_for(&scope.namespace, &scope.action);
        if threshold == NO_LIMIT {
            return false;
        }

        let window = Duration::from_millis(self.rules.window_ms);
        let key = self.counter_key(scope);
        let count = if increment {
            self.store.incr(&key, window)
        } else {
            self.store.read_counter(&key)
        };
        match count {
            Ok(count) => count > threshold,
            Err(err) => {
                tracing::warn!(
                    namespace = %scope.namespace,
                    action = %scope.action,
                    error = %err,
                    "throttle counter unavailable, failing open"
                );
                false
            }
        }
    }

    /// Counter key for the current window slot. The slot index keys each
    /// window to its own counter; the TTL reclaims old slots.
    fn counter_key(&self, scope: &ThrottleScope) -> String {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let slot = now_ms / self.rules.window_ms.max(1);
        format!("throttle:{}:{}:{}", scope.namespace, scope.action, slot)
    }
}
