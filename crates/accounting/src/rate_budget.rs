//! Per-tenant call quota tracking.
//!
//! Each tenant owns two fixed windows: a minute window capped below the
//! advertised limit to leave headroom, and a day window. Every outbound call
//! passes through [`TenantRateBudget::wait_if_needed`] before it is sent and
//! [`TenantRateBudget::update_from_headers`] after the response arrives.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

pub const MINUTE_REMAINING_HEADER: &str = "x-minlimit-remaining";
pub const DAY_REMAINING_HEADER: &str = "x-daylimit-remaining";
pub const RETRY_AFTER_HEADER: &str = "retry-after";

/// Quota configuration shared by every tenant of one budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateBudgetConfig {
    /// Calls per minute advertised by the remote API.
    #[serde(default = "default_minute_limit")]
    pub minute_limit: u32,

    /// Calls per minute deliberately left unused.
    #[serde(default = "default_minute_headroom")]
    pub minute_headroom: u32,

    /// Calls per day advertised by the remote API.
    #[serde(default = "default_day_limit")]
    pub day_limit: u32,
}

fn default_minute_limit() -> u32 {
    60
}

fn default_minute_headroom() -> u32 {
    2
}

fn default_day_limit() -> u32 {
    5000
}

impl Default for RateBudgetConfig {
    fn default() -> Self {
        Self {
            minute_limit: default_minute_limit(),
            minute_headroom: default_minute_headroom(),
            day_limit: default_day_limit(),
        }
    }
}

impl RateBudgetConfig {
    /// Calls per minute this process will actually issue.
    pub fn effective_minute_limit(&self) -> u32 {
        self.minute_limit.saturating_sub(self.minute_headroom)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.day_limit == 0 {
            return Err("day_limit must be > 0".to_string());
        }
        if self.effective_minute_limit() == 0 {
            return Err("minute_headroom must leave at least one call per minute".to_string());
        }
        Ok(())
    }
}

/// Fixed window of `length` allowing `limit` calls.
#[derive(Debug, Clone)]
pub struct RateWindow {
    window_start: Option<Instant>,
    count: u32,
    limit: u32,
    length: Duration,
}

impl RateWindow {
    fn new(limit: u32, length: Duration) -> Self {
        Self {
            window_start: None,
            count: 0,
            limit,
            length,
        }
    }

    fn roll(&mut self, now: Instant) {
        if let Some(start) = self.window_start {
            if now.saturating_duration_since(start) >= self.length {
                self.window_start = None;
                self.count = 0;
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        self.count >= self.limit
    }

    fn resets_at(&self, now: Instant) -> Instant {
        self.window_start.unwrap_or(now) + self.length
    }

    fn record(&mut self, now: Instant) {
        self.window_start.get_or_insert(now);
        self.count += 1;
    }

    /// Raise the local count to what the server reports as used.
    ///
    /// Never lowers it: headers may lag behind calls already in flight.
    fn reconcile(&mut self, used_remotely: u32, now: Instant) -> bool {
        let used = used_remotely.min(self.limit);
        if used > self.count {
            self.window_start.get_or_insert(now);
            self.count = used;
            true
        } else {
            false
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

#[derive(Debug)]
struct TenantWindows {
    minute: RateWindow,
    day: RateWindow,
}

/// Remaining-call counters reported by the remote on a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub minute_remaining: Option<u32>,
    pub day_remaining: Option<u32>,
    pub retry_after: Option<u64>,
}

impl RateLimitHeaders {
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let read = |name: &str| -> Option<u64> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
        };

        let retry_after = headers
            .get(RETRY_AFTER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));

        Self {
            minute_remaining: read(MINUTE_REMAINING_HEADER).map(|v| v.min(u32::MAX as u64) as u32),
            day_remaining: read(DAY_REMAINING_HEADER).map(|v| v.min(u32::MAX as u64) as u32),
            retry_after,
        }
    }
}

/// Seconds to wait from a `Retry-After` value: delta-seconds or an HTTP-date.
///
/// A date in the past means no wait; partial seconds round up.
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<u64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let millis = (at - now).num_milliseconds().max(0) as u64;
    Some(millis.div_ceil(1000))
}

/// Snapshot of a tenant's budget, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetUsage {
    pub used_this_minute: u32,
    pub minute_limit: u32,
    pub used_today: u32,
    pub day_limit: u32,
}

/// Call quota tracker for every tenant this process talks to.
///
/// Counters are per process; one instance is shared by all clients for the
/// same remote API.
#[derive(Debug)]
pub struct TenantRateBudget {
    config: RateBudgetConfig,
    tenants: Mutex<HashMap<String, Arc<Mutex<TenantWindows>>>>,
}

impl TenantRateBudget {
    pub fn new(config: RateBudgetConfig) -> Result<Self, String> {
        config.validate()?;
        Ok(Self {
            config,
            tenants: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_defaults() -> Self {
        Self {
            config: RateBudgetConfig::default(),
            tenants: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RateBudgetConfig {
        &self.config
    }

    fn windows_for(&self, tenant_id: &str) -> Arc<Mutex<TenantWindows>> {
        let mut tenants = lock(&self.tenants);
        tenants
            .entry(tenant_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(TenantWindows {
                    minute: RateWindow::new(self.config.effective_minute_limit(), MINUTE),
                    day: RateWindow::new(self.config.day_limit, DAY),
                }))
            })
            .clone()
    }

    /// Block until the tenant may issue one more call, then count it.
    ///
    /// Returns how long the caller waited.
    pub async fn wait_if_needed(&self, tenant_id: &str) -> Duration {
        let windows = self.windows_for(tenant_id);
        let started = Instant::now();

        loop {
            let wake_at = {
                let mut w = lock(&windows);
                let now = Instant::now();
                w.minute.roll(now);
                w.day.roll(now);

                if w.day.is_exhausted() {
                    info!(tenant_id, used = w.day.count, "Daily call budget exhausted, waiting for reset");
                    w.day.resets_at(now)
                } else if w.minute.is_exhausted() {
                    debug!(tenant_id, used = w.minute.count, "Minute call budget exhausted, waiting for reset");
                    w.minute.resets_at(now)
                } else {
                    w.minute.record(now);
                    w.day.record(now);
                    return started.elapsed();
                }
            };

            tokio::time::sleep_until(wake_at).await;
        }
    }

    /// Fold the server's view of remaining calls into the local estimate,
    /// keeping whichever is more conservative.
    pub fn update_from_headers(&self, tenant_id: &str, headers: &RateLimitHeaders) {
        if headers.minute_remaining.is_none() && headers.day_remaining.is_none() {
            return;
        }

        let windows = self.windows_for(tenant_id);
        let mut w = lock(&windows);
        let now = Instant::now();
        w.minute.roll(now);
        w.day.roll(now);

        if let Some(remaining) = headers.minute_remaining {
            let used = self.config.minute_limit.saturating_sub(remaining);
            if w.minute.reconcile(used, now) {
                debug!(tenant_id, remaining, used = w.minute.count, "Minute budget tightened from headers");
            }
        }
        if let Some(remaining) = headers.day_remaining {
            let used = self.config.day_limit.saturating_sub(remaining);
            if w.day.reconcile(used, now) {
                debug!(tenant_id, remaining, used = w.day.count, "Day budget tightened from headers");
            }
        }
    }

    pub fn usage(&self, tenant_id: &str) -> BudgetUsage {
        let windows = self.windows_for(tenant_id);
        let mut w = lock(&windows);
        let now = Instant::now();
        w.minute.roll(now);
        w.day.roll(now);

        BudgetUsage {
            used_this_minute: w.minute.count(),
            minute_limit: w.minute.limit(),
            used_today: w.day.count(),
            day_limit: w.day.limit(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
