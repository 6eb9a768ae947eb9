//! Access gate consulted before every open and every transaction.
//!
//! The gate is a licensing check, not part of storage correctness: the store
//! only asks it "may this call proceed?" and never caches the answer.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

pub trait AccessGate: Send + Sync {
    /// `Err(reason)` blocks the call.
    fn check(&self) -> Result<(), String>;
}

/// Gate that never refuses.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOpen;

impl AccessGate for AlwaysOpen {
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Subscription window: valid from `activated_on` for `duration_days` days,
/// and only while nothing is owed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub activated_on: NaiveDate,
    pub duration_days: i64,
    #[serde(default)]
    pub outstanding_debt: f64,
}

impl SubscriptionConfig {
    /// `None` when the window ends outside the representable calendar.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let start = self.activated_on.and_hms_opt(0, 0, 0)?.and_utc();
        TimeDelta::try_days(self.duration_days).and_then(|length| start.checked_add_signed(length))
    }
}

pub fn check_subscription(config: &SubscriptionConfig, now: DateTime<Utc>) -> Result<(), String> {
    let expires = config.expires_at().ok_or_else(|| {
        format!(
            "subscription length of {} days from {} is out of range",
            config.duration_days, config.activated_on
        )
    })?;
    if now >= expires {
        return Err(format!(
            "subscription expired on {}; renew to keep using the database",
            expires.format("%Y-%m-%d")
        ));
    }
    if config.outstanding_debt > 0.0 {
        return Err(format!(
            "outstanding balance of {:.2} must be settled before continuing",
            config.outstanding_debt
        ));
    }
    Ok(())
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct SubscriptionGate {
    config: SubscriptionConfig,
    clock: Clock,
}

impl SubscriptionGate {
    pub fn new(config: SubscriptionConfig) -> Self {
        Self::with_clock(config, Utc::now)
    }

    pub fn with_clock<F>(config: SubscriptionConfig, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        SubscriptionGate {
            config,
            clock: Box::new(clock),
        }
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }
}

impl AccessGate for SubscriptionGate {
    fn check(&self) -> Result<(), String> {
        check_subscription(&self.config, (self.clock)())
    }
}
