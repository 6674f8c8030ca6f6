//! Tunables of the request lifecycle.

use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::ExponentialBackoffBuilder;

/// Status codes treated as transient gateway/upstream failures by default.
pub const DEFAULT_TRANSIENT_STATUSES: [u16; 6] = [502, 503, 504, 520, 522, 524];

/// The longest cooldown a transient retry may wait.
const MAX_TRANSIENT_DELAY: Duration = Duration::from_secs(60 * 60);
const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;
const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Builder for [`Policy`].
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyBuilder {
    policy: Policy,
}

impl PolicyBuilder {
    /// Creates a builder initialized with the default policy.
    #[inline]
    pub fn new() -> Self {
        Self {
            policy: Policy::default(),
        }
    }

    /// Sets how many times a turn is retried after transient failures.
    #[inline]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Replaces the set of status codes treated as transient.
    #[inline]
    pub fn with_transient_statuses(
        mut self,
        statuses: impl Into<Vec<u16>>,
    ) -> Self {
        self.policy.transient_statuses = statuses.into();
        self
    }

    /// Sets the cooldown before the first transient retry. Capped at one
    /// hour.
    #[inline]
    pub fn with_transient_delay(mut self, delay: Duration) -> Self {
        self.policy.transient_delay = delay.min(MAX_TRANSIENT_DELAY);
        self
    }

    /// Sets how much the transient cooldown grows on each retry. `1.0`
    /// keeps the delay fixed. Values outside `1.0..=10.0` are clamped.
    #[inline]
    pub fn with_transient_backoff_multiplier(mut self, multiplier: f64) -> Self {
        // `max` maps NaN to 1.0.
        self.policy.transient_backoff_multiplier =
            multiplier.max(1.0).min(MAX_BACKOFF_MULTIPLIER);
        self
    }

    /// Sets the cooldown used when a 429 response doesn't say how long
    /// to wait.
    #[inline]
    pub fn with_default_rate_limit_wait(mut self, wait: Duration) -> Self {
        self.policy.default_rate_limit_wait = wait;
        self
    }

    /// Sets the text recorded in place of an empty reply.
    #[inline]
    pub fn with_empty_reply_placeholder<S: Into<String>>(
        mut self,
        placeholder: S,
    ) -> Self {
        self.policy.empty_reply_placeholder = placeholder.into();
        self
    }

    /// Sets the text recorded for failures without a server message.
    #[inline]
    pub fn with_generic_error<S: Into<String>>(mut self, message: S) -> Self {
        self.policy.generic_error = message.into();
        self
    }

    /// Sets how many prior transcript entries are sent as context.
    #[inline]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.policy.history_limit = limit;
        self
    }

    /// Sets whether a retained turn is resent automatically once its
    /// cooldown elapses.
    #[inline]
    pub fn with_auto_resume(mut self, auto_resume: bool) -> Self {
        self.policy.auto_resume = auto_resume;
        self
    }

    /// Sets the cooldown tick period. At least one millisecond.
    #[inline]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.policy.tick_interval = interval.max(MIN_TICK_INTERVAL);
        self
    }

    /// Bounds each dispatch attempt. Expiry counts as a network failure.
    #[inline]
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.policy.dispatch_timeout = Some(timeout);
        self
    }

    /// Builds the policy.
    #[inline]
    pub fn build(self) -> Policy {
        self.policy
    }
}

impl Default for PolicyBuilder {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

/// Retry, rate limit and cooldown policy of a session.
#[derive(Clone, Debug, PartialEq)]
pub struct Policy {
    pub(crate) max_retries: u32,
    pub(crate) transient_statuses: Vec<u16>,
    pub(crate) transient_delay: Duration,
    pub(crate) transient_backoff_multiplier: f64,
    pub(crate) default_rate_limit_wait: Duration,
    pub(crate) empty_reply_placeholder: String,
    pub(crate) generic_error: String,
    pub(crate) history_limit: usize,
    pub(crate) auto_resume: bool,
    pub(crate) tick_interval: Duration,
    pub(crate) dispatch_timeout: Option<Duration>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            transient_statuses: DEFAULT_TRANSIENT_STATUSES.to_vec(),
            transient_delay: Duration::from_secs(3),
            transient_backoff_multiplier: 1.0,
            default_rate_limit_wait: Duration::from_secs(20),
            empty_reply_placeholder: "(The assistant returned an empty reply.)"
                .to_owned(),
            generic_error: "Something went wrong. Please try again.".to_owned(),
            history_limit: 10,
            auto_resume: true,
            tick_interval: Duration::from_secs(1),
            dispatch_timeout: None,
        }
    }
}

impl Policy {
    /// Returns how many times a turn is retried after transient failures.
    #[inline]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Returns how many prior transcript entries are sent as context.
    #[inline]
    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Returns whether retained turns are resent automatically.
    #[inline]
    pub fn auto_resume(&self) -> bool {
        self.auto_resume
    }

    /// Returns the text recorded in place of an empty reply.
    #[inline]
    pub fn empty_reply_placeholder(&self) -> &str {
        &self.empty_reply_placeholder
    }

    #[inline]
    pub(crate) fn is_transient_status(&self, code: u16) -> bool {
        self.transient_statuses.contains(&code)
    }

    /// Creates the backoff sequence for the transient retries of one turn.
    pub(crate) fn transient_backoff(&self) -> ExponentialBackoff {
        let growth = self.transient_backoff_multiplier.powi(8);
        let max_secs = self.transient_delay.as_secs_f64() * growth;
        let max_interval = Duration::try_from_secs_f64(max_secs)
            .unwrap_or(MAX_TRANSIENT_DELAY)
            .min(MAX_TRANSIENT_DELAY);
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.transient_delay)
            .with_multiplier(self.transient_backoff_multiplier)
            .with_randomization_factor(0.0)
            .with_max_interval(max_interval)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Converts a cooldown delay into whole countdown seconds.
///
/// The gate counts in whole ticks, so sub-second waits still take one.
#[inline]
pub(crate) fn whole_seconds(delay: Duration) -> u64 {
    (delay.as_secs_f64().round() as u64).max(1)
}
