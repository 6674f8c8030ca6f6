//! The countdown lock that holds new turns back after a rate limit or a
//! transient failure.

/// Why a cooldown was engaged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CooldownReason {
    /// The endpoint answered with HTTP 429.
    RateLimit,
    /// A gateway error or a network failure; the turn will be retried.
    TransientError,
}

/// What happens to the retained payload once a cooldown elapses.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Release<T> {
    /// Nothing was retained.
    Nothing,
    /// Redeliver the payload now.
    Resend(T),
    /// Hold the payload until the caller asks for it.
    Park(T),
}

/// The result of one tick.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TickOutcome<T> {
    /// The gate wasn't active.
    Idle,
    /// Still cooling down, with this many seconds left.
    Counting(u64),
    /// The countdown reached zero and the gate is idle again.
    Expired(Release<T>),
}

struct Active<T> {
    reason: CooldownReason,
    remaining: u64,
    resume_payload: Option<T>,
    auto_resume: bool,
}

/// A countdown-driven lock with an optional payload to release at expiry.
///
/// The gate doesn't own a timer. Whoever drives it calls [`tick`] once per
/// period, which makes it trivial to drive synchronously.
///
/// [`tick`]: CooldownGate::tick
pub(crate) struct CooldownGate<T> {
    active: Option<Active<T>>,
}

impl<T> Default for CooldownGate<T> {
    #[inline]
    fn default() -> Self {
        Self { active: None }
    }
}

impl<T> CooldownGate<T> {
    /// Starts (or restarts) a countdown. The last call wins: a running
    /// countdown, its reason and its payload are replaced.
    ///
    /// Returns the payload of the countdown that was replaced, if any.
    pub fn engage(
        &mut self,
        reason: CooldownReason,
        seconds: u64,
        resume_payload: Option<T>,
        auto_resume: bool,
    ) -> Option<T> {
        let replaced = self.active.replace(Active {
            reason,
            remaining: seconds.max(1),
            resume_payload,
            auto_resume,
        });
        replaced.and_then(|active| active.resume_payload)
    }

    /// Advances the countdown by one second.
    pub fn tick(&mut self) -> TickOutcome<T> {
        let Some(active) = &mut self.active else {
            return TickOutcome::Idle;
        };

        active.remaining -= 1;
        if active.remaining > 0 {
            return TickOutcome::Counting(active.remaining);
        }

        let Some(active) = self.active.take() else {
            unreachable!("gate is active");
        };
        let release = match active.resume_payload {
            None => Release::Nothing,
            Some(payload) if active.auto_resume => Release::Resend(payload),
            Some(payload) => Release::Park(payload),
        };
        TickOutcome::Expired(release)
    }

    /// Stops the countdown without releasing the payload.
    pub fn cancel(&mut self) -> Option<T> {
        self.active
            .take()
            .and_then(|active| active.resume_payload)
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Seconds left, zero when idle.
    #[inline]
    pub fn remaining_seconds(&self) -> u64 {
        self.active.as_ref().map_or(0, |active| active.remaining)
    }

    #[inline]
    pub fn reason(&self) -> Option<CooldownReason> {
        self.active.as_ref().map(|active| active.reason)
    }

    #[inline]
    pub fn payload(&self) -> Option<&T> {
        self.active
            .as_ref()
            .and_then(|active| active.resume_payload.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_countdown_is_monotonic() {
        let mut gate = CooldownGate::default();
        gate.engage(CooldownReason::RateLimit, 3, Some("msg"), true);
        assert!(gate.is_active());
        assert_eq!(gate.remaining_seconds(), 3);

        assert_eq!(gate.tick(), TickOutcome::Counting(2));
        assert_eq!(gate.remaining_seconds(), 2);
        assert_eq!(gate.tick(), TickOutcome::Counting(1));
        assert!(gate.is_active());
        assert_eq!(gate.tick(), TickOutcome::Expired(Release::Resend("msg")));
        assert!(!gate.is_active());
        assert_eq!(gate.remaining_seconds(), 0);

        // Never goes negative, never releases twice.
        assert_eq!(gate.tick(), TickOutcome::Idle);
        assert_eq!(gate.remaining_seconds(), 0);
    }

    #[test]
    fn test_park_without_auto_resume() {
        let mut gate = CooldownGate::default();
        gate.engage(CooldownReason::TransientError, 1, Some(7), false);
        assert_eq!(gate.tick(), TickOutcome::Expired(Release::Park(7)));
    }

    #[test]
    fn test_expire_without_payload() {
        let mut gate = CooldownGate::<()>::default();
        gate.engage(CooldownReason::RateLimit, 1, None, true);
        assert_eq!(gate.tick(), TickOutcome::Expired(Release::Nothing));
    }

    #[test]
    fn test_zero_seconds_takes_one_tick() {
        let mut gate = CooldownGate::default();
        gate.engage(CooldownReason::RateLimit, 0, Some(1), true);
        assert!(gate.is_active());
        assert_eq!(gate.remaining_seconds(), 1);
        assert_eq!(gate.tick(), TickOutcome::Expired(Release::Resend(1)));
    }

    #[test]
    fn test_last_engage_wins() {
        let mut gate = CooldownGate::default();
        gate.engage(CooldownReason::TransientError, 3, Some("retry"), true);
        assert_eq!(gate.tick(), TickOutcome::Counting(2));

        let replaced =
            gate.engage(CooldownReason::RateLimit, 20, Some("limited"), false);
        assert_eq!(replaced, Some("retry"));
        assert_eq!(gate.reason(), Some(CooldownReason::RateLimit));
        assert_eq!(gate.remaining_seconds(), 20);
        assert_eq!(gate.payload(), Some(&"limited"));

        for expected in (1..20).rev() {
            assert_eq!(gate.tick(), TickOutcome::Counting(expected));
        }
        assert_eq!(gate.tick(), TickOutcome::Expired(Release::Park("limited")));
    }

    #[test]
    fn test_cancel() {
        let mut gate = CooldownGate::default();
        gate.engage(CooldownReason::RateLimit, 5, Some("msg"), true);
        assert_eq!(gate.cancel(), Some("msg"));
        assert!(!gate.is_active());
        assert_eq!(gate.reason(), None);
        assert_eq!(gate.tick(), TickOutcome::Idle);
        assert_eq!(gate.cancel(), None);
    }
}
