//! Tick arithmetic on top of `embedded-time`.
//!
//! All engine timeouts are configured in whole seconds and compared as raw
//! ticks of the session's clock.

use embedded_time::{Clock, Instant};
use num_traits::WrappingAdd;

/// `secs` expressed in ticks of `C`.
pub(crate) fn ticks_from_secs<C: Clock>(secs: u32) -> C::T {
    C::T::from(secs) / C::SCALING_FACTOR
}

/// Ticks elapsed from `since` to `now`; `None` when the clock went backwards.
pub(crate) fn elapsed<C: Clock>(now: &Instant<C>, since: &Instant<C>) -> Option<C::T> {
    now.checked_duration_since(since).map(|d| d.integer())
}

/// `true` once `timeout` ticks have passed since `since`.
pub(crate) fn expired<C: Clock>(now: &Instant<C>, since: &Instant<C>, timeout: C::T) -> bool {
    elapsed(now, since).is_some_and(|ticks| ticks >= timeout)
}

/// The instant `ticks` after `since`. Wraps with the clock, the same way
/// `Instant` ordering does.
pub(crate) fn after<C: Clock>(since: &Instant<C>, ticks: C::T) -> Instant<C> {
    Instant::new(since.duration_since_epoch().integer().wrapping_add(&ticks))
}

/// The earlier of two optional deadlines.
pub(crate) fn earliest<C: Clock>(a: Option<Instant<C>>, b: Option<Instant<C>>) -> Option<Instant<C>> {
    match (a, b) {
        (Some(a), Some(b)) => {
            if b.checked_duration_since(&a).is_some() {
                Some(a)
            } else {
                Some(b)
            }
        }
        (a, None) => a,
        (None, b) => b,
    }
}

/// Millisecond-resolution clock driven by `embassy-time`.
#[cfg(feature = "embassy")]
pub struct EmbassyClock {
    start: embassy_time::Instant,
}

#[cfg(feature = "embassy")]
impl Default for EmbassyClock {
    fn default() -> Self {
        Self {
            start: embassy_time::Instant::now(),
        }
    }
}

#[cfg(feature = "embassy")]
impl Clock for EmbassyClock {
    type T = u64;

    const SCALING_FACTOR: embedded_time::rate::Fraction =
        embedded_time::rate::Fraction::new(1, 1_000);

    fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
        let elapsed = embassy_time::Instant::now().duration_since(self.start);

        Ok(Instant::new(elapsed.as_millis()))
    }
}

/// Fixed clock for tests; time only moves when the test says so.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct TestClock {
    pub(crate) now_ms: core::cell::Cell<u64>,
}

#[cfg(test)]
impl TestClock {
    pub(crate) fn at(ms: u64) -> Instant<Self> {
        Instant::new(ms)
    }

    pub(crate) fn advance(&self, ms: u64) {
        self.now_ms.set(self.now_ms.get() + ms);
    }
}

#[cfg(test)]
impl Clock for TestClock {
    type T = u64;

    const SCALING_FACTOR: embedded_time::rate::Fraction =
        embedded_time::rate::Fraction::new(1, 1_000);

    fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
        Ok(Instant::new(self.now_ms.get()))
    }
}
