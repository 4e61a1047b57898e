use embedded_time::{Clock, Instant};

use crate::time;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ping {
    Idle,
    Send,
    TimedOut,
}

/// Keep-alive timing for one connection.
///
/// A PINGREQ goes out once nothing has been sent for half the keep-alive
/// interval; the PINGRESP must arrive within the following half interval.
pub(crate) struct KeepAlive<C: Clock> {
    half_keep_alive: C::T,
    last_send: Instant<C>,
    ping_sent: Option<Instant<C>>,
    enabled: bool,
}

impl<C> KeepAlive<C>
where
    C: Clock,
{
    pub(crate) fn new(keep_alive_secs: u16, now: Instant<C>) -> Self {
        let keep_alive = time::ticks_from_secs::<C>(keep_alive_secs.into());

        Self {
            half_keep_alive: keep_alive / C::T::from(2u32),
            last_send: now,
            ping_sent: None,
            enabled: keep_alive_secs != 0,
        }
    }

    pub(crate) fn on_send(&mut self, now: Instant<C>) {
        self.last_send = now;
    }

    pub(crate) fn on_pingresp(&mut self) {
        self.ping_sent = None;
    }

    pub(crate) fn poll(&mut self, now: Instant<C>) -> Ping {
        if !self.enabled {
            return Ping::Idle;
        }

        if let Some(sent) = self.ping_sent {
            return match time::expired(&now, &sent, self.half_keep_alive) {
                true => Ping::TimedOut,
                false => Ping::Idle,
            };
        }

        if time::expired(&now, &self.last_send, self.half_keep_alive) {
            self.ping_sent = Some(now);
            return Ping::Send;
        }

        Ping::Idle
    }

    pub(crate) fn deadline(&self) -> Option<Instant<C>> {
        if !self.enabled {
            return None;
        }

        let since = self.ping_sent.as_ref().unwrap_or(&self.last_send);
        Some(time::after(since, self.half_keep_alive))
    }
}
