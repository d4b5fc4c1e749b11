//! Timeout supervision bookkeeping.
//!
//! The supervisor does not sleep; it tracks which timer is live. Every arm
//! or disarm bumps a generation counter and an expiry is only honored when
//! it carries the live generation, so a timer started for a state that has
//! since been exited can never fire into its successor.
//!
//! Instants come from tokio's clock, which is the system clock outside a
//! runtime and the paused test clock inside one.

use std::time::Duration;
use tokio::time::Instant;

/// Identifies one armed timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerTicket {
    pub generation: u64,
    pub duration: Duration,
    /// When the timer was armed, i.e. when the state was entered
    pub armed_at: Instant,
}

impl TimerTicket {
    /// The instant this timer expires.
    pub fn deadline(&self) -> Instant {
        self.armed_at + self.duration
    }
}

#[derive(Debug, Default)]
pub(crate) struct TimeoutSupervisor {
    generation: u64,
    armed: Option<TimerTicket>,
}

impl TimeoutSupervisor {
    /// Arm a fresh timer, replacing any live one. `None` just disarms.
    pub fn arm(&mut self, duration: Option<Duration>) -> Option<TimerTicket> {
        self.generation += 1;
        let armed_at = Instant::now();
        self.armed = duration.map(|duration| TimerTicket {
            generation: self.generation,
            duration,
            armed_at,
        });
        self.armed
    }

    pub fn disarm(&mut self) {
        self.arm(None);
    }

    pub fn ticket(&self) -> Option<TimerTicket> {
        self.armed
    }

    pub fn is_live(&self, generation: u64) -> bool {
        self.ticket().is_some_and(|t| t.generation == generation)
    }

    /// The live ticket, if its deadline has passed at `now`.
    pub fn expired(&self, now: Instant) -> Option<TimerTicket> {
        self.armed.filter(|ticket| now >= ticket.deadline())
    }
}
