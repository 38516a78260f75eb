//! Pluggable hooks that run after each accepted bid.
//!
//! Observers run in registration order. Each one independently decides
//! whether it wants to fire and reports its effect back to the worker
//! instead of mutating auction state directly.

use crate::context::AuctionSnapshot;

/// A state change requested by an observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    ExtendCountdown { secs: u64 },
}

/// A hook invoked after every accepted bid.
pub trait BidObserver: Send {
    /// Whether the observer wants to run for this bid.
    fn can_trigger(&self, auction: &AuctionSnapshot) -> bool;

    /// Reacts to the accepted bid.
    fn trigger(&mut self, auction: &AuctionSnapshot) -> Option<Effect>;
}

/// Extends the countdown when a bid lands close to expiry, so an auction
/// cannot be stolen in the last second. Capped per auction.
pub struct AntiSnipe {
    threshold_secs: u64,
    extension_secs: u64,
    max_triggers: u32,
    triggers: u32,
}

impl AntiSnipe {
    pub fn new(threshold_secs: u64, extension_secs: u64, max_triggers: u32) -> Self {
        Self {
            threshold_secs,
            extension_secs,
            max_triggers,
            triggers: 0,
        }
    }
}

impl BidObserver for AntiSnipe {
    fn can_trigger(&self, auction: &AuctionSnapshot) -> bool {
        self.triggers < self.max_triggers && auction.time_left_secs <= self.threshold_secs
    }

    fn trigger(&mut self, _auction: &AuctionSnapshot) -> Option<Effect> {
        self.triggers += 1;
        Some(Effect::ExtendCountdown {
            secs: self.extension_secs,
        })
    }
}
