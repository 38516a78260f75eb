//! Timed, ascending-price, single-item auctions.
//!
//! The crate hosts one auction at a time on a dedicated tokio task. The
//! host runtime provides the environment through the traits in
//! [`context`] (currency ledger, messaging, player presence, manager
//! bookkeeping) and drives the lifecycle through the [`auction::Auction`]
//! handle:
//!
//! 1. assemble an auction with [`auction::Builder`],
//! 2. start it, turning the [`auction::PendingAuction`] into a live
//!    [`auction::Auction`] backed by a worker task,
//! 3. forward bids with [`auction::Auction::place_bid`]; the worker
//!    validates, escrows, and refunds superseded bidders,
//! 4. let the countdown expire, or force a terminal transition (end,
//!    cancel, impound),
//! 5. await the handle for the settled [`auction::Summary`].
//!
//! Settlement delivers the reward and the payout even when participants
//! have gone offline: undeliverable rewards are parked in the durable
//! [`settlement::OfflineStore`] and handed over on reconnect via
//! [`settlement::redeem_on_reconnect`].
//!
//! Configuration is read from `GAVEL_AUCTIONS_`-prefixed environment
//! variables (see `local.env.example`); the tunable subset is carried as
//! [`config::Settings`] on a watch channel so taxes, cooldowns, and
//! broadcast marks can change while an auction is live.

pub mod auction;
pub mod config;
pub mod context;
pub mod settlement;
#[cfg(test)]
mod testkit;

pub use auction::{
    Auction,
    Builder,
    PendingAuction,
    Summary,
};
pub use config::{
    Config,
    FromEnv,
    Settings,
};
pub use context::{
    AuctionContext,
    AuctionSnapshot,
    Notice,
    Player,
};
