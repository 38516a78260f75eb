use tokio::sync::{
    mpsc,
    watch,
};

use super::{
    observers::BidObserver,
    worker::Worker,
    Auction,
    Id,
};
use crate::context::{
    AuctionContext,
    AuctionSnapshot,
    Kind,
    Player,
    Reward,
};

/// The builder was asked to produce an auction without a required field.
#[derive(Clone, Copy, Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("auctions require a reward")]
    MissingReward,
    #[error("auctions require a starting bid")]
    MissingStartingBid,
}

/// Assembles a [`PendingAuction`]. `reward` and `starting_bid` are
/// required; increment and run time fall back to the live settings'
/// defaults when unset.
pub struct Builder {
    ctx: AuctionContext,
    kind: Kind,
    owner: Player,
    reward: Option<Box<dyn Reward>>,
    starting_bid: Option<u64>,
    bid_increment: Option<u64>,
    time_secs: Option<u64>,
    autowin: Option<u64>,
    observers: Vec<Box<dyn BidObserver>>,
}

impl Builder {
    /// The owner's identity and display name are captured here and are
    /// immutable for the lifetime of the auction.
    pub fn new(ctx: AuctionContext, owner: Player) -> Self {
        Self {
            ctx,
            kind: Kind::default(),
            owner,
            reward: None,
            starting_bid: None,
            bid_increment: None,
            time_secs: None,
            autowin: None,
            observers: Vec::new(),
        }
    }

    pub fn kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    pub fn reward(mut self, reward: Box<dyn Reward>) -> Self {
        self.reward = Some(reward);
        self
    }

    pub fn starting_bid(mut self, bid: u64) -> Self {
        self.starting_bid = Some(bid);
        self
    }

    pub fn bid_increment(mut self, increment: u64) -> Self {
        self.bid_increment = Some(increment);
        self
    }

    pub fn time_secs(mut self, secs: u64) -> Self {
        self.time_secs = Some(secs);
        self
    }

    /// A bid meeting this amount ends the auction on the spot.
    pub fn autowin(mut self, threshold: u64) -> Self {
        self.autowin = Some(threshold);
        self
    }

    /// Observers run after each accepted bid, in registration order.
    pub fn observer(mut self, observer: Box<dyn BidObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> Result<PendingAuction, BuildError> {
        let Self {
            ctx,
            kind,
            owner,
            reward,
            starting_bid,
            bid_increment,
            time_secs,
            autowin,
            observers,
        } = self;

        let reward = reward.ok_or(BuildError::MissingReward)?;
        let starting_bid = starting_bid.ok_or(BuildError::MissingStartingBid)?;

        let settings = ctx.settings();
        let bid_increment = bid_increment.unwrap_or(settings.default_bid_increment);
        let time_secs = time_secs.unwrap_or(settings.start_time_secs);

        Ok(PendingAuction {
            ctx,
            kind,
            owner,
            reward,
            starting_bid,
            bid_increment,
            time_secs,
            autowin,
            observers,
        })
    }
}

/// A validated auction that has not started yet. Lives in the manager's
/// pending queue until promoted.
///
/// Starting consumes the value, so an auction cannot be started twice.
pub struct PendingAuction {
    ctx: AuctionContext,
    kind: Kind,
    owner: Player,
    reward: Box<dyn Reward>,
    starting_bid: u64,
    bid_increment: u64,
    time_secs: u64,
    autowin: Option<u64>,
    observers: Vec<Box<dyn BidObserver>>,
}

impl std::fmt::Debug for PendingAuction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAuction")
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .field("reward", &self.reward.describe())
            .field("starting_bid", &self.starting_bid)
            .field("bid_increment", &self.bid_increment)
            .field("time_secs", &self.time_secs)
            .field("autowin", &self.autowin)
            .finish_non_exhaustive()
    }
}

impl PendingAuction {
    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn owner(&self) -> &Player {
        &self.owner
    }

    pub fn starting_bid(&self) -> u64 {
        self.starting_bid
    }

    pub fn bid_increment(&self) -> u64 {
        self.bid_increment
    }

    pub fn time_secs(&self) -> u64 {
        self.time_secs
    }

    pub fn reward_description(&self) -> String {
        self.reward.describe()
    }

    /// Spawns the worker that owns the auction from here on: the countdown
    /// begins and the start notices are broadcast.
    pub fn start(self) -> Auction {
        let Self {
            ctx,
            kind,
            owner,
            reward,
            starting_bid,
            bid_increment,
            time_secs,
            autowin,
            observers,
        } = self;

        let id = Id::new();
        let reward_description = reward.describe();
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (snapshot_tx, snapshot_rx) = watch::channel(AuctionSnapshot {
            kind,
            owner: owner.clone(),
            top_bidder: None,
            top_bid: starting_bid,
            bid_increment,
            time_left_secs: time_secs,
            reward_description: reward_description.clone(),
        });

        let worker = Worker {
            id,
            ctx,
            kind,
            owner,
            reward: Some(reward),
            reward_description,
            top_bidder: None,
            winning_bid: starting_bid,
            bid_increment,
            autowin,
            time_left: time_secs,
            observers,
            commands: commands_rx,
            snapshot: snapshot_tx,
        };

        Auction {
            id,
            commands: commands_tx,
            snapshot: snapshot_rx,
            worker: tokio::spawn(worker.run()),
        }
    }
}
