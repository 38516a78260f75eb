//! A single timed, ascending-price auction.
//!
//! An auction is built with [`Builder`], which validates the required
//! fields and fills defaults from the live settings. [`PendingAuction`]
//! sits in the manager's queue until [`PendingAuction::start`] consumes it
//! and spawns the worker task that owns all auction state. From then on
//! the [`Auction`] handle is the only way in: bids and terminal
//! transitions are commands sent over a channel and are executed strictly
//! one at a time by the worker, so a tick can never race a cancellation
//! and a refund can never interleave with an escrow withdrawal.
//!
//! The handle doubles as a future resolving to `(Id, Result<Summary,
//! Error>)` once the worker has fully settled the auction, mirroring how
//! the manager is expected to await the outcome while still being able to
//! forward commands.

mod builder;
mod observers;
mod worker;

use std::fmt::Display;

pub use builder::{
    BuildError,
    Builder,
    PendingAuction,
};
use futures::FutureExt as _;
pub use observers::{
    AntiSnipe,
    BidObserver,
    Effect,
};
use tokio::{
    sync::{
        mpsc,
        oneshot,
        watch,
    },
    task::JoinHandle,
};
use tracing::instrument;
use uuid::Uuid;

use crate::context::{
    AuctionSnapshot,
    Player,
};

/// Identifies one auction instance.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct Id(Uuid);

impl Id {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a bid was not admitted.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum BidError {
    #[error("bid must be at least {minimum}")]
    TooLow { minimum: u64 },
    #[error("bidder balance is below the offered amount")]
    InsufficientBalance,
    #[error("bidder already holds the top bid")]
    AlreadyTopBidder,
    #[error("the escrow transfer could not be completed")]
    EscrowFailed,
    #[error("the auction has already terminated")]
    AuctionOver,
}

/// Returned when a terminal transition is requested of an auction that
/// has already terminated.
#[derive(Clone, Copy, Debug, thiserror::Error, PartialEq, Eq)]
#[error("the auction has already terminated")]
pub struct AuctionOver;

/// How the auction failed. Settlement problems are surfaced here rather
/// than swallowed, because a lost store write means a lost reward.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the task running the auction panicked")]
    Panicked { source: tokio::task::JoinError },
    #[error("failed to persist a reward to the offline settlement store: {source}")]
    Settlement { source: eyre::Report },
}

/// The terminal outcome of an auction.
#[derive(Debug)]
pub enum Summary {
    Ended {
        winner: Option<Player>,
        hammer_price: u64,
    },
    Cancelled,
    Impounded,
}

impl Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Summary::Ended {
                winner: Some(winner),
                hammer_price,
            } => write!(f, "auction won by {winner} at {hammer_price}"),
            Summary::Ended {
                winner: None, ..
            } => f.write_str("auction ended without bids"),
            Summary::Cancelled => f.write_str("auction was cancelled"),
            Summary::Impounded => f.write_str("auction was impounded"),
        }
    }
}

pub(crate) enum Command {
    PlaceBid {
        bidder: Player,
        amount: u64,
        reply: oneshot::Sender<Result<(), BidError>>,
    },
    End {
        broadcast: bool,
        reply: oneshot::Sender<()>,
    },
    Cancel {
        reply: oneshot::Sender<()>,
    },
    Impound {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a live auction. Held by the manager's current-auction slot.
pub struct Auction {
    id: Id,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<AuctionSnapshot>,
    worker: JoinHandle<Result<Summary, Error>>,
}

impl Auction {
    pub fn id(&self) -> Id {
        self.id
    }

    /// The current state of the auction as last published by the worker.
    pub fn snapshot(&self) -> AuctionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Submits a bid. Rejections leave all auction state unchanged; the
    /// bidder is also messaged the reason through the message handler.
    #[instrument(skip(self), fields(id = %self.id, bidder = %bidder, amount))]
    pub async fn place_bid(&self, bidder: Player, amount: u64) -> Result<(), BidError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::PlaceBid {
                bidder,
                amount,
                reply,
            })
            .await
            .map_err(|_| BidError::AuctionOver)?;
        response.await.map_err(|_| BidError::AuctionOver)?
    }

    /// Ends the auction: the winner (if any) keeps the purchase, the owner
    /// is paid out minus tax.
    #[instrument(skip(self), fields(id = %self.id))]
    pub async fn end(&self, broadcast: bool) -> Result<(), AuctionOver> {
        self.terminal(|reply| Command::End {
            broadcast,
            reply,
        })
        .await
    }

    /// Cancels the auction: full refund to the top bidder, reward back to
    /// the owner.
    #[instrument(skip(self), fields(id = %self.id))]
    pub async fn cancel(&self) -> Result<(), AuctionOver> {
        self.terminal(|reply| Command::Cancel {
            reply,
        })
        .await
    }

    /// Administrative seizure: full refund to the top bidder, the reward
    /// is retained by the system and delivered to no one.
    #[instrument(skip(self), fields(id = %self.id))]
    pub async fn impound(&self) -> Result<(), AuctionOver> {
        self.terminal(|reply| Command::Impound {
            reply,
        })
        .await
    }

    async fn terminal<F>(&self, make: F) -> Result<(), AuctionOver>
    where
        F: FnOnce(oneshot::Sender<()>) -> Command,
    {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| AuctionOver)?;
        response.await.map_err(|_| AuctionOver)
    }
}

impl std::future::Future for Auction {
    type Output = (Id, Result<Summary, Error>);

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let res = match std::task::ready!(self.worker.poll_unpin(cx)) {
            Ok(res) => res,
            Err(source) => Err(Error::Panicked {
                source,
            }),
        };
        std::task::Poll::Ready((self.id, res))
    }
}
