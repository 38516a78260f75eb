//! Contracts of the collaborators the auction core calls into, and the
//! [`AuctionContext`] that bundles them.
//!
//! The host runtime owns the real implementations (its currency ledger, its
//! chat/notification pipeline, its player roster, the manager's
//! current-slot/queue bookkeeping). The core only ever talks to these traits,
//! so every collaborator is mockable and nothing in here is a process-wide
//! singleton.

use std::{
    fmt,
    sync::{
        Arc,
        Mutex,
    },
};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::Settings,
    settlement::OfflineStore,
};

/// A user identity paired with the display name it carried when captured.
///
/// The name is a snapshot: it is taken when the player enters the auction
/// (as owner or bidder) and is not refreshed afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Player {
    pub id: Uuid,
    pub name: String,
}

impl Player {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// The auction category tag. Only affects how the host formats notices;
/// the lifecycle is identical for all kinds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Kind {
    #[default]
    Standard,
    /// Bidder identities are withheld from broadcasts by the host.
    Sealed,
}

/// A point-in-time view of a running auction, handed to message formatting
/// and to bid observers.
#[derive(Clone, Debug)]
pub struct AuctionSnapshot {
    pub kind: Kind,
    pub owner: Player,
    pub top_bidder: Option<Player>,
    pub top_bid: u64,
    pub bid_increment: u64,
    pub time_left_secs: u64,
    pub reward_description: String,
}

/// The message templates the core emits. The host's message handler owns
/// the actual wording and formatting; the core only selects the template
/// and provides the auction snapshot as context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notice {
    // bid rejections
    BidTooLow,
    InsufficientBalance,
    AlreadyTopBidder,
    // lifecycle broadcasts
    AuctionStart,
    StartingPrice,
    BidIncrement,
    NewBid,
    TimerUpdate,
    TimeExtended,
    Cancelled,
    Ended,
    EndedNoBids,
    // settlement messages to individuals
    Winner,
    TaxDeducted,
    OwnerPayout,
    RewardReturned,
}

/// The host's currency ledger. Calls are synchronous and authoritative;
/// the core keeps no double-entry bookkeeping of its own.
pub trait Economy: Send + Sync {
    fn balance(&self, player: &Uuid) -> u64;
    fn withdraw(&self, player: &Uuid, amount: u64) -> eyre::Result<()>;
    fn deposit(&self, player: &Uuid, amount: u64) -> eyre::Result<()>;
}

/// Formats and delivers notices to one player or to everyone.
pub trait MessageHandler: Send + Sync {
    fn send(&self, recipient: &Player, notice: Notice, auction: Option<&AuctionSnapshot>);
    fn broadcast(&self, notice: Notice, auction: &AuctionSnapshot);
}

/// The payload being sold. Owned exclusively by the auction until
/// settlement transfers it exactly once.
pub trait Reward: Send {
    /// Short human-readable description, used in snapshots and the
    /// offline store.
    fn describe(&self) -> String;

    /// Hands the payload to the recipient. Only called while the recipient
    /// is reachable; failures push settlement onto the offline path.
    fn deliver(&self, recipient: &Player) -> eyre::Result<()>;

    /// Serializes the payload for the offline settlement store.
    fn to_payload(&self) -> eyre::Result<serde_json::Value>;
}

/// Answers whether a player is currently reachable for deliveries and
/// direct messages.
pub trait Presence: Send + Sync {
    fn is_online(&self, player: &Uuid) -> bool;
}

/// The callback surface of the auction manager. The core notifies the
/// manager at lifecycle boundaries but never touches the current-auction
/// slot or the pending queue itself.
pub trait ManagerHandle: Send + Sync {
    fn clear_current_auction(&self);
    fn has_current_auction(&self) -> bool;
    fn set_can_start_new_auction(&self, can_start: bool);
    fn start_next_auction(&self);
}

/// Everything an auction needs from its environment, captured at
/// construction time.
#[derive(Clone)]
pub struct AuctionContext {
    pub economy: Arc<dyn Economy>,
    pub messages: Arc<dyn MessageHandler>,
    pub presence: Arc<dyn Presence>,
    pub manager: Arc<dyn ManagerHandle>,
    pub offline_store: Arc<Mutex<OfflineStore>>,
    /// Live auction settings. Settlement reads the tax rate from here at
    /// the moment it runs, not from a value frozen at creation.
    pub settings: watch::Receiver<Settings>,
    pub shutdown_token: CancellationToken,
}

impl AuctionContext {
    pub(crate) fn settings(&self) -> Settings {
        self.settings.borrow().clone()
    }
}
