//! Recording doubles for the collaborator traits, shared by the unit
//! tests across the crate.

use std::{
    collections::{
        HashMap,
        HashSet,
    },
    path::PathBuf,
    sync::{
        atomic::{
            AtomicBool,
            AtomicUsize,
            Ordering,
        },
        Arc,
        Mutex,
    },
};

use eyre::bail;
use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::Settings,
    context::{
        AuctionContext,
        AuctionSnapshot,
        Economy,
        ManagerHandle,
        MessageHandler,
        Notice,
        Player,
        Presence,
        Reward,
    },
    settlement::OfflineStore,
};

pub(crate) fn player(name: &str) -> Player {
    Player::new(Uuid::new_v4(), name)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum LedgerOp {
    Withdraw { player: Uuid, amount: u64 },
    Deposit { player: Uuid, amount: u64 },
}

/// An in-memory ledger recording every balance movement in order.
#[derive(Default)]
pub(crate) struct TestEconomy {
    balances: Mutex<HashMap<Uuid, u64>>,
    ledger: Mutex<Vec<LedgerOp>>,
}

impl TestEconomy {
    pub(crate) fn set_balance(&self, player: &Player, amount: u64) {
        self.balances.lock().unwrap().insert(player.id, amount);
    }

    pub(crate) fn balance_of(&self, player: &Player) -> u64 {
        *self.balances.lock().unwrap().get(&player.id).unwrap_or(&0)
    }

    pub(crate) fn ledger(&self) -> Vec<LedgerOp> {
        self.ledger.lock().unwrap().clone()
    }

    /// Withdrawals minus deposits: the amount currently held in escrow.
    pub(crate) fn escrowed(&self) -> i128 {
        self.ledger()
            .iter()
            .map(|op| match op {
                LedgerOp::Withdraw {
                    amount, ..
                } => i128::from(*amount),
                LedgerOp::Deposit {
                    amount, ..
                } => -i128::from(*amount),
            })
            .sum()
    }
}

impl Economy for TestEconomy {
    fn balance(&self, player: &Uuid) -> u64 {
        *self.balances.lock().unwrap().get(player).unwrap_or(&0)
    }

    fn withdraw(&self, player: &Uuid, amount: u64) -> eyre::Result<()> {
        let mut balances = self.balances.lock().unwrap();
        let balance = balances.entry(*player).or_insert(0);
        if *balance < amount {
            bail!("insufficient funds");
        }
        *balance -= amount;
        drop(balances);
        self.ledger.lock().unwrap().push(LedgerOp::Withdraw {
            player: *player,
            amount,
        });
        Ok(())
    }

    fn deposit(&self, player: &Uuid, amount: u64) -> eyre::Result<()> {
        *self.balances.lock().unwrap().entry(*player).or_insert(0) += amount;
        self.ledger.lock().unwrap().push(LedgerOp::Deposit {
            player: *player,
            amount,
        });
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum MessageEvent {
    Sent { recipient: Uuid, notice: Notice },
    Broadcast { notice: Notice },
}

#[derive(Default)]
pub(crate) struct TestMessages {
    events: Mutex<Vec<MessageEvent>>,
}

impl TestMessages {
    pub(crate) fn events(&self) -> Vec<MessageEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn broadcasts_of(&self, notice: Notice) -> usize {
        self.events()
            .iter()
            .filter(|event| {
                matches!(event, MessageEvent::Broadcast { notice: got } if *got == notice)
            })
            .count()
    }

    pub(crate) fn sent_to(&self, player: &Player) -> Vec<Notice> {
        self.events()
            .iter()
            .filter_map(|event| match event {
                MessageEvent::Sent {
                    recipient,
                    notice,
                } if *recipient == player.id => Some(*notice),
                _ => None,
            })
            .collect()
    }
}

impl MessageHandler for TestMessages {
    fn send(&self, recipient: &Player, notice: Notice, _auction: Option<&AuctionSnapshot>) {
        self.events.lock().unwrap().push(MessageEvent::Sent {
            recipient: recipient.id,
            notice,
        });
    }

    fn broadcast(&self, notice: Notice, _auction: &AuctionSnapshot) {
        self.events.lock().unwrap().push(MessageEvent::Broadcast {
            notice,
        });
    }
}

/// Everyone is offline unless marked online.
#[derive(Default)]
pub(crate) struct TestPresence {
    online: Mutex<HashSet<Uuid>>,
}

impl TestPresence {
    pub(crate) fn set_online(&self, player: &Player) {
        self.online.lock().unwrap().insert(player.id);
    }

    pub(crate) fn set_offline(&self, player: &Player) {
        self.online.lock().unwrap().remove(&player.id);
    }
}

impl Presence for TestPresence {
    fn is_online(&self, player: &Uuid) -> bool {
        self.online.lock().unwrap().contains(player)
    }
}

#[derive(Default)]
pub(crate) struct TestManager {
    can_start: AtomicBool,
    live: AtomicBool,
    cleared: AtomicUsize,
    next_started: AtomicUsize,
}

impl TestManager {
    pub(crate) fn can_start(&self) -> bool {
        self.can_start.load(Ordering::SeqCst)
    }

    pub(crate) fn cleared(&self) -> usize {
        self.cleared.load(Ordering::SeqCst)
    }

    pub(crate) fn next_started(&self) -> usize {
        self.next_started.load(Ordering::SeqCst)
    }
}

impl ManagerHandle for TestManager {
    fn clear_current_auction(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
        self.live.store(false, Ordering::SeqCst);
    }

    fn has_current_auction(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn set_can_start_new_auction(&self, can_start: bool) {
        self.can_start.store(can_start, Ordering::SeqCst);
    }

    fn start_next_auction(&self) {
        self.next_started.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) struct TestReward {
    label: String,
    deliveries: Arc<Mutex<Vec<Uuid>>>,
}

impl TestReward {
    pub(crate) fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            deliveries: Arc::default(),
        }
    }

    /// Handle that outlives the reward once it moves into an auction.
    pub(crate) fn deliveries_handle(&self) -> Arc<Mutex<Vec<Uuid>>> {
        self.deliveries.clone()
    }
}

impl Reward for TestReward {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn deliver(&self, recipient: &Player) -> eyre::Result<()> {
        self.deliveries.lock().unwrap().push(recipient.id);
        Ok(())
    }

    fn to_payload(&self) -> eyre::Result<serde_json::Value> {
        Ok(json!({ "label": self.label }))
    }
}

/// A full [`AuctionContext`] wired to recording doubles, with handles to
/// each so tests can inspect what the auction did.
pub(crate) struct Fixture {
    pub(crate) ctx: AuctionContext,
    pub(crate) economy: Arc<TestEconomy>,
    pub(crate) messages: Arc<TestMessages>,
    pub(crate) presence: Arc<TestPresence>,
    pub(crate) manager: Arc<TestManager>,
    pub(crate) settings: watch::Sender<Settings>,
    pub(crate) shutdown: CancellationToken,
    store_dir: tempfile::TempDir,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        let economy = Arc::new(TestEconomy::default());
        let messages = Arc::new(TestMessages::default());
        let presence = Arc::new(TestPresence::default());
        let manager = Arc::new(TestManager::default());
        let store_dir = tempfile::tempdir().expect("must be able to create a temp dir");
        let store = OfflineStore::load(store_dir.path().join("offline-rewards.json"))
            .expect("a fresh store must load");
        let (settings, settings_rx) = watch::channel(Settings::default());
        let shutdown = CancellationToken::new();

        let ctx = AuctionContext {
            economy: economy.clone(),
            messages: messages.clone(),
            presence: presence.clone(),
            manager: manager.clone(),
            offline_store: Arc::new(Mutex::new(store)),
            settings: settings_rx,
            shutdown_token: shutdown.clone(),
        };

        Self {
            ctx,
            economy,
            messages,
            presence,
            manager,
            settings,
            shutdown,
            store_dir,
        }
    }

    pub(crate) fn store_path(&self) -> PathBuf {
        self.store_dir.path().join("offline-rewards.json")
    }
}
