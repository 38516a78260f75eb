//! The task that owns a running auction.
//!
//! The worker advances through the auction lifecycle inside a single
//! `select!` loop: a one second ticker drives the countdown, and the
//! command channel carries bids and terminal transitions. Because the loop
//! is the only place auction state is touched, a bid's refund-then-escrow
//! sequence can never interleave with a tick or a cancellation.
//!
//! A terminal transition breaks the loop; settlement then runs to
//! completion (refunds, reward hand-over or offline fallback, payout and
//! tax, manager notification, cooldown scheduling) before the worker
//! returns its [`Summary`]. Commands that arrive after the loop broke are
//! answered with a termination error by virtue of the dropped channel.

use std::{
    sync::PoisonError,
    time::Duration,
};

use tokio::{
    select,
    sync::{
        mpsc,
        watch,
    },
    time::{
        interval_at,
        Instant,
        MissedTickBehavior,
    },
};
use tracing::{
    debug,
    error,
    info,
    instrument,
    warn,
};

use super::{
    observers::{
        BidObserver,
        Effect,
    },
    BidError,
    Command,
    Error,
    Id,
    Summary,
};
use crate::{
    context::{
        AuctionContext,
        AuctionSnapshot,
        Kind,
        Notice,
        Player,
        Reward,
    },
    settlement::StoredReward,
};

const TICK: Duration = Duration::from_secs(1);

/// Which terminal transition broke the auction loop.
enum Terminal {
    End { broadcast: bool },
    Cancel,
    Impound,
}

pub(super) struct Worker {
    pub(super) id: Id,
    pub(super) ctx: AuctionContext,
    pub(super) kind: Kind,
    pub(super) owner: Player,
    /// Held until settlement transfers ownership exactly once.
    pub(super) reward: Option<Box<dyn Reward>>,
    pub(super) reward_description: String,
    pub(super) top_bidder: Option<Player>,
    pub(super) winning_bid: u64,
    pub(super) bid_increment: u64,
    pub(super) autowin: Option<u64>,
    pub(super) time_left: u64,
    pub(super) observers: Vec<Box<dyn BidObserver>>,
    pub(super) commands: mpsc::Receiver<Command>,
    pub(super) snapshot: watch::Sender<AuctionSnapshot>,
}

impl Worker {
    #[instrument(skip_all, fields(id = %self.id))]
    pub(super) async fn run(mut self) -> Result<Summary, Error> {
        self.broadcast_start();

        let mut ticker = interval_at(Instant::now() + TICK, TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let terminal = loop {
            select! {
                biased;

                () = self.ctx.shutdown_token.clone().cancelled_owned() => {
                    info!("received shutdown signal; ending the auction");
                    break Terminal::End { broadcast: true };
                }

                _ = ticker.tick() => {
                    if let Some(terminal) = self.tick() {
                        break terminal;
                    }
                }

                command = self.commands.recv() => {
                    match command {
                        Some(command) => {
                            if let Some(terminal) = self.handle_command(command) {
                                break terminal;
                            }
                        }
                        None => {
                            warn!("all command handles were dropped; cancelling the auction");
                            break Terminal::Cancel;
                        }
                    }
                }
            }
        };

        self.settle(terminal)
    }

    /// One second of countdown. Returns the terminal transition once the
    /// countdown is exhausted.
    fn tick(&mut self) -> Option<Terminal> {
        self.time_left = self.time_left.saturating_sub(1);
        if self.time_left == 0 {
            info!("countdown reached zero");
            return Some(Terminal::End {
                broadcast: true,
            });
        }
        let at_broadcast_mark = self
            .ctx
            .settings
            .borrow()
            .broadcast_times_secs
            .contains(&self.time_left);
        if at_broadcast_mark {
            self.ctx
                .messages
                .broadcast(Notice::TimerUpdate, &self.make_snapshot());
        }
        self.publish_snapshot();
        None
    }

    fn handle_command(&mut self, command: Command) -> Option<Terminal> {
        match command {
            Command::PlaceBid {
                bidder,
                amount,
                reply,
            } => match self.admit_bid(bidder, amount) {
                Ok(autowin_met) => {
                    let _ = reply.send(Ok(()));
                    autowin_met.then(|| {
                        info!("autowin threshold met; ending the auction");
                        Terminal::End {
                            broadcast: true,
                        }
                    })
                }
                Err(rejection) => {
                    let _ = reply.send(Err(rejection));
                    None
                }
            },
            Command::End {
                broadcast,
                reply,
            } => {
                let _ = reply.send(());
                Some(Terminal::End {
                    broadcast,
                })
            }
            Command::Cancel {
                reply,
            } => {
                let _ = reply.send(());
                Some(Terminal::Cancel)
            }
            Command::Impound {
                reply,
            } => {
                let _ = reply.send(());
                Some(Terminal::Impound)
            }
        }
    }

    /// Validates and, if admitted, escrows a bid. Returns whether the bid
    /// met the autowin threshold.
    #[instrument(skip(self), fields(id = %self.id, bidder = %bidder, amount))]
    fn admit_bid(&mut self, bidder: Player, amount: u64) -> Result<bool, BidError> {
        let minimum = self.winning_bid.saturating_add(self.bid_increment);
        if amount < minimum {
            debug!(minimum, "rejecting bid: too low");
            self.ctx.messages.send(&bidder, Notice::BidTooLow, None);
            return Err(BidError::TooLow {
                minimum,
            });
        }
        if self.ctx.economy.balance(&bidder.id) < amount {
            debug!("rejecting bid: insufficient balance");
            self.ctx
                .messages
                .send(&bidder, Notice::InsufficientBalance, None);
            return Err(BidError::InsufficientBalance);
        }
        if self
            .top_bidder
            .as_ref()
            .is_some_and(|top| top.id == bidder.id)
        {
            debug!("rejecting bid: bidder already holds the top bid");
            self.ctx
                .messages
                .send(&bidder, Notice::AlreadyTopBidder, None);
            return Err(BidError::AlreadyTopBidder);
        }

        // Escrow. Withdraw the new bidder first so an admitted bid is
        // always backed by payment, then release the superseded bidder's
        // funds. Neither state update happens unless both legs succeeded.
        if let Err(err) = self.ctx.economy.withdraw(&bidder.id, amount) {
            warn!(%err, "rejecting bid: withdrawal failed");
            self.ctx
                .messages
                .send(&bidder, Notice::InsufficientBalance, None);
            return Err(BidError::EscrowFailed);
        }
        if let Some(previous) = self.top_bidder.clone() {
            if let Err(err) = self.ctx.economy.deposit(&previous.id, self.winning_bid) {
                error!(
                    %err,
                    previous_bidder = %previous,
                    "failed refunding the superseded bidder; rolling the bid back",
                );
                if let Err(err) = self.ctx.economy.deposit(&bidder.id, amount) {
                    error!(%err, bidder = %bidder, "failed rolling back the withdrawal; escrow is out of balance");
                }
                return Err(BidError::EscrowFailed);
            }
        }

        self.winning_bid = amount;
        self.top_bidder = Some(bidder);
        self.publish_snapshot();
        info!(top_bid = self.winning_bid, "accepted a new top bid");
        self.ctx
            .messages
            .broadcast(Notice::NewBid, &self.make_snapshot());
        self.run_observers();

        Ok(self.autowin.is_some_and(|threshold| amount >= threshold))
    }

    fn run_observers(&mut self) {
        let snapshot = self.make_snapshot();
        let mut observers = std::mem::take(&mut self.observers);
        for observer in &mut observers {
            if !observer.can_trigger(&snapshot) {
                continue;
            }
            match observer.trigger(&snapshot) {
                Some(Effect::ExtendCountdown {
                    secs,
                }) => {
                    self.time_left = self.time_left.saturating_add(secs);
                    info!(
                        extension_secs = secs,
                        time_left = self.time_left,
                        "observer extended the countdown",
                    );
                    self.ctx
                        .messages
                        .broadcast(Notice::TimeExtended, &self.make_snapshot());
                }
                None => {}
            }
        }
        self.observers = observers;
        self.publish_snapshot();
    }

    fn settle(mut self, terminal: Terminal) -> Result<Summary, Error> {
        let result = match terminal {
            Terminal::End {
                broadcast,
            } => self.settle_end(broadcast),
            Terminal::Cancel => self.settle_cancel(),
            Terminal::Impound => self.settle_impound(),
        };
        self.ctx.manager.clear_current_auction();
        self.schedule_cooldown();
        match &result {
            Ok(summary) => info!(%summary, "auction settled"),
            Err(err) => error!(%err, "auction settlement failed"),
        }
        result
    }

    fn settle_end(&mut self, broadcast: bool) -> Result<Summary, Error> {
        let reward = self
            .reward
            .take()
            .expect("the reward is held until settlement");
        match self.top_bidder.clone() {
            Some(winner) => {
                self.hand_over(reward, &winner, Notice::Winner)?;
                if self.winning_bid > 0 {
                    let tax = tax_amount(self.winning_bid, self.ctx.settings().tax_percent);
                    let payout = self.winning_bid - tax;
                    if let Err(err) = self.ctx.economy.deposit(&self.owner.id, payout) {
                        error!(%err, payout, "failed paying out the owner");
                    } else {
                        info!(payout, tax, "paid out the owner");
                    }
                    if self.ctx.presence.is_online(&self.owner.id) {
                        let snapshot = self.make_snapshot();
                        if tax > 0 {
                            self.ctx
                                .messages
                                .send(&self.owner, Notice::TaxDeducted, Some(&snapshot));
                        }
                        self.ctx
                            .messages
                            .send(&self.owner, Notice::OwnerPayout, Some(&snapshot));
                    }
                }
                if broadcast {
                    self.ctx
                        .messages
                        .broadcast(Notice::Ended, &self.make_snapshot());
                }
                Ok(Summary::Ended {
                    winner: Some(winner),
                    hammer_price: self.winning_bid,
                })
            }
            None => {
                let owner = self.owner.clone();
                self.hand_over(reward, &owner, Notice::RewardReturned)?;
                if broadcast {
                    self.ctx
                        .messages
                        .broadcast(Notice::EndedNoBids, &self.make_snapshot());
                }
                Ok(Summary::Ended {
                    winner: None,
                    hammer_price: 0,
                })
            }
        }
    }

    fn settle_cancel(&mut self) -> Result<Summary, Error> {
        self.refund_top_bidder();
        let reward = self
            .reward
            .take()
            .expect("the reward is held until settlement");
        let owner = self.owner.clone();
        self.hand_over(reward, &owner, Notice::RewardReturned)?;
        self.ctx
            .messages
            .broadcast(Notice::Cancelled, &self.make_snapshot());
        Ok(Summary::Cancelled)
    }

    fn settle_impound(&mut self) -> Result<Summary, Error> {
        self.refund_top_bidder();
        // The reward is deliberately delivered to no one.
        let reward = self
            .reward
            .take()
            .expect("the reward is held until settlement");
        drop(reward);
        info!("impounded the reward");
        Ok(Summary::Impounded)
    }

    fn refund_top_bidder(&self) {
        let Some(top_bidder) = self.top_bidder.as_ref() else {
            return;
        };
        if let Err(err) = self.ctx.economy.deposit(&top_bidder.id, self.winning_bid) {
            error!(
                %err,
                bidder = %top_bidder,
                amount = self.winning_bid,
                "failed refunding the top bidder",
            );
        } else {
            info!(
                bidder = %top_bidder,
                amount = self.winning_bid,
                "refunded the top bidder",
            );
        }
    }

    /// Transfers the reward to `recipient`, falling back to the offline
    /// settlement store when the recipient is unreachable. The store write
    /// must be confirmed before the hand-over counts as settled.
    fn hand_over(
        &self,
        reward: Box<dyn Reward>,
        recipient: &Player,
        notice: Notice,
    ) -> Result<(), Error> {
        if self.ctx.presence.is_online(&recipient.id) {
            match reward.deliver(recipient) {
                Ok(()) => {
                    self.ctx
                        .messages
                        .send(recipient, notice, Some(&self.make_snapshot()));
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        %err,
                        recipient = %recipient,
                        "direct delivery failed; falling back to the offline store",
                    );
                }
            }
        } else {
            info!(
                recipient = %recipient,
                "recipient is unreachable; storing the reward for later retrieval",
            );
        }
        let payload = reward.to_payload().map_err(|source| Error::Settlement {
            source,
        })?;
        let stored = StoredReward {
            description: reward.describe(),
            payload,
        };
        self.ctx
            .offline_store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(recipient.id, stored)
            .map_err(|source| Error::Settlement {
                source,
            })
    }

    /// After the configured delay, reopens the gate for new auctions and
    /// promotes the next queued auction if no auction went live in the
    /// meantime. Skipped during process shutdown.
    fn schedule_cooldown(&self) {
        if self.ctx.shutdown_token.is_cancelled() {
            debug!("process is shutting down; skipping the cooldown for the next auction");
            return;
        }
        let delay = Duration::from_secs(self.ctx.settings().delay_between_secs);
        info!(
            delay = %humantime::format_duration(delay),
            "scheduling the cooldown before the next auction may start",
        );
        let manager = self.ctx.manager.clone();
        let shutdown_token = self.ctx.shutdown_token.clone();
        tokio::spawn(async move {
            select! {
                () = shutdown_token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    manager.set_can_start_new_auction(true);
                    if !manager.has_current_auction() {
                        manager.start_next_auction();
                    }
                }
            }
        });
    }

    fn broadcast_start(&self) {
        let snapshot = self.make_snapshot();
        self.ctx.messages.broadcast(Notice::AuctionStart, &snapshot);
        self.ctx.messages.broadcast(Notice::StartingPrice, &snapshot);
        self.ctx.messages.broadcast(Notice::BidIncrement, &snapshot);
    }

    fn make_snapshot(&self) -> AuctionSnapshot {
        AuctionSnapshot {
            kind: self.kind,
            owner: self.owner.clone(),
            top_bidder: self.top_bidder.clone(),
            top_bid: self.winning_bid,
            bid_increment: self.bid_increment,
            time_left_secs: self.time_left,
            reward_description: self.reward_description.clone(),
        }
    }

    fn publish_snapshot(&self) {
        self.snapshot.send_replace(self.make_snapshot());
    }
}

fn tax_amount(top_bid: u64, tax_percent: u64) -> u64 {
    let capped_percent = tax_percent.min(100);
    u64::try_from(u128::from(top_bid) * u128::from(capped_percent) / 100)
        .expect("tax is bounded by the top bid")
}
