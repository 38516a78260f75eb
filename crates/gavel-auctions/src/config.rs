//! Environment-driven configuration and the live [`Settings`] shared with
//! running auctions.

use std::collections::BTreeSet;

use eyre::{
    ensure,
    WrapErr as _,
};
use serde::{
    de::DeserializeOwned,
    Deserialize,
    Serialize,
};

/// Reads a config struct from prefixed environment variables.
pub trait FromEnv: Serialize + DeserializeOwned {
    const PREFIX: &'static str;

    fn from_env() -> Result<Self, figment::Error> {
        use figment::{
            providers::Env,
            Figment,
        };
        Figment::new()
            .merge(Env::prefixed("RUST_").split("_").only(&["log"]))
            .merge(Env::prefixed(Self::PREFIX))
            .extract()
    }
}

/// The single config for creating the auction service.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Log level for the service.
    pub log: String,
    /// File backing the offline settlement store.
    pub offline_store_path: String,
    /// Seconds between a terminal transition and the next auction being
    /// allowed to start.
    pub delay_between_secs: u64,
    /// Percentage (0-100) deducted from the owner's payout at settlement.
    pub tax_percent: u64,
    /// Minimum delta a new bid must exceed the top bid by, when the
    /// builder leaves it unset.
    pub default_bid_increment: u64,
    /// Countdown length for auctions that don't specify one.
    pub start_time_secs: u64,
    /// Comma-separated countdown marks (in seconds left) at which a timer
    /// update is broadcast.
    pub broadcast_times_secs: String,
    /// Whether the anti-snipe observer is attached to new auctions.
    pub anti_snipe_enabled: bool,
    /// Bids landing with this much (or less) time left trigger anti-snipe.
    pub anti_snipe_threshold_secs: u64,
    /// Seconds added to the countdown per anti-snipe trigger.
    pub anti_snipe_extension_secs: u64,
    /// Upper bound on anti-snipe triggers within one auction.
    pub anti_snipe_max_per_auction: u32,
}

impl FromEnv for Config {
    const PREFIX: &'static str = "GAVEL_AUCTIONS_";
}

impl Config {
    /// Converts the raw config into the initial [`Settings`] published on
    /// the settings channel.
    pub fn initial_settings(&self) -> eyre::Result<Settings> {
        ensure!(
            self.tax_percent <= 100,
            "tax percent must be within 0..=100, got {}",
            self.tax_percent,
        );
        let mut broadcast_times_secs = BTreeSet::new();
        for entry in self.broadcast_times_secs.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let secs = entry
                .parse::<u64>()
                .wrap_err_with(|| format!("failed parsing broadcast time `{entry}`"))?;
            broadcast_times_secs.insert(secs);
        }
        Ok(Settings {
            delay_between_secs: self.delay_between_secs,
            tax_percent: self.tax_percent,
            default_bid_increment: self.default_bid_increment,
            start_time_secs: self.start_time_secs,
            broadcast_times_secs,
        })
    }

    /// The anti-snipe observer to attach to new auctions, if enabled.
    pub fn anti_snipe(&self) -> Option<crate::auction::AntiSnipe> {
        self.anti_snipe_enabled.then(|| {
            crate::auction::AntiSnipe::new(
                self.anti_snipe_threshold_secs,
                self.anti_snipe_extension_secs,
                self.anti_snipe_max_per_auction,
            )
        })
    }
}

/// Auction settings that may change while auctions are live. Distributed
/// over a `tokio::sync::watch` channel; the tax rate and the cooldown are
/// read fresh at the moment they are applied.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Settings {
    pub delay_between_secs: u64,
    pub tax_percent: u64,
    pub default_bid_increment: u64,
    pub start_time_secs: u64,
    pub broadcast_times_secs: BTreeSet<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            delay_between_secs: 5,
            tax_percent: 0,
            default_bid_increment: 50,
            start_time_secs: 30,
            broadcast_times_secs: [45, 30, 15, 10, 5, 4, 3, 2, 1].into_iter().collect(),
        }
    }
}
