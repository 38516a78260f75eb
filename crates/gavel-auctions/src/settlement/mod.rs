//! Offline settlement: durable fallback for rewards whose recipient was
//! unreachable, plus the reconnect reconciliation helper.

mod store;

use eyre::WrapErr as _;
pub use store::{
    OfflineStore,
    StoredReward,
};

use crate::context::Player;

/// Hands a stored reward back to a reconnected recipient.
///
/// Returns `Ok(true)` if an entry existed and was delivered (the entry is
/// removed from the store before `deliver` runs, so a crash can lose a
/// delivery but never duplicate one). If `deliver` fails, the entry is
/// restored and the error is surfaced so the host can retry on the next
/// reconnect.
pub fn redeem_on_reconnect<F>(
    store: &mut OfflineStore,
    recipient: &Player,
    deliver: F,
) -> eyre::Result<bool>
where
    F: FnOnce(&StoredReward) -> eyre::Result<()>,
{
    let Some(entry) = store
        .claim(&recipient.id)
        .wrap_err("failed claiming stored reward")?
    else {
        return Ok(false);
    };
    if let Err(err) = deliver(&entry) {
        store
            .put(recipient.id, entry)
            .wrap_err("failed restoring an undelivered reward to the store")?;
        return Err(err.wrap_err("failed delivering a stored reward"));
    }
    Ok(true)
}
