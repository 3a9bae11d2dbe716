//! Swap families settled through a hash-locked escrow on the smart chain.

mod from_btc;
mod from_btcln;
mod to_btc;

pub use from_btc::{FromBtc, FromBtcData, FromBtcState};
pub use from_btcln::{FromBtcLn, FromBtcLnData, FromBtcLnState};
pub use to_btc::{
    LightningPayout, OnChainPayout, Payout, ToBtc, ToBtcData, ToBtcLnSwap, ToBtcState, ToBtcSwap,
};

use super::SwapContext;
use crate::error::SwapError;
use crate::ledger::{CommitStatus, EscrowData, LedgerEvent, SignatureData};

/// Fails with an integrity error blaming `url` unless `ok`.
pub(crate) fn ensure_quote(ok: bool, url: &str, what: impl FnOnce() -> String) -> Result<(), SwapError> {
    if ok {
        Ok(())
    } else {
        Err(SwapError::integrity(Some(url), format!("quote {}", what())))
    }
}

/// Verifies the counterparty's signature over `escrow` and that it has not
/// already been consumed by an on-chain commit for the same hash.
pub(crate) async fn verify_authorization(
    ctx: &SwapContext,
    escrow: &EscrowData,
    signature: &SignatureData,
    url: &str,
) -> Result<(), SwapError> {
    ctx.retry("verify init authorization", || {
        ctx.ledger.verify_init_authorization(escrow, signature)
    })
    .await
    .map_err(|err| err.blame(url))?;

    if signature.timeout <= ctx.clock.now_secs() {
        return Err(SwapError::integrity(
            Some(url),
            format!("authorization already timed out at {}", signature.timeout),
        ));
    }

    match ctx
        .retry("commit status", || ctx.ledger.commit_status(escrow))
        .await?
    {
        CommitStatus::NotCommitted { .. } => Ok(()),
        other => Err(SwapError::integrity(
            Some(url),
            format!(
                "authorization for claim hash {} replays an existing escrow ({other:?})",
                escrow.claim_hash
            ),
        )),
    }
}

pub(crate) async fn commit_status(
    ctx: &SwapContext,
    escrow: &EscrowData,
) -> Result<CommitStatus, SwapError> {
    ctx.retry("commit status", || ctx.ledger.commit_status(escrow))
        .await
}

/// Whether the authorization stored with a swap can no longer be used to
/// commit. A swap without one is treated as expired.
pub(crate) async fn authorization_expired(
    ctx: &SwapContext,
    escrow: &EscrowData,
    signature: Option<&SignatureData>,
) -> Result<bool, SwapError> {
    match signature {
        Some(signature) => {
            ctx.retry("authorization expiry", || {
                ctx.ledger.is_authorization_expired(escrow, signature)
            })
            .await
        }
        None => Ok(true),
    }
}

pub(crate) fn matches_escrow(escrow: &EscrowData, event: &LedgerEvent) -> bool {
    event
        .escrow_key()
        .is_some_and(|(hash, sequence)| hash == escrow.claim_hash && sequence == escrow.sequence)
}
