//! Custodial gas top-ups. There is no escrow: the intermediary's status
//! endpoint is the only reconciliation source, and its latest valid status
//! wins. A reported payout is still checked against the ledger before the
//! swap is marked finished.

mod ln_for_gas;
mod onchain_for_gas;

pub use ln_for_gas::{LnForGas, LnForGasData, LnForGasState};
pub use onchain_for_gas::{OnchainForGas, OnchainForGasData, OnchainForGasState};

use super::SwapContext;
use crate::error::SwapError;
use crate::ledger::TxStatus;

/// What the ledger says about a payout the intermediary claims to have sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Payout {
    Settled,
    Reverted,
    InFlight,
}

pub(crate) async fn payout_status(ctx: &SwapContext, tx_id: &str) -> Result<Payout, SwapError> {
    let status = ctx
        .retry("payout status", || ctx.ledger.tx_status(tx_id))
        .await?;
    Ok(match status {
        TxStatus::Success => Payout::Settled,
        TxStatus::Reverted => Payout::Reverted,
        TxStatus::Pending | TxStatus::NotFound => Payout::InFlight,
    })
}
