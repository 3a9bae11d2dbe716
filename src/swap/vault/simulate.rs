use bitcoin::{OutPoint, Transaction};

use crate::btc::psbt::decode_withdrawal_data;
use crate::error::SwapError;
use crate::swap::SwapContext;

/// Upper bound on the chain of unconfirmed withdrawals followed from the
/// last confirmed vault UTXO.
pub const MAX_PENDING_WITHDRAWALS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedVault {
    /// Vault UTXO after every pending withdrawal.
    pub utxo: OutPoint,
    pub balances: [u64; 2],
    pub pending: usize,
}

/// Applies `pending` withdrawals, in spend order, to the last confirmed
/// vault state.
pub fn simulate_withdrawals(
    utxo: OutPoint,
    balances: [u64; 2],
    pending: &[Transaction],
) -> Result<SimulatedVault, String> {
    let mut state = SimulatedVault {
        utxo,
        balances,
        pending: 0,
    };

    for tx in pending {
        let txid = tx.compute_txid();
        let spends_vault = tx
            .input
            .first()
            .is_some_and(|input| input.previous_output == state.utxo);
        if !spends_vault {
            return Err(format!(
                "withdrawal {txid} does not spend vault utxo {}",
                state.utxo
            ));
        }
        let data = tx
            .output
            .get(1)
            .and_then(|out| decode_withdrawal_data(&out.script_pubkey))
            .ok_or_else(|| format!("transaction {txid} is not a vault withdrawal"))?;

        for (balance, amount) in state.balances.iter_mut().zip(data.raw_amounts) {
            *balance = balance.checked_sub(amount).ok_or_else(|| {
                format!("pending withdrawal {txid} overdraws the vault by {amount}")
            })?;
        }
        state.utxo = OutPoint { txid, vout: 0 };
        state.pending += 1;
    }
    Ok(state)
}

/// Follows the spends of the vault UTXO from `confirmed` onwards.
pub async fn pending_withdrawals(
    ctx: &SwapContext,
    confirmed: OutPoint,
) -> Result<Vec<Transaction>, SwapError> {
    let mut pending = Vec::new();
    let mut utxo = confirmed;
    while let Some(spend) = ctx
        .retry("vault spend", || ctx.bitcoin.spending_transaction(&utxo))
        .await?
    {
        if pending.len() == MAX_PENDING_WITHDRAWALS {
            return Err(SwapError::transient(format!(
                "more than {MAX_PENDING_WITHDRAWALS} unconfirmed withdrawals after {confirmed}"
            )));
        }
        utxo = OutPoint {
            txid: spend.txid(),
            vout: 0,
        };
        pending.push(spend.tx);
    }
    Ok(pending)
}
