//! Bitcoin-native receive path through a shared SPV vault UTXO.
//!
//! The user builds a withdrawal spending the vault, signs only their own
//! funding inputs and hands the PSBT to the intermediary, which finalizes
//! the vault input and broadcasts. The smart-chain side pays out once the
//! withdrawal is proven, or earlier if a watchtower fronts it.

pub mod simulate;

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{Amount, OutPoint, Psbt, Script, Transaction, TxOut, Txid};
use serde::{Deserialize, Serialize};

use self::simulate::{pending_withdrawals, simulate_withdrawals};
use crate::btc::psbt::{
    FundingInput, WithdrawalData, WithdrawalPlan, build_withdrawal_psbt, check_signatures,
    psbt_from_hex, psbt_to_hex, validate_withdrawal_psbt,
};
use crate::btc::{parse_address, parse_outpoint, require_witness_script};
use crate::cancel::Cancellation;
use crate::error::SwapError;
use crate::intermediary::SpvVaultQuoteRequest;
use crate::ledger::{LedgerEvent, WithdrawalState};
use crate::swap::escrow::ensure_quote;
use crate::swap::record::swap_id;
use crate::swap::state::swap_states;
use crate::swap::{
    Candidate, Evidence, PricingInfo, SwapContext, SwapFamily, SwapHandle, SwapRecord, SwapState,
    SwapType, WaitOrdering,
};
use crate::wrapper::SwapWrapper;

swap_states! {
    pub enum SpvFromBtcState {
        Closed = -5 => "CLOSED",
        Failed = -4 => "FAILED",
        Declined = -3 => "DECLINED",
        QuoteExpired = -2 => "QUOTE_EXPIRED",
        QuoteSoftExpired = -1 => "QUOTE_SOFT_EXPIRED",
        Created = 0 => "CREATED",
        Signed = 1 => "SIGNED",
        Posted = 2 => "POSTED",
        Broadcasted = 3 => "BROADCASTED",
        Fronted = 4 => "FRONTED",
        BtcTxConfirmed = 5 => "BTC_TX_CONFIRMED",
        Claimed = 6 => "CLAIMED",
    }
}

impl SwapState for SpvFromBtcState {
    const ALL: &'static [Self] = Self::VARIANTS;

    fn code(self) -> i32 {
        self as i32
    }

    fn label(self) -> &'static str {
        self.as_str()
    }

    fn next_states(self) -> &'static [Self] {
        match self {
            Self::Created => &[Self::Signed, Self::QuoteSoftExpired, Self::QuoteExpired],
            Self::Signed => &[
                Self::Posted,
                Self::Broadcasted,
                Self::Declined,
                Self::QuoteSoftExpired,
                Self::QuoteExpired,
            ],
            Self::QuoteSoftExpired => &[Self::QuoteExpired, Self::Posted, Self::Broadcasted],
            Self::Posted => &[Self::Broadcasted, Self::QuoteExpired, Self::Declined],
            Self::Broadcasted => &[
                Self::Fronted,
                Self::BtcTxConfirmed,
                Self::Claimed,
                Self::Failed,
                Self::Closed,
            ],
            Self::BtcTxConfirmed => &[Self::Fronted, Self::Claimed, Self::Closed],
            Self::Fronted => &[Self::Claimed],
            Self::Closed
            | Self::Failed
            | Self::Declined
            | Self::QuoteExpired
            | Self::Claimed => &[],
        }
    }

    fn is_successful(self) -> bool {
        matches!(self, Self::Fronted | Self::Claimed)
    }

    fn is_failed(self) -> bool {
        matches!(self, Self::Failed | Self::Declined | Self::Closed)
    }

    fn is_quote_expired(self) -> bool {
        self == Self::QuoteExpired
    }

    fn is_quote_soft_expired(self) -> bool {
        self == Self::QuoteSoftExpired
    }

    fn is_claimable(self) -> bool {
        self == Self::BtcTxConfirmed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpvFromBtcData {
    pub quote_id: String,
    pub vault_owner: String,
    pub vault_id: u64,
    /// Vault UTXO the withdrawal spends, `txid:vout`.
    pub vault_utxo: String,
    pub vault_btc_address: String,
    pub vault_value_sats: u64,
    /// Intermediary's Bitcoin address paid by the withdrawal.
    pub btc_address: String,
    pub recipient: String,
    pub token: String,
    pub amount_sats: u64,
    pub token_amount: u64,
    pub gas_amount: u64,
    /// `token_amount` and `gas_amount` divided by the vault multipliers.
    pub raw_amounts: [u64; 2],
    pub min_fee_rate: u64,
    pub required_confirmations: u32,
    pub psbt: Option<String>,
    pub btc_tx_id: Option<String>,
    pub btc_confirmations: u32,
    pub fronter: Option<String>,
    pub front_tx_id: Option<String>,
}

impl SpvFromBtcData {
    fn plan(&self, ctx: &SwapContext) -> Result<WithdrawalPlan, SwapError> {
        let vault_script = parse_address(&self.vault_btc_address, ctx.config.network, None)?
            .script_pubkey();
        let btc_script =
            parse_address(&self.btc_address, ctx.config.network, None)?.script_pubkey();
        Ok(WithdrawalPlan {
            vault_utxo: parse_outpoint(&self.vault_utxo, None)?,
            vault_prevout: TxOut {
                value: Amount::from_sat(self.vault_value_sats),
                script_pubkey: vault_script,
            },
            data: WithdrawalData {
                recipient: self.recipient.clone(),
                raw_amounts: self.raw_amounts,
            },
            btc_script,
            amount_sats: self.amount_sats,
        })
    }

    fn btc_txid(&self) -> Result<Option<Txid>, SwapError> {
        self.btc_tx_id
            .as_deref()
            .map(|raw| {
                raw.parse::<Txid>()
                    .map_err(|e| SwapError::storage(anyhow::anyhow!("stored txid {raw}: {e}")))
            })
            .transpose()
    }
}

pub struct SpvFromBtc;

#[async_trait]
impl SwapFamily for SpvFromBtc {
    type State = SpvFromBtcState;
    type Data = SpvFromBtcData;

    const TYPE: SwapType = SwapType::SpvFromBtc;

    fn payment_hash(data: &Self::Data) -> Option<String> {
        data.btc_tx_id.clone()
    }

    fn event_hash(event: &LedgerEvent) -> Option<String> {
        match event {
            LedgerEvent::VaultFront { btc_tx_id, .. } | LedgerEvent::VaultClaim { btc_tx_id, .. } => {
                Some(btc_tx_id.clone())
            }
            LedgerEvent::VaultClose { btc_tx_id, .. } => btc_tx_id.clone(),
            _ => None,
        }
    }

    fn matches_event(record: &SwapRecord<Self::Data>, event: &LedgerEvent) -> bool {
        let data = &record.data;
        event.vault_key() == Some((data.vault_owner.as_str(), data.vault_id))
            && Self::event_hash(event).is_some_and(|hash| data.btc_tx_id.as_deref() == Some(hash.as_str()))
    }

    async fn sync(swap: &SwapHandle<Self>) -> Result<bool, SwapError> {
        let mut changed = false;
        for _ in 0..3 {
            if !sync_once(swap).await? {
                break;
            }
            changed = true;
        }
        Ok(changed)
    }

    async fn tick(swap: &SwapHandle<Self>) -> Result<bool, SwapError> {
        if !matches!(
            swap.state(),
            SpvFromBtcState::Created | SpvFromBtcState::Signed
        ) {
            return Ok(false);
        }
        let expiry = swap.snapshot().await.expiry;
        if swap.ctx().clock.now_ms() > expiry {
            swap.transition(SpvFromBtcState::QuoteSoftExpired, |_| {}).await
        } else {
            Ok(false)
        }
    }

    async fn on_event(swap: &SwapHandle<Self>, event: &LedgerEvent) -> Result<bool, SwapError> {
        let candidate = match event.clone() {
            LedgerEvent::VaultFront { tx_id, .. } => {
                Candidate::<SpvFromBtc>::new(SpvFromBtcState::Fronted, Evidence::Committed)
                    .with(move |r| r.data.front_tx_id = Some(tx_id))
            }
            LedgerEvent::VaultClaim { tx_id, .. } => {
                Candidate::<SpvFromBtc>::new(SpvFromBtcState::Claimed, Evidence::PaidConfirmed)
                    .with(move |r| r.claim_tx_id = Some(tx_id))
            }
            LedgerEvent::VaultClose { .. } => {
                Candidate::<SpvFromBtc>::new(SpvFromBtcState::Closed, Evidence::Expired)
            }
            _ => return Ok(false),
        };
        if swap.apply_best(vec![candidate]).await? {
            return Ok(true);
        }
        if swap.state().is_terminal() {
            Ok(false)
        } else {
            Self::sync(swap).await
        }
    }
}

async fn sync_once(swap: &SwapHandle<SpvFromBtc>) -> Result<bool, SwapError> {
    let ctx = swap.ctx();
    let state = swap.state();
    let record = swap.snapshot().await;
    let data = &record.data;

    match state {
        SpvFromBtcState::Created
        | SpvFromBtcState::Signed
        | SpvFromBtcState::Posted
        | SpvFromBtcState::QuoteSoftExpired => {
            let Some(txid) = data.btc_txid()? else {
                return if state == SpvFromBtcState::QuoteSoftExpired {
                    swap.transition(SpvFromBtcState::QuoteExpired, |_| {}).await
                } else {
                    Ok(false)
                };
            };
            if let Some(tx) = ctx
                .retry("withdrawal transaction", || ctx.bitcoin.get_transaction(&txid))
                .await?
            {
                let confirmations = tx.confirmations;
                return swap
                    .transition(SpvFromBtcState::Broadcasted, move |r| {
                        r.data.btc_confirmations = confirmations
                    })
                    .await;
            }
            if conflicting_spend(ctx, data, txid).await? {
                return swap
                    .apply_best(vec![Candidate::<SpvFromBtc>::new(
                        SpvFromBtcState::QuoteExpired,
                        Evidence::NotCommitted,
                    )])
                    .await;
            }
            Ok(false)
        }
        SpvFromBtcState::Broadcasted
        | SpvFromBtcState::BtcTxConfirmed
        | SpvFromBtcState::Fronted => {
            let Some(txid) = data.btc_txid()? else {
                return Ok(false);
            };
            let btc_tx_id = txid.to_string();
            let withdrawal = ctx
                .retry("withdrawal state", || ctx.ledger.withdrawal_state(&btc_tx_id))
                .await?;
            let candidates = match withdrawal {
                WithdrawalState::Claimed { tx_id, .. } => vec![
                    Candidate::<SpvFromBtc>::new(SpvFromBtcState::Claimed, Evidence::PaidConfirmed)
                        .with(move |r| r.claim_tx_id = Some(tx_id)),
                ],
                WithdrawalState::Fronted { fronter, tx_id } => vec![
                    Candidate::<SpvFromBtc>::new(SpvFromBtcState::Fronted, Evidence::Committed).with(move |r| {
                        r.data.fronter = Some(fronter);
                        r.data.front_tx_id = Some(tx_id);
                    }),
                ],
                WithdrawalState::Closed { .. } => {
                    vec![Candidate::<SpvFromBtc>::new(SpvFromBtcState::Closed, Evidence::Expired)]
                }
                WithdrawalState::NotFound => bitcoin_candidates(ctx, data, txid).await?,
            };
            swap.apply_best(candidates).await
        }
        _ => Ok(false),
    }
}

async fn bitcoin_candidates(
    ctx: &SwapContext,
    data: &SpvFromBtcData,
    txid: Txid,
) -> Result<Vec<Candidate<SpvFromBtc>>, SwapError> {
    match ctx
        .retry("withdrawal transaction", || ctx.bitcoin.get_transaction(&txid))
        .await?
    {
        Some(tx) => {
            let confirmations = tx.confirmations;
            if confirmations >= data.required_confirmations {
                Ok(vec![
                    Candidate::<SpvFromBtc>::new(SpvFromBtcState::BtcTxConfirmed, Evidence::Committed)
                        .with(move |r| r.data.btc_confirmations = confirmations),
                ])
            } else {
                Ok(Vec::new())
            }
        }
        None if conflicting_spend(ctx, data, txid).await? => Ok(vec![Candidate::<SpvFromBtc>::new(
            SpvFromBtcState::Failed,
            Evidence::NotCommitted,
        )]),
        None => Ok(Vec::new()),
    }
}

/// Whether any input of the withdrawal has been spent by another
/// transaction.
async fn conflicting_spend(
    ctx: &SwapContext,
    data: &SpvFromBtcData,
    txid: Txid,
) -> Result<bool, SwapError> {
    let inputs: Vec<OutPoint> = match data.psbt.as_deref() {
        Some(raw) => psbt_from_hex(raw)
            .map_err(|e| SwapError::storage(anyhow::anyhow!(e)))?
            .unsigned_tx
            .input
            .iter()
            .map(|input| input.previous_output)
            .collect(),
        None => vec![parse_outpoint(&data.vault_utxo, None)?],
    };

    for outpoint in inputs {
        let spend = ctx
            .retry("input spend", || ctx.bitcoin.spending_transaction(&outpoint))
            .await?;
        if let Some(spend) = spend.filter(|spend| spend.txid() != txid) {
            tracing::warn!(
                btc_tx_id = %txid,
                input = %outpoint,
                conflict = %spend.txid(),
                "withdrawal input spent by a conflicting transaction"
            );
            return Ok(true);
        }
    }
    Ok(false)
}

impl SwapHandle<SpvFromBtc> {
    /// Builds the unsigned withdrawal PSBT funded by `funding`, at no less
    /// than the intermediary's fee-rate floor.
    pub async fn funded_psbt(
        &self,
        funding: &[FundingInput],
        change_script: &Script,
    ) -> Result<Psbt, SwapError> {
        self.expect_state(&[SpvFromBtcState::Created], "build withdrawal")?;
        let ctx = self.ctx().clone();
        let record = self.snapshot().await;
        let data = &record.data;
        for input in funding {
            require_witness_script(&input.prevout.script_pubkey, "funding input", None)
                .map_err(|e| SwapError::precondition(e.to_string()))?;
        }
        require_witness_script(change_script, "change output", None)
            .map_err(|e| SwapError::precondition(e.to_string()))?;

        let network_rate = ctx.retry("fee rate", || ctx.bitcoin.fee_rate()).await?;
        let fee_rate = network_rate.max(data.min_fee_rate);
        build_withdrawal_psbt(&data.plan(&ctx)?, funding, change_script, fee_rate)
            .map_err(|e| SwapError::precondition(e.to_string()))
    }

    /// Validates a wallet-signed withdrawal and submits it to the
    /// intermediary for finalization and broadcast.
    pub async fn submit_psbt(&self, psbt: &Psbt) -> Result<Txid, SwapError> {
        let state = self.expect_state(
            &[SpvFromBtcState::Created, SpvFromBtcState::Signed],
            "submit withdrawal",
        )?;
        let ctx = self.ctx().clone();
        let record = self.snapshot().await;
        if ctx.clock.now_ms() >= record.expiry {
            return Err(SwapError::precondition(format!("quote for swap {} has expired", self.id())));
        }
        let data = &record.data;
        let plan = data.plan(&ctx)?;
        let fee_rate = validate_withdrawal_psbt(psbt, &plan, data.min_fee_rate)
            .map_err(|e| SwapError::precondition(e.to_string()))?;
        check_signatures(psbt).map_err(|e| SwapError::precondition(e.to_string()))?;

        let txid = psbt.unsigned_tx.compute_txid();
        let psbt_hex = psbt_to_hex(psbt);
        if state == SpvFromBtcState::Created {
            let (stored_hex, btc_tx_id) = (psbt_hex.clone(), txid.to_string());
            self.transition(SpvFromBtcState::Signed, move |r| {
                r.initiated = true;
                r.data.psbt = Some(stored_hex);
                r.data.btc_tx_id = Some(btc_tx_id);
            })
            .await?;
        } else if data.btc_tx_id.as_deref() != Some(txid.to_string().as_str()) {
            return Err(SwapError::precondition(
                "a different withdrawal was already signed for this swap",
            ));
        }
        tracing::info!(swap_id = %self.id(), btc_tx_id = %txid, fee_rate, "submitting vault withdrawal");

        let url = record.url.as_str();
        match ctx
            .retry("post withdrawal", || {
                ctx.intermediary.post_spv_psbt(url, &data.quote_id, &psbt_hex)
            })
            .await
        {
            Ok(()) => {
                self.transition(SpvFromBtcState::Posted, |_| {}).await?;
                Ok(txid)
            }
            Err(err) if err.is_transient() => Err(err),
            Err(err) => {
                tracing::warn!(swap_id = %self.id(), error = %err, "withdrawal declined");
                self.transition(SpvFromBtcState::Declined, |_| {}).await?;
                Err(ctx.blacklist.note(err))
            }
        }
    }

    /// Waits until the withdrawal is confirmed, fronted or claimed, or the
    /// swap ends otherwise; returns the state reached.
    pub async fn wait_for_bitcoin_transaction(
        &self,
        cancel: Option<&Cancellation>,
    ) -> Result<SpvFromBtcState, SwapError> {
        self.wait_till_state(SpvFromBtcState::Fronted, WaitOrdering::Gte, cancel)
            .await
    }

    /// Claims the confirmed withdrawal on the smart chain. A watchtower
    /// that already claimed or fronted it makes this a success.
    pub async fn claim(&self) -> Result<String, SwapError> {
        self.expect_state(&[SpvFromBtcState::BtcTxConfirmed], "claim")?;
        let ctx = self.ctx().clone();
        let record = self.snapshot().await;
        let data = &record.data;
        let btc_tx_id = data
            .btc_tx_id
            .clone()
            .ok_or_else(|| SwapError::precondition("no withdrawal transaction recorded"))?;

        let err = match ctx
            .retry("claim withdrawal", || {
                ctx.ledger
                    .claim_vault_withdrawal(&data.vault_owner, data.vault_id, &btc_tx_id)
            })
            .await
        {
            Ok(tx_id) => {
                let claim_tx_id = tx_id.clone();
                self.transition(SpvFromBtcState::Claimed, move |r| {
                    r.claim_tx_id = Some(claim_tx_id)
                })
                .await?;
                return Ok(tx_id);
            }
            Err(err) => err,
        };

        let withdrawal = ctx
            .retry("withdrawal state", || ctx.ledger.withdrawal_state(&btc_tx_id))
            .await?;
        match withdrawal {
            WithdrawalState::Claimed { claimer, tx_id } => {
                tracing::info!(swap_id = %self.id(), claimer = %claimer, error = %err, "withdrawal already claimed");
                let claim_tx_id = tx_id.clone();
                self.transition(SpvFromBtcState::Claimed, move |r| {
                    r.claim_tx_id = Some(claim_tx_id)
                })
                .await?;
                Ok(tx_id)
            }
            WithdrawalState::Fronted { fronter, tx_id } => {
                tracing::info!(swap_id = %self.id(), fronter = %fronter, error = %err, "withdrawal already fronted");
                let front_tx_id = tx_id.clone();
                self.transition(SpvFromBtcState::Fronted, move |r| {
                    r.data.fronter = Some(fronter);
                    r.data.front_tx_id = Some(front_tx_id);
                })
                .await?;
                Ok(tx_id)
            }
            _ => Err(err),
        }
    }
}

impl SwapWrapper<SpvFromBtc> {
    /// Requests a vault withdrawal quote and accepts it only after the
    /// vault's balance, net of every pending withdrawal, covers it.
    pub async fn create(
        &self,
        url: &str,
        req: &SpvVaultQuoteRequest,
    ) -> Result<Arc<SwapHandle<SpvFromBtc>>, SwapError> {
        let ctx = self.ctx();
        ctx.ensure_trusted(url)?;
        let quote = ctx
            .retry("spv vault quote", || ctx.intermediary.spv_vault_quote(url, req))
            .await?;

        let verified = async {
            let vault_script = parse_address(&quote.vault_btc_address, ctx.config.network, Some(url))?
                .script_pubkey();
            require_witness_script(&vault_script, "vault address", Some(url))?;
            let btc_script = parse_address(&quote.btc_address, ctx.config.network, Some(url))?
                .script_pubkey();
            require_witness_script(&btc_script, "payout address", Some(url))?;
            ensure_quote(
                quote.amount_sats == req.amount_sats && quote.gas_amount == req.gas_amount,
                url,
                || "amounts differ from the request".into(),
            )?;

            let vault = ctx
                .retry("vault state", || ctx.ledger.vault(&quote.vault_owner, quote.vault_id))
                .await?
                .ok_or_else(|| {
                    SwapError::integrity(
                        Some(url),
                        format!("vault {}:{} does not exist", quote.vault_owner, quote.vault_id),
                    )
                })?;
            ensure_quote(!vault.closed, url, || "vault is closed".into())?;
            ensure_quote(vault.btc_address == quote.vault_btc_address, url, || {
                "vault address differs from the ledger".into()
            })?;
            ensure_quote(vault.tokens[0] == req.token, url, || {
                format!("vault holds {}, not {}", vault.tokens[0], req.token)
            })?;
            let raw_amounts = [
                raw_amount(quote.token_amount, vault.multipliers[0], url)?,
                raw_amount(quote.gas_amount, vault.multipliers[1], url)?,
            ];

            let confirmed = parse_outpoint(&vault.utxo, Some(url))?;
            let pending = pending_withdrawals(ctx, confirmed).await?;
            let simulated = simulate_withdrawals(confirmed, vault.balances, &pending)
                .map_err(|e| SwapError::integrity(Some(url), e))?;
            let quoted_utxo = parse_outpoint(&quote.vault_utxo, Some(url))?;
            ensure_quote(simulated.utxo == quoted_utxo, url, || {
                format!(
                    "vault utxo {quoted_utxo} is stale, current tip after {} pending withdrawals is {}",
                    simulated.pending, simulated.utxo
                )
            })?;
            ensure_quote(
                simulated.balances[0] >= raw_amounts[0] && simulated.balances[1] >= raw_amounts[1],
                url,
                || {
                    format!(
                        "vault balance {:?} after {} pending withdrawals cannot cover {:?}",
                        simulated.balances, simulated.pending, raw_amounts
                    )
                },
            )?;

            let vault_value_sats = vault_output(ctx, quoted_utxo, &vault_script, url).await?;
            let pricing = PricingInfo::verify(
                &quote.fee,
                req.amount_sats,
                req.market_price_uppm,
                ctx.config.max_price_difference_ppm,
                url,
            )?;
            Ok::<_, SwapError>((raw_amounts, vault_value_sats, pricing))
        }
        .await;
        let (raw_amounts, vault_value_sats, pricing) = verified.map_err(|e| ctx.blacklist.note(e))?;

        let record = SwapRecord::new(
            swap_id(&quote.quote_id),
            SwapType::SpvFromBtc,
            SpvFromBtcState::Created.code(),
            url,
            &req.recipient,
            pricing,
            None,
            quote.expiry,
            ctx.clock.now_ms(),
            SpvFromBtcData {
                quote_id: quote.quote_id,
                vault_owner: quote.vault_owner,
                vault_id: quote.vault_id,
                vault_utxo: quote.vault_utxo,
                vault_btc_address: quote.vault_btc_address,
                vault_value_sats,
                btc_address: quote.btc_address,
                recipient: req.recipient.clone(),
                token: req.token.clone(),
                amount_sats: quote.amount_sats,
                token_amount: quote.token_amount,
                gas_amount: quote.gas_amount,
                raw_amounts,
                min_fee_rate: quote.min_fee_rate,
                required_confirmations: quote.required_confirmations,
                psbt: None,
                btc_tx_id: None,
                btc_confirmations: 0,
                fronter: None,
                front_tx_id: None,
            },
        );
        self.insert(record).await
    }
}

/// `amount` in vault base units, which must be an exact multiple.
fn raw_amount(amount: u64, multiplier: u64, url: &str) -> Result<u64, SwapError> {
    if amount == 0 {
        return Ok(0);
    }
    if multiplier == 0 || amount % multiplier != 0 {
        return Err(SwapError::integrity(
            Some(url),
            format!("amount {amount} is not a multiple of vault multiplier {multiplier}"),
        ));
    }
    Ok(amount / multiplier)
}

async fn vault_output(
    ctx: &SwapContext,
    utxo: OutPoint,
    vault_script: &Script,
    url: &str,
) -> Result<u64, SwapError> {
    let tx: Transaction = ctx
        .retry("vault utxo transaction", || ctx.bitcoin.get_transaction(&utxo.txid))
        .await?
        .ok_or_else(|| SwapError::transient(format!("vault utxo transaction {} not found", utxo.txid)))?
        .tx;
    let out = tx
        .output
        .get(utxo.vout as usize)
        .ok_or_else(|| SwapError::integrity(Some(url), format!("vault utxo {utxo} does not exist")))?;
    if out.script_pubkey.as_script() != vault_script {
        return Err(SwapError::integrity(
            Some(url),
            format!("vault utxo {utxo} is not locked to the vault address"),
        ));
    }
    Ok(out.value.to_sat())
}
