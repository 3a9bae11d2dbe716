use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{authorization_expired, commit_status, ensure_quote, matches_escrow, verify_authorization};
use crate::btc::{chain_claim_hash, parse_address};
use crate::cancel::Cancellation;
use crate::error::SwapError;
use crate::intermediary::FromBtcQuoteRequest;
use crate::ledger::{CommitStatus, EscrowData, EscrowKind, LedgerEvent};
use crate::swap::record::swap_id;
use crate::swap::state::swap_states;
use crate::swap::{
    Candidate, Evidence, PricingInfo, SwapFamily, SwapHandle, SwapRecord, SwapState, SwapType,
    WaitOrdering,
};
use crate::wrapper::SwapWrapper;

swap_states! {
    /// Swaps receiving tokens for an on-chain Bitcoin payment.
    pub enum FromBtcState {
        Failed = -4 => "FAILED",
        Expired = -3 => "EXPIRED",
        QuoteExpired = -2 => "QUOTE_EXPIRED",
        QuoteSoftExpired = -1 => "QUOTE_SOFT_EXPIRED",
        PrCreated = 0 => "PR_CREATED",
        ClaimCommitted = 1 => "CLAIM_COMMITTED",
        BtcTxConfirmed = 2 => "BTC_TX_CONFIRMED",
        ClaimClaimed = 3 => "CLAIM_CLAIMED",
    }
}

impl SwapState for FromBtcState {
    const ALL: &'static [Self] = Self::VARIANTS;

    fn code(self) -> i32 {
        self as i32
    }

    fn label(self) -> &'static str {
        self.as_str()
    }

    fn next_states(self) -> &'static [Self] {
        match self {
            Self::PrCreated => &[Self::QuoteSoftExpired, Self::QuoteExpired, Self::ClaimCommitted],
            Self::QuoteSoftExpired => &[Self::QuoteExpired, Self::ClaimCommitted],
            Self::ClaimCommitted => &[
                Self::BtcTxConfirmed,
                Self::ClaimClaimed,
                Self::Expired,
                Self::Failed,
            ],
            Self::BtcTxConfirmed => &[Self::ClaimClaimed, Self::Expired, Self::Failed],
            Self::Expired => &[Self::ClaimClaimed, Self::Failed],
            Self::Failed | Self::QuoteExpired | Self::ClaimClaimed => &[],
        }
    }

    fn is_successful(self) -> bool {
        self == Self::ClaimClaimed
    }

    fn is_failed(self) -> bool {
        self == Self::Failed
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

    fn requires_signature(self) -> bool {
        self == Self::ClaimCommitted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FromBtcData {
    pub escrow: EscrowData,
    pub btc_address: String,
    pub amount_sats: u64,
    /// Bitcoin payment into the intermediary's address, once seen.
    pub btc_tx_id: Option<String>,
    pub btc_confirmations: u32,
}

pub struct FromBtc;

#[async_trait]
impl SwapFamily for FromBtc {
    type State = FromBtcState;
    type Data = FromBtcData;

    const TYPE: SwapType = SwapType::FromBtc;

    fn payment_hash(data: &Self::Data) -> Option<String> {
        Some(data.escrow.claim_hash.clone())
    }

    fn matches_event(record: &SwapRecord<Self::Data>, event: &LedgerEvent) -> bool {
        matches_escrow(&record.data.escrow, event)
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
        match swap.state() {
            FromBtcState::PrCreated => {
                let expiry = swap.snapshot().await.expiry;
                if swap.ctx().clock.now_ms() > expiry {
                    swap.transition(FromBtcState::QuoteSoftExpired, |_| {}).await
                } else {
                    Ok(false)
                }
            }
            FromBtcState::QuoteSoftExpired => expire_unused(swap).await,
            _ => Ok(false),
        }
    }

    async fn on_event(swap: &SwapHandle<Self>, event: &LedgerEvent) -> Result<bool, SwapError> {
        let candidate = match event.clone() {
            LedgerEvent::Initialize { tx_id, .. } => {
                Candidate::<FromBtc>::new(FromBtcState::ClaimCommitted, Evidence::Committed)
                    .with(move |r| r.commit_tx_id = Some(tx_id))
            }
            LedgerEvent::Claim { tx_id, .. } => {
                Candidate::<FromBtc>::new(FromBtcState::ClaimClaimed, Evidence::PaidConfirmed)
                    .with(move |r| r.claim_tx_id = Some(tx_id))
            }
            LedgerEvent::Refund { tx_id, .. } => {
                Candidate::<FromBtc>::new(FromBtcState::Failed, Evidence::NotCommitted)
                    .with(move |r| r.refund_tx_id = Some(tx_id))
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

async fn expire_unused(swap: &SwapHandle<FromBtc>) -> Result<bool, SwapError> {
    let ctx = swap.ctx();
    let record = swap.snapshot().await;
    let escrow = &record.data.escrow;
    if !authorization_expired(ctx, escrow, record.signature.as_ref()).await? {
        return Ok(false);
    }
    match commit_status(ctx, escrow).await? {
        CommitStatus::NotCommitted { .. } => swap.transition(FromBtcState::QuoteExpired, |_| {}).await,
        _ => Ok(false),
    }
}

async fn sync_once(swap: &SwapHandle<FromBtc>) -> Result<bool, SwapError> {
    let ctx = swap.ctx();
    let state = swap.state();
    if state.is_terminal() {
        return Ok(false);
    }
    let record = swap.snapshot().await;
    let status = commit_status(ctx, &record.data.escrow).await?;

    match state {
        FromBtcState::PrCreated | FromBtcState::QuoteSoftExpired => match status {
            CommitStatus::NotCommitted { .. } if state == FromBtcState::QuoteSoftExpired => {
                expire_unused(swap).await
            }
            CommitStatus::NotCommitted { .. } => Ok(false),
            _ => {
                swap.apply_best(vec![Candidate::<FromBtc>::new(
                    FromBtcState::ClaimCommitted,
                    Evidence::Committed,
                )])
                .await
            }
        },
        _ => {
            let candidates = match status {
                CommitStatus::Paid { claim_tx_id } => vec![
                    Candidate::<FromBtc>::new(FromBtcState::ClaimClaimed, Evidence::PaidConfirmed)
                        .with(move |r| r.claim_tx_id = claim_tx_id),
                ],
                CommitStatus::NotCommitted {
                    refund_tx_id: Some(tx_id),
                } => vec![
                    Candidate::<FromBtc>::new(FromBtcState::Failed, Evidence::NotCommitted)
                        .with(move |r| r.refund_tx_id = Some(tx_id)),
                ],
                // No refund seen yet: the ledger view lags the commit.
                CommitStatus::NotCommitted { refund_tx_id: None } => Vec::new(),
                CommitStatus::Expired | CommitStatus::Refundable => {
                    vec![Candidate::<FromBtc>::new(FromBtcState::Expired, Evidence::Expired)]
                }
                CommitStatus::Committed if state == FromBtcState::ClaimCommitted => {
                    return observe_payment(swap, &record).await;
                }
                CommitStatus::Committed => Vec::new(),
            };
            swap.apply_best(candidates).await
        }
    }
}

/// Looks for the Bitcoin payment the escrow's claim hash commits to.
async fn observe_payment(
    swap: &SwapHandle<FromBtc>,
    record: &SwapRecord<FromBtcData>,
) -> Result<bool, SwapError> {
    let ctx = swap.ctx();
    let data = &record.data;
    let script = parse_address(&data.btc_address, ctx.config.network, Some(&record.url))?
        .script_pubkey();
    let Some(tx) = ctx
        .retry("find bitcoin payment", || {
            ctx.bitcoin.find_payment(&script, data.amount_sats)
        })
        .await?
    else {
        return Ok(false);
    };

    let btc_tx_id = tx.txid().to_string();
    let confirmations = tx.confirmations;
    if confirmations >= data.escrow.confirmations {
        swap.transition(FromBtcState::BtcTxConfirmed, move |r| {
            r.data.btc_tx_id = Some(btc_tx_id);
            r.data.btc_confirmations = confirmations;
        })
        .await
    } else {
        if data.btc_tx_id.as_deref() != Some(btc_tx_id.as_str())
            || data.btc_confirmations != confirmations
        {
            tracing::debug!(swap_id = %swap.id(), btc_tx_id = %btc_tx_id, confirmations, "bitcoin payment seen");
            swap.update(move |r| {
                r.data.btc_tx_id = Some(btc_tx_id);
                r.data.btc_confirmations = confirmations;
            })
            .await?;
        }
        Ok(false)
    }
}

impl SwapHandle<FromBtc> {
    /// Commits the intermediary's escrow so the Bitcoin payment can be made.
    pub async fn commit(&self) -> Result<String, SwapError> {
        self.expect_state(&[FromBtcState::PrCreated], "commit")?;
        let ctx = self.ctx().clone();
        let record = self.snapshot().await;
        if ctx.clock.now_ms() >= record.expiry {
            return Err(SwapError::precondition(format!("quote for swap {} has expired", self.id())));
        }
        let signature = record
            .signature
            .clone()
            .ok_or_else(|| SwapError::precondition("swap has no signature data"))?;
        let escrow = &record.data.escrow;
        if authorization_expired(&ctx, escrow, Some(&signature)).await? {
            return Err(SwapError::precondition(format!(
                "authorization for swap {} has expired",
                self.id()
            )));
        }

        self.update(|r| r.initiated = true).await?;
        let tx_id = ctx
            .retry("commit escrow", || ctx.ledger.commit(escrow, &signature))
            .await?;
        let commit_tx_id = tx_id.clone();
        self.transition(FromBtcState::ClaimCommitted, move |r| {
            r.commit_tx_id = Some(commit_tx_id)
        })
        .await?;
        Ok(tx_id)
    }

    /// Bitcoin address and amount the user has to pay.
    pub async fn payment_details(&self) -> (String, u64) {
        let record = self.snapshot().await;
        (record.data.btc_address, record.data.amount_sats)
    }

    /// Waits for the Bitcoin payment to reach the escrow's confirmation
    /// target. Returns whether the swap is (or was) claimable.
    pub async fn wait_for_bitcoin_transaction(
        &self,
        cancel: Option<&Cancellation>,
    ) -> Result<bool, SwapError> {
        let state = self
            .wait_till_state(FromBtcState::BtcTxConfirmed, WaitOrdering::Gte, cancel)
            .await?;
        Ok(state.code() >= FromBtcState::BtcTxConfirmed.code())
    }

    /// Claims the escrow with the confirmed Bitcoin payment. If the local
    /// claim fails but the ledger shows the escrow already paid out, the
    /// swap is settled and the existing claim is returned, when the ledger
    /// names it.
    pub async fn claim(&self) -> Result<Option<String>, SwapError> {
        self.expect_state(&[FromBtcState::BtcTxConfirmed], "claim")?;
        let ctx = self.ctx().clone();
        let record = self.snapshot().await;
        let escrow = &record.data.escrow;
        let btc_tx_id = record
            .data
            .btc_tx_id
            .clone()
            .ok_or_else(|| SwapError::precondition("no bitcoin transaction recorded"))?;

        match ctx
            .retry("claim escrow", || ctx.ledger.claim_with_btc_tx(escrow, &btc_tx_id))
            .await
        {
            Ok(tx_id) => {
                let claim_tx_id = tx_id.clone();
                self.transition(FromBtcState::ClaimClaimed, move |r| {
                    r.claim_tx_id = Some(claim_tx_id)
                })
                .await?;
                Ok(Some(tx_id))
            }
            Err(err) => match commit_status(&ctx, escrow).await? {
                CommitStatus::Paid { claim_tx_id } => {
                    tracing::info!(swap_id = %self.id(), error = %err, "escrow already claimed by another party");
                    let tx_id = claim_tx_id.clone();
                    self.transition(FromBtcState::ClaimClaimed, move |r| r.claim_tx_id = claim_tx_id)
                        .await?;
                    Ok(tx_id)
                }
                _ => Err(err),
            },
        }
    }
}

impl SwapWrapper<FromBtc> {
    /// Requests and verifies a quote for receiving tokens against an
    /// on-chain Bitcoin payment, then persists it as a new swap.
    pub async fn create(
        &self,
        url: &str,
        req: &FromBtcQuoteRequest,
    ) -> Result<Arc<SwapHandle<FromBtc>>, SwapError> {
        let ctx = self.ctx();
        ctx.ensure_trusted(url)?;
        let quote = ctx
            .retry("from_btc quote", || ctx.intermediary.from_btc_quote(url, req))
            .await?;

        let verified = async {
            let escrow = &quote.escrow;
            let script = parse_address(&quote.btc_address, ctx.config.network, Some(url))?
                .script_pubkey();
            ensure_quote(escrow.kind == EscrowKind::ChainNonced, url, || {
                "escrow is not a chain-nonced escrow".into()
            })?;
            ensure_quote(quote.amount_sats == req.amount_sats, url, || {
                format!("amount {} != requested {}", quote.amount_sats, req.amount_sats)
            })?;
            ensure_quote(
                escrow.claimer == req.claimer
                    && escrow.token == req.token
                    && escrow.sequence == req.sequence,
                url,
                || "claimer, token or sequence differs from the request".into(),
            )?;
            let claim_hash = hex::encode(chain_claim_hash(escrow.nonce, quote.amount_sats, &script));
            ensure_quote(escrow.claim_hash == claim_hash, url, || {
                "claim hash does not commit to the payment address".into()
            })?;
            if let Some(max) = ctx.config.max_security_deposit {
                ensure_quote(escrow.security_deposit <= max, url, || {
                    format!("security deposit {} exceeds {max}", escrow.security_deposit)
                })?;
            }
            let pricing = PricingInfo::verify(
                &quote.fee,
                req.amount_sats,
                req.market_price_uppm,
                ctx.config.max_price_difference_ppm,
                url,
            )?;
            verify_authorization(ctx, escrow, &quote.signature, url).await?;
            Ok::<_, SwapError>((claim_hash, pricing))
        }
        .await;
        let (claim_hash, pricing) = verified.map_err(|e| ctx.blacklist.note(e))?;

        let record = SwapRecord::new(
            swap_id(&claim_hash),
            SwapType::FromBtc,
            FromBtcState::PrCreated.code(),
            url,
            &req.claimer,
            pricing,
            Some(quote.signature.clone()),
            quote.expiry,
            ctx.clock.now_ms(),
            FromBtcData {
                escrow: quote.escrow,
                btc_address: quote.btc_address,
                amount_sats: quote.amount_sats,
                btc_tx_id: None,
                btc_confirmations: 0,
            },
        );
        self.insert(record).await
    }
}
