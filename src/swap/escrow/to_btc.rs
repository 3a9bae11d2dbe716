use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::Txid;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{authorization_expired, commit_status, ensure_quote, matches_escrow, verify_authorization};
use crate::btc::{chain_claim_hash, find_output, parse_address};
use crate::cancel::Cancellation;
use crate::error::SwapError;
use crate::intermediary::codes::{PaymentProof, RefundAuthorization};
use crate::intermediary::{ToBtcLnQuoteRequest, ToBtcQuoteRequest};
use crate::ledger::{CommitStatus, EscrowData, EscrowKind, LedgerEvent, SignatureData};
use crate::lightning::{parse_bolt11, sha256_preimage};
use crate::swap::record::swap_id;
use crate::swap::state::swap_states;
use crate::swap::{
    Candidate, Evidence, PricingInfo, SwapContext, SwapFamily, SwapHandle, SwapRecord, SwapState,
    SwapType, WaitOrdering,
};
use crate::wrapper::SwapWrapper;

swap_states! {
    /// Swaps paying tokens out to a Bitcoin address or a Lightning invoice.
    pub enum ToBtcState {
        Refunded = -3 => "REFUNDED",
        QuoteExpired = -2 => "QUOTE_EXPIRED",
        QuoteSoftExpired = -1 => "QUOTE_SOFT_EXPIRED",
        Created = 0 => "CREATED",
        Committed = 1 => "COMMITTED",
        SoftClaimed = 2 => "SOFT_CLAIMED",
        Claimed = 3 => "CLAIMED",
        Refundable = 4 => "REFUNDABLE",
    }
}

impl SwapState for ToBtcState {
    const ALL: &'static [Self] = Self::VARIANTS;

    fn code(self) -> i32 {
        self as i32
    }

    fn label(self) -> &'static str {
        self.as_str()
    }

    fn next_states(self) -> &'static [Self] {
        match self {
            Self::Created => &[Self::QuoteSoftExpired, Self::QuoteExpired, Self::Committed],
            Self::QuoteSoftExpired => &[Self::QuoteExpired, Self::Committed],
            Self::Committed => &[
                Self::SoftClaimed,
                Self::Claimed,
                Self::Refundable,
                Self::Refunded,
            ],
            Self::SoftClaimed => &[Self::Claimed, Self::Refundable],
            Self::Refundable => &[Self::Claimed, Self::Refunded],
            Self::Refunded | Self::QuoteExpired | Self::Claimed => &[],
        }
    }

    fn is_successful(self) -> bool {
        self == Self::Claimed
    }

    fn is_failed(self) -> bool {
        self == Self::Refunded
    }

    fn is_quote_expired(self) -> bool {
        self == Self::QuoteExpired
    }

    fn is_quote_soft_expired(self) -> bool {
        self == Self::QuoteSoftExpired
    }

    fn is_refundable(self) -> bool {
        self == Self::Refundable
    }

    fn requires_signature(self) -> bool {
        self == Self::Committed
    }
}

/// Off-chain leg of a pay-out swap: what the intermediary must deliver and
/// how its proof of delivery is checked.
#[async_trait]
pub trait Payout: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: SwapType;

    /// Checks the intermediary's proof against this payout and records it.
    /// `Ok(false)` means the proof cannot be confirmed yet.
    async fn verify_proof(
        &mut self,
        ctx: &SwapContext,
        escrow: &EscrowData,
        proof: &PaymentProof,
        url: &str,
    ) -> Result<bool, SwapError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnChainPayout {
    pub address: String,
    pub amount_sats: u64,
    pub confirmations: u32,
    pub nonce: u64,
    pub btc_tx_id: Option<String>,
}

#[async_trait]
impl Payout for OnChainPayout {
    const TYPE: SwapType = SwapType::ToBtc;

    async fn verify_proof(
        &mut self,
        ctx: &SwapContext,
        escrow: &EscrowData,
        proof: &PaymentProof,
        url: &str,
    ) -> Result<bool, SwapError> {
        let raw = proof
            .tx_id
            .as_deref()
            .ok_or_else(|| SwapError::integrity(Some(url), "payout proof without bitcoin txid"))?;
        let txid: Txid = raw
            .parse()
            .map_err(|e| SwapError::integrity(Some(url), format!("invalid payout txid {raw}: {e}")))?;

        let Some(tx) = ctx
            .retry("payout transaction", || ctx.bitcoin.get_transaction(&txid))
            .await?
        else {
            return Ok(false);
        };

        let script = parse_address(&self.address, ctx.config.network, None)?.script_pubkey();
        if find_output(&tx.tx, &script, self.amount_sats).is_none() {
            return Err(SwapError::integrity(
                Some(url),
                format!("payout tx {txid} does not pay {} sats to {}", self.amount_sats, self.address),
            ));
        }
        let expected = hex::encode(chain_claim_hash(self.nonce, self.amount_sats, &script));
        if escrow.claim_hash != expected {
            return Err(SwapError::integrity(
                Some(url),
                "escrow claim hash does not commit to the payout output",
            ));
        }

        self.btc_tx_id = Some(txid.to_string());
        Ok(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightningPayout {
    pub invoice: String,
    pub payment_hash: String,
    pub amount_msat: u64,
    pub max_routing_fee_sats: u64,
    pub preimage: Option<String>,
}

#[async_trait]
impl Payout for LightningPayout {
    const TYPE: SwapType = SwapType::ToBtcLn;

    async fn verify_proof(
        &mut self,
        _ctx: &SwapContext,
        _escrow: &EscrowData,
        proof: &PaymentProof,
        url: &str,
    ) -> Result<bool, SwapError> {
        let secret = proof
            .secret
            .as_deref()
            .ok_or_else(|| SwapError::integrity(Some(url), "payout proof without preimage"))?;
        let bytes = hex::decode(secret)
            .map_err(|e| SwapError::integrity(Some(url), format!("invalid preimage hex: {e}")))?;
        if hex::encode(sha256_preimage(&bytes)) != self.payment_hash {
            return Err(SwapError::integrity(
                Some(url),
                format!("preimage does not hash to {}", self.payment_hash),
            ));
        }
        self.preimage = Some(secret.to_owned());
        Ok(true)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToBtcData<P> {
    pub escrow: EscrowData,
    pub payout: P,
    pub network_fee: u64,
    /// Cooperative refund signature handed out by the intermediary.
    pub refund_authorization: Option<SignatureData>,
}

/// Pay-out family, parameterised over the off-chain leg.
pub struct ToBtc<P>(PhantomData<fn() -> P>);

pub type ToBtcSwap = ToBtc<OnChainPayout>;
pub type ToBtcLnSwap = ToBtc<LightningPayout>;

#[async_trait]
impl<P: Payout> SwapFamily for ToBtc<P> {
    type State = ToBtcState;
    type Data = ToBtcData<P>;

    const TYPE: SwapType = P::TYPE;

    fn payment_hash(data: &Self::Data) -> Option<String> {
        Some(data.escrow.claim_hash.clone())
    }

    fn matches_event(record: &SwapRecord<Self::Data>, event: &LedgerEvent) -> bool {
        matches_escrow(&record.data.escrow, event)
    }

    async fn sync(swap: &SwapHandle<Self>) -> Result<bool, SwapError> {
        let mut changed = false;
        // A swap found far ahead of its local record may need several steps.
        for _ in 0..3 {
            if !sync_once(swap).await? {
                break;
            }
            changed = true;
        }
        Ok(changed)
    }

    async fn tick(swap: &SwapHandle<Self>) -> Result<bool, SwapError> {
        let ctx = swap.ctx();
        match swap.state() {
            ToBtcState::Created => {
                let expiry = swap.snapshot().await.expiry;
                if ctx.clock.now_ms() > expiry {
                    swap.transition(ToBtcState::QuoteSoftExpired, |_| {}).await
                } else {
                    Ok(false)
                }
            }
            ToBtcState::QuoteSoftExpired => expire_unused(swap).await,
            _ => Ok(false),
        }
    }

    async fn on_event(swap: &SwapHandle<Self>, event: &LedgerEvent) -> Result<bool, SwapError> {
        let candidate = match event.clone() {
            LedgerEvent::Initialize { tx_id, .. } => {
                Candidate::<ToBtc<P>>::new(ToBtcState::Committed, Evidence::Committed)
                    .with(move |r| r.commit_tx_id = Some(tx_id))
            }
            LedgerEvent::Claim { tx_id, .. } => {
                Candidate::<ToBtc<P>>::new(ToBtcState::Claimed, Evidence::PaidConfirmed)
                    .with(move |r| r.claim_tx_id = Some(tx_id))
            }
            LedgerEvent::Refund { tx_id, .. } => {
                Candidate::<ToBtc<P>>::new(ToBtcState::Refunded, Evidence::NotCommitted)
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

async fn expire_unused<P: Payout>(swap: &SwapHandle<ToBtc<P>>) -> Result<bool, SwapError> {
    let ctx = swap.ctx();
    let record = swap.snapshot().await;
    let escrow = &record.data.escrow;
    if !authorization_expired(ctx, escrow, record.signature.as_ref()).await? {
        return Ok(false);
    }
    match commit_status(ctx, escrow).await? {
        CommitStatus::NotCommitted { .. } => swap.transition(ToBtcState::QuoteExpired, |_| {}).await,
        _ => Ok(false),
    }
}

async fn sync_once<P: Payout>(swap: &SwapHandle<ToBtc<P>>) -> Result<bool, SwapError> {
    let ctx = swap.ctx();
    let state = swap.state();
    if state.is_terminal() {
        return Ok(false);
    }
    let record = swap.snapshot().await;
    let status = commit_status(ctx, &record.data.escrow).await?;

    match state {
        ToBtcState::Created | ToBtcState::QuoteSoftExpired => match status {
            CommitStatus::NotCommitted { .. } if state == ToBtcState::QuoteSoftExpired => {
                expire_unused(swap).await
            }
            CommitStatus::NotCommitted { .. } => Ok(false),
            _ => {
                swap.apply_best(vec![Candidate::<ToBtc<P>>::new(
                    ToBtcState::Committed,
                    Evidence::Committed,
                )])
                .await
            }
        },
        ToBtcState::Committed | ToBtcState::SoftClaimed | ToBtcState::Refundable => {
            let mut candidates = ledger_candidates::<P>(&status);
            if status == CommitStatus::Committed && state != ToBtcState::Refundable {
                match intermediary_candidate(swap, &record).await {
                    Ok(Some(candidate)) => candidates.push(candidate),
                    Ok(None) => {}
                    Err(err) if err.is_transient() => {
                        tracing::warn!(swap_id = %swap.id(), error = %err, "intermediary status unavailable");
                    }
                    Err(err) => return Err(ctx.blacklist.note(err)),
                }
            }
            swap.apply_best(candidates).await
        }
        _ => Ok(false),
    }
}

fn ledger_candidates<P: Payout>(status: &CommitStatus) -> Vec<Candidate<ToBtc<P>>> {
    match status.clone() {
        CommitStatus::Paid { claim_tx_id } => vec![
            Candidate::<ToBtc<P>>::new(ToBtcState::Claimed, Evidence::PaidConfirmed)
                .with(move |r| r.claim_tx_id = claim_tx_id),
        ],
        // An escrow that vanished without a refund tx is a lagging ledger view.
        CommitStatus::NotCommitted {
            refund_tx_id: Some(tx_id),
        } => vec![
            Candidate::<ToBtc<P>>::new(ToBtcState::Refunded, Evidence::NotCommitted)
                .with(move |r| r.refund_tx_id = Some(tx_id)),
        ],
        CommitStatus::NotCommitted { refund_tx_id: None } => Vec::new(),
        CommitStatus::Expired | CommitStatus::Refundable => {
            vec![Candidate::<ToBtc<P>>::new(ToBtcState::Refundable, Evidence::Expired)]
        }
        CommitStatus::Committed => Vec::new(),
    }
}

async fn intermediary_candidate<P: Payout>(
    swap: &SwapHandle<ToBtc<P>>,
    record: &SwapRecord<ToBtcData<P>>,
) -> Result<Option<Candidate<ToBtc<P>>>, SwapError> {
    let ctx = swap.ctx();
    let escrow = &record.data.escrow;
    let url = record.url.as_str();
    let resp = ctx
        .retry("refund authorization", || {
            ctx.intermediary
                .refund_authorization(url, &escrow.claim_hash, escrow.sequence)
        })
        .await?;

    match RefundAuthorization::parse(url, resp)? {
        RefundAuthorization::Paid(proof) => {
            let mut payout = record.data.payout.clone();
            if !payout.verify_proof(ctx, escrow, &proof, url).await? {
                return Ok(None);
            }
            Ok(Some(
                Candidate::<ToBtc<P>>::new(ToBtcState::SoftClaimed, Evidence::Committed)
                    .with(move |r| r.data.payout = payout),
            ))
        }
        RefundAuthorization::RefundData(authorization) => {
            ctx.retry("verify refund authorization", || {
                ctx.ledger.verify_refund_authorization(escrow, &authorization)
            })
            .await
            .map_err(|err| err.blame(url))?;
            Ok(Some(
                Candidate::<ToBtc<P>>::new(ToBtcState::Refundable, Evidence::Expired)
                    .with(move |r| r.data.refund_authorization = Some(authorization)),
            ))
        }
        RefundAuthorization::NotFound | RefundAuthorization::Pending | RefundAuthorization::Expired => {
            Ok(None)
        }
    }
}

impl<P: Payout> SwapHandle<ToBtc<P>> {
    /// Locks the tokens in the escrow. Only allowed while the quote is fresh.
    pub async fn commit(&self) -> Result<String, SwapError> {
        self.expect_state(&[ToBtcState::Created], "commit")?;
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
        tracing::info!(swap_id = %self.id(), tx_id = %tx_id, "escrow committed");

        let commit_tx_id = tx_id.clone();
        self.transition(ToBtcState::Committed, move |r| r.commit_tx_id = Some(commit_tx_id))
            .await?;
        Ok(tx_id)
    }

    /// Waits until the intermediary has paid out (`true`) or the swap became
    /// refundable or ended otherwise (`false`).
    pub async fn wait_for_payment(&self, cancel: Option<&Cancellation>) -> Result<bool, SwapError> {
        let state = self
            .wait_till_state(ToBtcState::SoftClaimed, WaitOrdering::Gte, cancel)
            .await?;
        Ok(matches!(state, ToBtcState::SoftClaimed | ToBtcState::Claimed))
    }

    /// Reclaims the escrowed tokens, preferring the intermediary's
    /// cooperative refund signature over the timeout path.
    pub async fn refund(&self) -> Result<String, SwapError> {
        self.expect_state(&[ToBtcState::Refundable], "refund")?;
        let ctx = self.ctx().clone();
        let record = self.snapshot().await;
        let escrow = &record.data.escrow;

        let result = match &record.data.refund_authorization {
            Some(authorization) => {
                ctx.retry("cooperative refund", || {
                    ctx.ledger.refund_with_authorization(escrow, authorization)
                })
                .await
            }
            None => ctx.retry("refund", || ctx.ledger.refund(escrow)).await,
        };

        match result {
            Ok(tx_id) => {
                let refund_tx_id = tx_id.clone();
                self.transition(ToBtcState::Refunded, move |r| r.refund_tx_id = Some(refund_tx_id))
                    .await?;
                Ok(tx_id)
            }
            Err(err) => match commit_status(&ctx, escrow).await? {
                CommitStatus::NotCommitted {
                    refund_tx_id: Some(tx_id),
                } => {
                    let refund_tx_id = tx_id.clone();
                    self.transition(ToBtcState::Refunded, move |r| r.refund_tx_id = Some(refund_tx_id))
                        .await?;
                    Ok(tx_id)
                }
                CommitStatus::Paid { claim_tx_id } => {
                    self.transition(ToBtcState::Claimed, move |r| r.claim_tx_id = claim_tx_id)
                        .await?;
                    Err(SwapError::precondition(format!(
                        "swap {} was claimed by the intermediary",
                        self.id()
                    )))
                }
                _ => Err(err),
            },
        }
    }
}

impl SwapWrapper<ToBtcSwap> {
    /// Requests and verifies a quote for paying `req.amount_sats` to a
    /// Bitcoin address, then persists it as a new swap.
    pub async fn create(
        &self,
        url: &str,
        req: &ToBtcQuoteRequest,
    ) -> Result<Arc<SwapHandle<ToBtcSwap>>, SwapError> {
        let ctx = self.ctx();
        ctx.ensure_trusted(url)?;
        let quote = ctx
            .retry("to_btc quote", || ctx.intermediary.to_btc_quote(url, req))
            .await?;

        let verified = async {
            let script = parse_address(&req.address, ctx.config.network, None)
                .map_err(|e| SwapError::precondition(e.to_string()))?
                .script_pubkey();
            let escrow = &quote.escrow;
            ensure_quote(escrow.kind == EscrowKind::ChainNonced, url, || {
                "escrow is not a chain-nonced escrow".into()
            })?;
            ensure_quote(quote.amount_sats == req.amount_sats, url, || {
                format!("amount {} != requested {}", quote.amount_sats, req.amount_sats)
            })?;
            ensure_quote(escrow.token == req.token && escrow.offerer == req.offerer, url, || {
                "token or offerer differs from the request".into()
            })?;
            ensure_quote(
                escrow.nonce == req.nonce && escrow.confirmations == req.confirmations,
                url,
                || "nonce or confirmations differ from the request".into(),
            )?;
            let claim_hash = hex::encode(chain_claim_hash(req.nonce, req.amount_sats, &script));
            ensure_quote(escrow.claim_hash == claim_hash, url, || {
                "claim hash does not commit to the requested output".into()
            })?;
            if let Some(max) = req.max_amount_in {
                ensure_quote(escrow.amount <= max, url, || {
                    format!("input {} exceeds the maximum {max}", escrow.amount)
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
            SwapType::ToBtc,
            ToBtcState::Created.code(),
            url,
            &req.offerer,
            pricing,
            Some(quote.signature.clone()),
            quote.expiry,
            ctx.clock.now_ms(),
            ToBtcData {
                escrow: quote.escrow,
                payout: OnChainPayout {
                    address: req.address.clone(),
                    amount_sats: req.amount_sats,
                    confirmations: req.confirmations,
                    nonce: req.nonce,
                    btc_tx_id: None,
                },
                network_fee: quote.network_fee,
                refund_authorization: None,
            },
        );
        self.insert(record).await
    }
}

impl SwapWrapper<ToBtcLnSwap> {
    /// Requests and verifies a quote for paying a BOLT11 invoice, then
    /// persists it as a new swap.
    pub async fn create(
        &self,
        url: &str,
        req: &ToBtcLnQuoteRequest,
    ) -> Result<Arc<SwapHandle<ToBtcLnSwap>>, SwapError> {
        let ctx = self.ctx();
        ctx.ensure_trusted(url)?;
        let invoice = parse_bolt11(&req.invoice).map_err(|e| SwapError::precondition(e.to_string()))?;
        let amount_msat = invoice
            .amount_msat
            .ok_or_else(|| SwapError::precondition("invoice has no amount"))?;
        if invoice
            .expires_at
            .is_some_and(|at| at <= ctx.clock.now_secs())
        {
            return Err(SwapError::precondition("invoice has expired"));
        }
        let payment_hash = hex::encode(invoice.payment_hash);

        let quote = ctx
            .retry("to_btcln quote", || ctx.intermediary.to_btcln_quote(url, req))
            .await?;

        let verified = async {
            let escrow = &quote.escrow;
            ensure_quote(escrow.kind == EscrowKind::Htlc, url, || {
                "escrow is not a hash-locked escrow".into()
            })?;
            ensure_quote(escrow.claim_hash == payment_hash, url, || {
                format!("claim hash {} != invoice payment hash {payment_hash}", escrow.claim_hash)
            })?;
            ensure_quote(escrow.token == req.token && escrow.offerer == req.offerer, url, || {
                "token or offerer differs from the request".into()
            })?;
            if let Some(max) = req.max_amount_in {
                ensure_quote(escrow.amount <= max, url, || {
                    format!("input {} exceeds the maximum {max}", escrow.amount)
                })?;
            }
            let pricing = PricingInfo::verify(
                &quote.fee,
                amount_msat.div_ceil(1000),
                req.market_price_uppm,
                ctx.config.max_price_difference_ppm,
                url,
            )?;
            verify_authorization(ctx, escrow, &quote.signature, url).await?;
            Ok::<_, SwapError>(pricing)
        }
        .await;
        let pricing = verified.map_err(|e| ctx.blacklist.note(e))?;

        let record = SwapRecord::new(
            swap_id(&payment_hash),
            SwapType::ToBtcLn,
            ToBtcState::Created.code(),
            url,
            &req.offerer,
            pricing,
            Some(quote.signature.clone()),
            quote.expiry,
            ctx.clock.now_ms(),
            ToBtcData {
                escrow: quote.escrow,
                payout: LightningPayout {
                    invoice: req.invoice.clone(),
                    payment_hash,
                    amount_msat,
                    max_routing_fee_sats: quote.max_routing_fee_sats,
                    preimage: None,
                },
                network_fee: 0,
                refund_authorization: None,
            },
        );
        self.insert(record).await
    }
}
