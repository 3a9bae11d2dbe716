use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{authorization_expired, commit_status, ensure_quote, matches_escrow};
use crate::cancel::Cancellation;
use crate::error::SwapError;
use crate::intermediary::FromBtcLnQuoteRequest;
use crate::intermediary::codes::{AuthorizationData, PaymentAuthorization};
use crate::ledger::{CommitStatus, EscrowData, EscrowKind, LedgerEvent};
use crate::lightning::{new_secret, parse_bolt11, sha256_preimage};
use crate::swap::record::swap_id;
use crate::swap::state::swap_states;
use crate::swap::{
    Candidate, Evidence, PricingInfo, SwapContext, SwapFamily, SwapHandle, SwapRecord, SwapState,
    SwapType, WaitOrdering,
};
use crate::wrapper::SwapWrapper;

swap_states! {
    /// Swaps receiving tokens for a Lightning payment.
    pub enum FromBtcLnState {
        Failed = -4 => "FAILED",
        QuoteExpired = -3 => "QUOTE_EXPIRED",
        QuoteSoftExpired = -2 => "QUOTE_SOFT_EXPIRED",
        Expired = -1 => "EXPIRED",
        PrCreated = 0 => "PR_CREATED",
        PrPaid = 1 => "PR_PAID",
        ClaimCommitted = 2 => "CLAIM_COMMITTED",
        ClaimClaimed = 3 => "CLAIM_CLAIMED",
    }
}

impl SwapState for FromBtcLnState {
    const ALL: &'static [Self] = Self::VARIANTS;

    fn code(self) -> i32 {
        self as i32
    }

    fn label(self) -> &'static str {
        self.as_str()
    }

    fn next_states(self) -> &'static [Self] {
        match self {
            Self::PrCreated => &[
                Self::QuoteSoftExpired,
                Self::QuoteExpired,
                Self::PrPaid,
                Self::ClaimCommitted,
                Self::ClaimClaimed,
            ],
            Self::QuoteSoftExpired => &[
                Self::QuoteExpired,
                Self::PrPaid,
                Self::ClaimCommitted,
                Self::ClaimClaimed,
            ],
            Self::PrPaid => &[Self::QuoteExpired, Self::ClaimCommitted, Self::ClaimClaimed],
            Self::ClaimCommitted => &[Self::ClaimClaimed, Self::Expired, Self::Failed],
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
        matches!(self, Self::PrPaid | Self::ClaimCommitted)
    }

    fn requires_signature(self) -> bool {
        matches!(self, Self::PrPaid | Self::ClaimCommitted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FromBtcLnData {
    /// Hex preimage of `payment_hash`; revealed by the claim.
    pub secret: String,
    pub payment_hash: String,
    pub invoice: String,
    pub amount_sats: u64,
    pub token: String,
    pub offerer: String,
    pub token_amount: u64,
    pub security_deposit: u64,
    /// Escrow offered by the intermediary once the invoice is paid.
    pub escrow: Option<EscrowData>,
}

pub struct FromBtcLn;

#[async_trait]
impl SwapFamily for FromBtcLn {
    type State = FromBtcLnState;
    type Data = FromBtcLnData;

    const TYPE: SwapType = SwapType::FromBtcLn;

    fn payment_hash(data: &Self::Data) -> Option<String> {
        Some(data.payment_hash.clone())
    }

    fn matches_event(record: &SwapRecord<Self::Data>, event: &LedgerEvent) -> bool {
        match &record.data.escrow {
            Some(escrow) => matches_escrow(escrow, event),
            None => event
                .escrow_key()
                .is_some_and(|(hash, _)| hash == record.data.payment_hash),
        }
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
        if swap.state() != FromBtcLnState::PrCreated {
            return Ok(false);
        }
        let expiry = swap.snapshot().await.expiry;
        if swap.ctx().clock.now_ms() > expiry {
            swap.transition(FromBtcLnState::QuoteSoftExpired, |_| {}).await
        } else {
            Ok(false)
        }
    }

    async fn on_event(swap: &SwapHandle<Self>, event: &LedgerEvent) -> Result<bool, SwapError> {
        let candidate = match event.clone() {
            LedgerEvent::Claim { tx_id, .. } => {
                Candidate::<FromBtcLn>::new(FromBtcLnState::ClaimClaimed, Evidence::PaidConfirmed)
                    .with(move |r| r.claim_tx_id = Some(tx_id))
            }
            LedgerEvent::Refund { tx_id, .. } => {
                Candidate::<FromBtcLn>::new(FromBtcLnState::Failed, Evidence::NotCommitted)
                    .with(move |r| r.refund_tx_id = Some(tx_id))
            }
            LedgerEvent::Initialize { tx_id, .. } => {
                Candidate::<FromBtcLn>::new(FromBtcLnState::ClaimCommitted, Evidence::Committed)
                    .with(move |r| r.commit_tx_id = Some(tx_id))
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

async fn sync_once(swap: &SwapHandle<FromBtcLn>) -> Result<bool, SwapError> {
    let ctx = swap.ctx();
    let state = swap.state();
    let record = swap.snapshot().await;

    match state {
        FromBtcLnState::PrCreated | FromBtcLnState::QuoteSoftExpired => {
            match payment_candidate(ctx, &record).await {
                Ok(Some(candidate)) => swap.apply_best(vec![candidate]).await,
                Ok(None) => Ok(false),
                Err(err) => Err(ctx.blacklist.note(err)),
            }
        }
        FromBtcLnState::PrPaid => {
            let Some(escrow) = record.data.escrow.as_ref() else {
                return Ok(false);
            };
            match commit_status(ctx, escrow).await? {
                CommitStatus::NotCommitted { .. } => {
                    if authorization_expired(ctx, escrow, record.signature.as_ref()).await? {
                        swap.transition(FromBtcLnState::QuoteExpired, |_| {}).await
                    } else {
                        Ok(false)
                    }
                }
                CommitStatus::Paid { claim_tx_id } => {
                    swap.apply_best(vec![
                        Candidate::<FromBtcLn>::new(FromBtcLnState::ClaimClaimed, Evidence::PaidConfirmed)
                            .with(move |r| r.claim_tx_id = claim_tx_id),
                    ])
                    .await
                }
                _ => {
                    swap.apply_best(vec![Candidate::<FromBtcLn>::new(
                        FromBtcLnState::ClaimCommitted,
                        Evidence::Committed,
                    )])
                    .await
                }
            }
        }
        FromBtcLnState::ClaimCommitted | FromBtcLnState::Expired => {
            let Some(escrow) = record.data.escrow.as_ref() else {
                return Ok(false);
            };
            let candidates = match commit_status(ctx, escrow).await? {
                CommitStatus::Paid { claim_tx_id } => vec![
                    Candidate::<FromBtcLn>::new(FromBtcLnState::ClaimClaimed, Evidence::PaidConfirmed)
                        .with(move |r| r.claim_tx_id = claim_tx_id),
                ],
                CommitStatus::NotCommitted {
                    refund_tx_id: Some(tx_id),
                } => vec![
                    Candidate::<FromBtcLn>::new(FromBtcLnState::Failed, Evidence::NotCommitted)
                        .with(move |r| r.refund_tx_id = Some(tx_id)),
                ],
                // No refund seen yet: the ledger view lags the commit.
                CommitStatus::NotCommitted { refund_tx_id: None } => Vec::new(),
                CommitStatus::Expired | CommitStatus::Refundable => {
                    vec![Candidate::<FromBtcLn>::new(FromBtcLnState::Expired, Evidence::Expired)]
                }
                CommitStatus::Committed => Vec::new(),
            };
            swap.apply_best(candidates).await
        }
        _ => Ok(false),
    }
}

/// Asks the intermediary whether the invoice was paid and, if it hands out
/// an escrow authorization, verifies it before proposing a next state.
async fn payment_candidate(
    ctx: &SwapContext,
    record: &SwapRecord<FromBtcLnData>,
) -> Result<Option<Candidate<FromBtcLn>>, SwapError> {
    let url = record.url.as_str();
    let resp = match ctx
        .retry("payment authorization", || {
            ctx.intermediary
                .payment_authorization(url, &record.data.payment_hash)
        })
        .await
    {
        Ok(resp) => resp,
        Err(err) if err.is_transient() => {
            tracing::warn!(swap_id = %record.id, error = %err, "intermediary status unavailable");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };

    match PaymentAuthorization::parse(url, resp)? {
        PaymentAuthorization::AuthData(auth) => {
            verify_auth_data(ctx, record, &auth, url).await?;
            let AuthorizationData { escrow, signature } = auth;
            let status = commit_status(ctx, &escrow).await?;
            let (state, evidence) = match &status {
                CommitStatus::NotCommitted { .. } => (FromBtcLnState::PrPaid, Evidence::Committed),
                CommitStatus::Paid { .. } => (FromBtcLnState::ClaimClaimed, Evidence::PaidConfirmed),
                _ => (FromBtcLnState::ClaimCommitted, Evidence::Committed),
            };
            Ok(Some(Candidate::<FromBtcLn>::new(state, evidence).with(move |r| {
                r.data.escrow = Some(escrow);
                r.signature = Some(signature);
                if let CommitStatus::Paid { claim_tx_id } = status {
                    r.claim_tx_id = claim_tx_id;
                }
            })))
        }
        PaymentAuthorization::Expired => Ok(Some(Candidate::<FromBtcLn>::new(
            FromBtcLnState::QuoteExpired,
            Evidence::Expired,
        ))),
        PaymentAuthorization::Paid
        | PaymentAuthorization::Pending
        | PaymentAuthorization::AlreadyCommitted => Ok(None),
    }
}

async fn verify_auth_data(
    ctx: &SwapContext,
    record: &SwapRecord<FromBtcLnData>,
    auth: &AuthorizationData,
    url: &str,
) -> Result<(), SwapError> {
    let data = &record.data;
    let escrow = &auth.escrow;
    ensure_quote(escrow.kind == EscrowKind::Htlc, url, || {
        "authorization is not for a hash-locked escrow".into()
    })?;
    ensure_quote(escrow.claim_hash == data.payment_hash, url, || {
        format!("escrow claim hash {} != payment hash {}", escrow.claim_hash, data.payment_hash)
    })?;
    ensure_quote(
        escrow.claimer == record.initiator && escrow.offerer == data.offerer && escrow.token == data.token,
        url,
        || "escrow parties or token differ from the quote".into(),
    )?;
    ensure_quote(escrow.amount >= data.token_amount, url, || {
        format!("escrow amount {} below quoted {}", escrow.amount, data.token_amount)
    })?;
    ensure_quote(escrow.security_deposit <= data.security_deposit, url, || {
        format!(
            "security deposit {} exceeds quoted {}",
            escrow.security_deposit, data.security_deposit
        )
    })?;
    ctx.retry("verify init authorization", || {
        ctx.ledger.verify_init_authorization(escrow, &auth.signature)
    })
    .await
    .map_err(|err| err.blame(url))
}

impl SwapHandle<FromBtcLn> {
    pub async fn invoice(&self) -> String {
        self.snapshot().await.data.invoice
    }

    /// Waits until the intermediary reports the invoice paid and offers an
    /// escrow. Returns whether that happened.
    pub async fn wait_for_payment(&self, cancel: Option<&Cancellation>) -> Result<bool, SwapError> {
        let state = self
            .wait_till_state(FromBtcLnState::PrPaid, WaitOrdering::Gte, cancel)
            .await?;
        Ok(state.code() >= FromBtcLnState::PrPaid.code())
    }

    /// Commits the escrow the intermediary authorized after the payment.
    pub async fn commit(&self) -> Result<String, SwapError> {
        self.expect_state(&[FromBtcLnState::PrPaid], "commit")?;
        let ctx = self.ctx().clone();
        let record = self.snapshot().await;
        let (Some(escrow), Some(signature)) = (record.data.escrow.as_ref(), record.signature.as_ref())
        else {
            return Err(SwapError::precondition("swap has no escrow authorization"));
        };
        if authorization_expired(&ctx, escrow, Some(signature)).await? {
            return Err(SwapError::precondition(format!(
                "authorization for swap {} has expired",
                self.id()
            )));
        }

        self.update(|r| r.initiated = true).await?;
        let tx_id = ctx
            .retry("commit escrow", || ctx.ledger.commit(escrow, signature))
            .await?;
        let commit_tx_id = tx_id.clone();
        self.transition(FromBtcLnState::ClaimCommitted, move |r| {
            r.commit_tx_id = Some(commit_tx_id)
        })
        .await?;
        Ok(tx_id)
    }

    /// Claims the escrow by revealing the secret. A failed claim is a
    /// success if the ledger shows the escrow already paid out; the other
    /// party's claim tx is returned when the ledger names it.
    pub async fn claim(&self) -> Result<Option<String>, SwapError> {
        self.expect_state(&[FromBtcLnState::ClaimCommitted], "claim")?;
        let ctx = self.ctx().clone();
        let record = self.snapshot().await;
        let escrow = record
            .data
            .escrow
            .as_ref()
            .ok_or_else(|| SwapError::precondition("swap has no escrow"))?;

        match ctx
            .retry("claim escrow", || {
                ctx.ledger.claim_with_secret(escrow, &record.data.secret)
            })
            .await
        {
            Ok(tx_id) => {
                let claim_tx_id = tx_id.clone();
                self.transition(FromBtcLnState::ClaimClaimed, move |r| {
                    r.claim_tx_id = Some(claim_tx_id)
                })
                .await?;
                Ok(Some(tx_id))
            }
            Err(err) => match commit_status(&ctx, escrow).await? {
                CommitStatus::Paid { claim_tx_id } => {
                    tracing::info!(swap_id = %self.id(), error = %err, "escrow already claimed by another party");
                    let tx_id = claim_tx_id.clone();
                    self.transition(FromBtcLnState::ClaimClaimed, move |r| {
                        r.claim_tx_id = claim_tx_id
                    })
                    .await?;
                    Ok(tx_id)
                }
                _ => Err(err),
            },
        }
    }
}

impl SwapWrapper<FromBtcLn> {
    /// Generates a fresh secret, requests an invoice for its hash and
    /// persists the verified quote as a new swap.
    pub async fn create(
        &self,
        url: &str,
        amount_sats: u64,
        token: &str,
        claimer: &str,
        market_price_uppm: Option<u64>,
    ) -> Result<Arc<SwapHandle<FromBtcLn>>, SwapError> {
        let ctx = self.ctx();
        ctx.ensure_trusted(url)?;
        let secret = new_secret();
        let payment_hash = hex::encode(sha256_preimage(&secret));
        let req = FromBtcLnQuoteRequest {
            payment_hash: payment_hash.clone(),
            amount_sats,
            token: token.to_owned(),
            claimer: claimer.to_owned(),
            market_price_uppm,
        };
        let quote = ctx
            .retry("from_btcln quote", || ctx.intermediary.from_btcln_quote(url, &req))
            .await?;

        let verified = (|| {
            let invoice = parse_bolt11(&quote.invoice)
                .map_err(|e| SwapError::integrity(Some(url), format!("quote invoice: {e}")))?;
            ensure_quote(hex::encode(invoice.payment_hash) == payment_hash, url, || {
                "invoice does not pay to our payment hash".into()
            })?;
            ensure_quote(invoice.amount_msat == Some(amount_sats * 1000), url, || {
                format!("invoice amount {:?} msat != {amount_sats} sats", invoice.amount_msat)
            })?;
            ensure_quote(
                invoice.expires_at.is_none_or(|at| at > ctx.clock.now_secs()),
                url,
                || "invoice already expired".into(),
            )?;
            ensure_quote(quote.token_amount > 0, url, || "zero token amount".into())?;
            if let Some(max) = ctx.config.max_security_deposit {
                ensure_quote(quote.security_deposit <= max, url, || {
                    format!("security deposit {} exceeds {max}", quote.security_deposit)
                })?;
            }
            PricingInfo::verify(
                &quote.fee,
                amount_sats,
                market_price_uppm,
                ctx.config.max_price_difference_ppm,
                url,
            )
        })();
        let pricing = verified.map_err(|e| ctx.blacklist.note(e))?;

        let record = SwapRecord::new(
            swap_id(&payment_hash),
            SwapType::FromBtcLn,
            FromBtcLnState::PrCreated.code(),
            url,
            claimer,
            pricing,
            None,
            quote.expiry,
            ctx.clock.now_ms(),
            FromBtcLnData {
                secret: hex::encode(secret),
                payment_hash,
                invoice: quote.invoice,
                amount_sats,
                token: token.to_owned(),
                offerer: quote.offerer,
                token_amount: quote.token_amount,
                security_deposit: quote.security_deposit,
                escrow: None,
            },
        );
        self.insert(record).await
    }
}
