use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Payout, payout_status};
use crate::cancel::Cancellation;
use crate::error::SwapError;
use crate::intermediary::LnForGasQuoteRequest;
use crate::intermediary::codes::InvoiceStatus;
use crate::ledger::LedgerEvent;
use crate::lightning::parse_bolt11;
use crate::swap::escrow::ensure_quote;
use crate::swap::record::swap_id;
use crate::swap::state::swap_states;
use crate::swap::{
    Candidate, Evidence, PricingInfo, SwapFamily, SwapHandle, SwapRecord, SwapState, SwapType,
    WaitOrdering,
};
use crate::wrapper::SwapWrapper;

swap_states! {
    /// Gas top-up paid with a Lightning invoice issued by the intermediary.
    pub enum LnForGasState {
        Failed = -2 => "FAILED",
        Expired = -1 => "EXPIRED",
        PrCreated = 0 => "PR_CREATED",
        PrPaid = 1 => "PR_PAID",
        Finished = 2 => "FINISHED",
    }
}

impl SwapState for LnForGasState {
    const ALL: &'static [Self] = Self::VARIANTS;

    fn code(self) -> i32 {
        self as i32
    }

    fn label(self) -> &'static str {
        self.as_str()
    }

    fn next_states(self) -> &'static [Self] {
        match self {
            Self::PrCreated => &[Self::PrPaid, Self::Finished, Self::Expired, Self::Failed],
            Self::PrPaid => &[Self::Finished, Self::Failed],
            Self::Failed | Self::Expired | Self::Finished => &[],
        }
    }

    fn is_successful(self) -> bool {
        self == Self::Finished
    }

    fn is_failed(self) -> bool {
        self == Self::Failed
    }

    fn is_quote_expired(self) -> bool {
        self == Self::Expired
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnForGasData {
    pub invoice: String,
    pub payment_hash: String,
    pub amount_sats: u64,
    pub token: String,
    pub token_amount: u64,
    pub recipient: String,
}

pub struct LnForGas;

#[async_trait]
impl SwapFamily for LnForGas {
    type State = LnForGasState;
    type Data = LnForGasData;

    const TYPE: SwapType = SwapType::LnForGas;

    fn payment_hash(data: &Self::Data) -> Option<String> {
        Some(data.payment_hash.clone())
    }

    fn event_hash(_event: &LedgerEvent) -> Option<String> {
        None
    }

    async fn sync(swap: &SwapHandle<Self>) -> Result<bool, SwapError> {
        if swap.state().is_terminal() {
            return Ok(false);
        }
        let ctx = swap.ctx();
        let record = swap.snapshot().await;
        let url = record.url.as_str();
        let resp = ctx
            .retry("invoice status", || {
                ctx.intermediary.invoice_status(url, &record.data.payment_hash)
            })
            .await?;
        let status = InvoiceStatus::parse(url, resp).map_err(|e| ctx.blacklist.note(e))?;

        let candidate = match status {
            InvoiceStatus::AwaitPayment => return Ok(false),
            InvoiceStatus::Pending => Candidate::<LnForGas>::new(LnForGasState::PrPaid, Evidence::Committed),
            InvoiceStatus::Paid(data) | InvoiceStatus::TxSent(data) => {
                match payout_status(ctx, &data.tx_id).await? {
                    Payout::Settled => {
                        Candidate::<LnForGas>::new(LnForGasState::Finished, Evidence::PaidConfirmed)
                            .with(move |r| r.claim_tx_id = Some(data.tx_id))
                    }
                    Payout::Reverted => {
                        tracing::warn!(swap_id = %swap.id(), tx_id = %data.tx_id, "gas payout reverted");
                        Candidate::<LnForGas>::new(LnForGasState::Failed, Evidence::PaidConfirmed)
                    }
                    Payout::InFlight => Candidate::<LnForGas>::new(LnForGasState::PrPaid, Evidence::Committed),
                }
            }
            InvoiceStatus::Expired if swap.state() == LnForGasState::PrCreated => {
                Candidate::<LnForGas>::new(LnForGasState::Expired, Evidence::Expired)
            }
            InvoiceStatus::Expired => Candidate::<LnForGas>::new(LnForGasState::Failed, Evidence::Expired),
        };
        swap.apply_best(vec![candidate]).await
    }

    /// Invoice expiry is only ever reported by the intermediary; a payment
    /// may still be settling after the local deadline.
    async fn tick(_swap: &SwapHandle<Self>) -> Result<bool, SwapError> {
        Ok(false)
    }
}

impl SwapHandle<LnForGas> {
    pub async fn invoice(&self) -> String {
        self.snapshot().await.data.invoice
    }

    /// Waits until the gas payout settles or the swap fails; returns
    /// whether it finished.
    pub async fn wait_for_payment(&self, cancel: Option<&Cancellation>) -> Result<bool, SwapError> {
        let state = self
            .wait_till_state(LnForGasState::Finished, WaitOrdering::Eq, cancel)
            .await?;
        Ok(state == LnForGasState::Finished)
    }
}

impl SwapWrapper<LnForGas> {
    pub async fn create(
        &self,
        url: &str,
        req: &LnForGasQuoteRequest,
    ) -> Result<Arc<SwapHandle<LnForGas>>, SwapError> {
        let ctx = self.ctx();
        ctx.ensure_trusted(url)?;
        let quote = ctx
            .retry("ln for gas quote", || ctx.intermediary.ln_for_gas_quote(url, req))
            .await?;

        let verified = (|| {
            let invoice = parse_bolt11(&quote.invoice)
                .map_err(|e| SwapError::integrity(Some(url), format!("invalid invoice: {e}")))?;
            ensure_quote(
                invoice.amount_msat == Some(quote.amount_sats.saturating_mul(1_000)),
                url,
                || {
                    format!(
                        "invoice amount {:?} msat differs from {} sats",
                        invoice.amount_msat, quote.amount_sats
                    )
                },
            )?;
            ensure_quote(quote.amount_sats == req.amount, url, || {
                format!("amount {} differs from requested {}", quote.amount_sats, req.amount)
            })?;
            let pricing = PricingInfo::verify(
                &quote.fee,
                quote.amount_sats,
                req.market_price_uppm,
                ctx.config.max_price_difference_ppm,
                url,
            )?;
            Ok::<_, SwapError>((hex::encode(invoice.payment_hash), pricing))
        })();
        let (payment_hash, pricing) = verified.map_err(|e| ctx.blacklist.note(e))?;

        let record = SwapRecord::new(
            swap_id(&payment_hash),
            SwapType::LnForGas,
            LnForGasState::PrCreated.code(),
            url,
            &req.recipient,
            pricing,
            None,
            quote.expiry,
            ctx.clock.now_ms(),
            LnForGasData {
                invoice: quote.invoice,
                payment_hash,
                amount_sats: quote.amount_sats,
                token: req.token.clone(),
                token_amount: quote.token_amount,
                recipient: req.recipient.clone(),
            },
        );
        self.insert(record).await
    }
}
