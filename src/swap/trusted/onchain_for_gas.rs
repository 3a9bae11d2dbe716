use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Payout, payout_status};
use crate::btc::parse_address;
use crate::cancel::Cancellation;
use crate::error::SwapError;
use crate::intermediary::OnchainForGasQuoteRequest;
use crate::intermediary::codes::{AddressPaymentData, AddressStatus};
use crate::ledger::LedgerEvent;
use crate::swap::escrow::ensure_quote;
use crate::swap::record::swap_id;
use crate::swap::state::swap_states;
use crate::swap::{
    Candidate, Evidence, PricingInfo, SwapFamily, SwapHandle, SwapRecord, SwapState, SwapType,
    WaitOrdering,
};
use crate::wrapper::SwapWrapper;

swap_states! {
    /// Gas top-up paid to a Bitcoin address controlled by the intermediary.
    pub enum OnchainForGasState {
        Failed = -4 => "FAILED",
        Expired = -3 => "EXPIRED",
        Refunded = -2 => "REFUNDED",
        Refundable = -1 => "REFUNDABLE",
        PrCreated = 0 => "PR_CREATED",
        PrPaid = 1 => "PR_PAID",
        Finished = 2 => "FINISHED",
    }
}

impl SwapState for OnchainForGasState {
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
                Self::PrPaid,
                Self::Finished,
                Self::Expired,
                Self::Refundable,
                Self::Refunded,
                Self::Failed,
            ],
            Self::PrPaid => &[
                Self::Finished,
                Self::Refundable,
                Self::Refunded,
                Self::Failed,
            ],
            Self::Refundable => &[Self::Refunded],
            Self::Failed | Self::Expired | Self::Refunded | Self::Finished => &[],
        }
    }

    fn is_successful(self) -> bool {
        self == Self::Finished
    }

    fn is_failed(self) -> bool {
        matches!(self, Self::Failed | Self::Refunded)
    }

    fn is_quote_expired(self) -> bool {
        self == Self::Expired
    }

    fn is_refundable(self) -> bool {
        self == Self::Refundable
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnchainForGasData {
    pub payment_hash: String,
    pub btc_address: String,
    pub amount_sats: u64,
    pub token: String,
    pub token_amount: u64,
    pub recipient: String,
    /// Where the intermediary returns the Bitcoin if it cannot pay out.
    pub refund_address: Option<String>,
    pub btc_tx_id: Option<String>,
    pub refund_btc_tx_id: Option<String>,
}

pub struct OnchainForGas;

#[async_trait]
impl SwapFamily for OnchainForGas {
    type State = OnchainForGasState;
    type Data = OnchainForGasData;

    const TYPE: SwapType = SwapType::OnchainForGas;

    fn payment_hash(data: &Self::Data) -> Option<String> {
        Some(data.payment_hash.clone())
    }

    fn event_hash(_event: &LedgerEvent) -> Option<String> {
        None
    }

    async fn sync(swap: &SwapHandle<Self>) -> Result<bool, SwapError> {
        let state = swap.state();
        if state.is_terminal() {
            return Ok(false);
        }
        let ctx = swap.ctx();
        let record = swap.snapshot().await;
        let url = record.url.as_str();
        let resp = ctx
            .retry("address status", || {
                ctx.intermediary.address_status(url, &record.data.payment_hash)
            })
            .await?;
        let status = AddressStatus::parse(url, resp).map_err(|e| ctx.blacklist.note(e))?;

        let candidate = match status {
            AddressStatus::AwaitPayment => return Ok(false),
            AddressStatus::AwaitConfirmation(data) | AddressStatus::Pending(data) => {
                Candidate::<OnchainForGas>::new(OnchainForGasState::PrPaid, Evidence::Committed)
                    .with(move |r| note_btc_tx(r, data))
            }
            AddressStatus::Paid(data) | AddressStatus::TxSent(data) => {
                let payout = match data.tx_id.as_deref() {
                    Some(tx_id) => payout_status(ctx, tx_id).await?,
                    None => Payout::InFlight,
                };
                match payout {
                    Payout::Settled => {
                        Candidate::<OnchainForGas>::new(OnchainForGasState::Finished, Evidence::PaidConfirmed)
                            .with(move |r| {
                                r.claim_tx_id = data.tx_id.clone();
                                note_btc_tx(r, data);
                            })
                    }
                    Payout::Reverted => {
                        tracing::warn!(swap_id = %swap.id(), tx_id = ?data.tx_id, "gas payout reverted");
                        Candidate::<OnchainForGas>::new(OnchainForGasState::Failed, Evidence::PaidConfirmed)
                    }
                    Payout::InFlight => {
                        Candidate::<OnchainForGas>::new(OnchainForGasState::PrPaid, Evidence::Committed)
                            .with(move |r| note_btc_tx(r, data))
                    }
                }
            }
            AddressStatus::Refundable(data) => {
                Candidate::<OnchainForGas>::new(OnchainForGasState::Refundable, Evidence::Committed)
                    .with(move |r| note_btc_tx(r, data))
            }
            AddressStatus::Refunded(data) => {
                Candidate::<OnchainForGas>::new(OnchainForGasState::Refunded, Evidence::PaidConfirmed)
                    .with(move |r| r.data.refund_btc_tx_id = data.btc_tx_id)
            }
            AddressStatus::DoubleSpent(_) => {
                Candidate::<OnchainForGas>::new(OnchainForGasState::Failed, Evidence::NotCommitted)
            }
            AddressStatus::Expired if state == OnchainForGasState::PrCreated => {
                Candidate::<OnchainForGas>::new(OnchainForGasState::Expired, Evidence::Expired)
            }
            AddressStatus::Expired => Candidate::<OnchainForGas>::new(OnchainForGasState::Failed, Evidence::Expired),
        };
        swap.apply_best(vec![candidate]).await
    }

    async fn tick(_swap: &SwapHandle<Self>) -> Result<bool, SwapError> {
        Ok(false)
    }
}

fn note_btc_tx(record: &mut SwapRecord<OnchainForGasData>, data: AddressPaymentData) {
    if data.btc_tx_id.is_some() {
        record.data.btc_tx_id = data.btc_tx_id;
    }
}

impl SwapHandle<OnchainForGas> {
    /// Address and amount the user must pay.
    pub async fn payment_details(&self) -> (String, u64) {
        let data = self.snapshot().await.data;
        (data.btc_address, data.amount_sats)
    }

    pub async fn wait_for_payment(&self, cancel: Option<&Cancellation>) -> Result<bool, SwapError> {
        let state = self
            .wait_till_state(OnchainForGasState::Finished, WaitOrdering::Eq, cancel)
            .await?;
        Ok(state == OnchainForGasState::Finished)
    }

    /// Tells the intermediary where to return the Bitcoin of a payment it
    /// could not honor.
    pub async fn set_refund_address(&self, address: &str) -> Result<(), SwapError> {
        self.expect_state(&[OnchainForGasState::Refundable], "set refund address")?;
        let ctx = self.ctx().clone();
        parse_address(address, ctx.config.network, None)
            .map_err(|e| SwapError::precondition(format!("refund address: {e}")))?;
        let record = self.snapshot().await;
        let url = record.url.as_str();
        ctx.retry("set refund address", || {
            ctx.intermediary
                .set_refund_address(url, &record.data.payment_hash, address)
        })
        .await?;
        self.update(|r| r.data.refund_address = Some(address.to_owned()))
            .await
    }
}

impl SwapWrapper<OnchainForGas> {
    pub async fn create(
        &self,
        url: &str,
        req: &OnchainForGasQuoteRequest,
    ) -> Result<Arc<SwapHandle<OnchainForGas>>, SwapError> {
        let ctx = self.ctx();
        ctx.ensure_trusted(url)?;
        if let Some(refund) = req.refund_address.as_deref() {
            parse_address(refund, ctx.config.network, None)
                .map_err(|e| SwapError::precondition(format!("refund address: {e}")))?;
        }
        let quote = ctx
            .retry("onchain for gas quote", || {
                ctx.intermediary.onchain_for_gas_quote(url, req)
            })
            .await?;

        let verified = (|| {
            parse_address(&quote.btc_address, ctx.config.network, Some(url))?;
            let hash_ok = hex::decode(&quote.payment_hash).is_ok_and(|raw| raw.len() == 32);
            ensure_quote(hash_ok, url, || {
                format!("payment hash {:?} is not 32 hex bytes", quote.payment_hash)
            })?;
            ensure_quote(quote.amount_sats == req.amount, url, || {
                format!("amount {} differs from requested {}", quote.amount_sats, req.amount)
            })?;
            PricingInfo::verify(
                &quote.fee,
                quote.amount_sats,
                req.market_price_uppm,
                ctx.config.max_price_difference_ppm,
                url,
            )
        })();
        let pricing = verified.map_err(|e| ctx.blacklist.note(e))?;

        let record = SwapRecord::new(
            swap_id(&quote.payment_hash),
            SwapType::OnchainForGas,
            OnchainForGasState::PrCreated.code(),
            url,
            &req.recipient,
            pricing,
            None,
            quote.expiry,
            ctx.clock.now_ms(),
            OnchainForGasData {
                payment_hash: quote.payment_hash,
                btc_address: quote.btc_address,
                amount_sats: quote.amount_sats,
                token: req.token.clone(),
                token_amount: quote.token_amount,
                recipient: req.recipient.clone(),
                refund_address: req.refund_address.clone(),
                btc_tx_id: None,
                refund_btc_tx_id: None,
            },
        );
        self.insert(record).await
    }
}
