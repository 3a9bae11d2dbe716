//! Intermediary (LP) collaborator.
//!
//! The HTTP transport and payload-schema checks live behind
//! [`IntermediaryApi`]; this module owns the request/response shapes and the
//! closed status-code sets the swap state machines reconcile against.

pub mod codes;

use std::collections::HashSet;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SwapError;
use crate::ledger::{EscrowData, SignatureData};

/// Raw status-endpoint reply; decoded by the types in [`codes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub code: u32,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Fee terms disclosed by the intermediary with every quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    pub base_fee: u64,
    pub fee_ppm: u64,
    pub swap_fee: u64,
    /// Token base units per BTC, scaled by 1e6.
    pub swap_price_uppm: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToBtcQuoteRequest {
    pub address: String,
    pub amount_sats: u64,
    pub confirmations: u32,
    pub nonce: u64,
    pub token: String,
    pub offerer: String,
    pub max_amount_in: Option<u64>,
    pub market_price_uppm: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToBtcQuote {
    pub escrow: EscrowData,
    pub signature: SignatureData,
    pub amount_sats: u64,
    pub fee: FeeQuote,
    pub network_fee: u64,
    /// Unix milliseconds.
    pub expiry: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToBtcLnQuoteRequest {
    pub invoice: String,
    pub token: String,
    pub offerer: String,
    pub max_amount_in: Option<u64>,
    pub market_price_uppm: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToBtcLnQuote {
    pub escrow: EscrowData,
    pub signature: SignatureData,
    pub max_routing_fee_sats: u64,
    pub fee: FeeQuote,
    pub expiry: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FromBtcQuoteRequest {
    pub amount_sats: u64,
    pub token: String,
    pub claimer: String,
    pub sequence: u64,
    pub market_price_uppm: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FromBtcQuote {
    pub escrow: EscrowData,
    pub signature: SignatureData,
    pub btc_address: String,
    pub amount_sats: u64,
    pub fee: FeeQuote,
    pub expiry: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FromBtcLnQuoteRequest {
    pub payment_hash: String,
    pub amount_sats: u64,
    pub token: String,
    pub claimer: String,
    pub market_price_uppm: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FromBtcLnQuote {
    pub invoice: String,
    pub offerer: String,
    pub token_amount: u64,
    pub security_deposit: u64,
    pub fee: FeeQuote,
    pub expiry: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpvVaultQuoteRequest {
    pub recipient: String,
    pub token: String,
    pub amount_sats: u64,
    pub gas_amount: u64,
    pub market_price_uppm: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpvVaultQuote {
    pub quote_id: String,
    pub vault_owner: String,
    pub vault_id: u64,
    /// `txid:vout` the quote expects the withdrawal to spend.
    pub vault_utxo: String,
    pub vault_btc_address: String,
    pub btc_address: String,
    pub amount_sats: u64,
    /// Fee-rate floor in sat/vB.
    pub min_fee_rate: u64,
    pub token_amount: u64,
    pub gas_amount: u64,
    pub required_confirmations: u32,
    pub fee: FeeQuote,
    pub expiry: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LnForGasQuoteRequest {
    pub amount: u64,
    pub recipient: String,
    pub token: String,
    pub market_price_uppm: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LnForGasQuote {
    pub invoice: String,
    pub amount_sats: u64,
    pub token_amount: u64,
    pub fee: FeeQuote,
    pub expiry: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnchainForGasQuoteRequest {
    pub amount: u64,
    pub recipient: String,
    pub token: String,
    pub refund_address: Option<String>,
    pub market_price_uppm: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnchainForGasQuote {
    pub payment_hash: String,
    pub btc_address: String,
    pub amount_sats: u64,
    pub token_amount: u64,
    pub fee: FeeQuote,
    pub expiry: u64,
}

#[async_trait]
pub trait IntermediaryApi: Send + Sync {
    async fn to_btc_quote(&self, url: &str, req: &ToBtcQuoteRequest)
    -> Result<ToBtcQuote, SwapError>;

    async fn to_btcln_quote(
        &self,
        url: &str,
        req: &ToBtcLnQuoteRequest,
    ) -> Result<ToBtcLnQuote, SwapError>;

    async fn from_btc_quote(
        &self,
        url: &str,
        req: &FromBtcQuoteRequest,
    ) -> Result<FromBtcQuote, SwapError>;

    async fn from_btcln_quote(
        &self,
        url: &str,
        req: &FromBtcLnQuoteRequest,
    ) -> Result<FromBtcLnQuote, SwapError>;

    async fn spv_vault_quote(
        &self,
        url: &str,
        req: &SpvVaultQuoteRequest,
    ) -> Result<SpvVaultQuote, SwapError>;

    async fn post_spv_psbt(
        &self,
        url: &str,
        quote_id: &str,
        psbt_hex: &str,
    ) -> Result<(), SwapError>;

    async fn ln_for_gas_quote(
        &self,
        url: &str,
        req: &LnForGasQuoteRequest,
    ) -> Result<LnForGasQuote, SwapError>;

    async fn onchain_for_gas_quote(
        &self,
        url: &str,
        req: &OnchainForGasQuoteRequest,
    ) -> Result<OnchainForGasQuote, SwapError>;

    async fn refund_authorization(
        &self,
        url: &str,
        payment_hash: &str,
        sequence: u64,
    ) -> Result<StatusResponse, SwapError>;

    async fn payment_authorization(
        &self,
        url: &str,
        payment_hash: &str,
    ) -> Result<StatusResponse, SwapError>;

    async fn invoice_status(
        &self,
        url: &str,
        payment_hash: &str,
    ) -> Result<StatusResponse, SwapError>;

    async fn address_status(
        &self,
        url: &str,
        payment_hash: &str,
    ) -> Result<StatusResponse, SwapError>;

    async fn set_refund_address(
        &self,
        url: &str,
        payment_hash: &str,
        address: &str,
    ) -> Result<(), SwapError>;
}

/// Counterparties flagged by integrity or signature errors during this session.
#[derive(Debug, Default)]
pub struct Blacklist {
    urls: RwLock<HashSet<String>>,
}

impl Blacklist {
    pub fn flag(&self, url: &str, reason: &str) {
        let inserted = self
            .urls
            .write()
            .expect("blacklist lock poisoned")
            .insert(url.to_owned());
        if inserted {
            tracing::warn!(url, reason, "counterparty flagged as unreliable");
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls
            .read()
            .expect("blacklist lock poisoned")
            .contains(url)
    }

    /// Flags the counterparty blamed by `err`, if any, and returns `err`.
    pub fn note(&self, err: SwapError) -> SwapError {
        if let Some(url) = err.blamed_counterparty() {
            self.flag(url, &err.to_string());
        }
        err
    }
}
