use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use lp_swap::SwapError;
use lp_swap::intermediary::{
    FromBtcLnQuote, FromBtcLnQuoteRequest, FromBtcQuote, FromBtcQuoteRequest, IntermediaryApi,
    LnForGasQuote, LnForGasQuoteRequest, OnchainForGasQuote, OnchainForGasQuoteRequest,
    SpvVaultQuote, SpvVaultQuoteRequest, StatusResponse, ToBtcLnQuote, ToBtcLnQuoteRequest,
    ToBtcQuote, ToBtcQuoteRequest,
};

/// Intermediary that replays whatever quotes and statuses the test set.
#[derive(Default)]
pub struct MockIntermediary {
    pub to_btc: Mutex<Option<ToBtcQuote>>,
    pub to_btcln: Mutex<Option<ToBtcLnQuote>>,
    pub from_btc: Mutex<Option<FromBtcQuote>>,
    pub from_btcln: Mutex<Option<FromBtcLnQuote>>,
    pub spv_vault: Mutex<Option<SpvVaultQuote>>,
    pub ln_for_gas: Mutex<Option<LnForGasQuote>>,
    pub onchain_for_gas: Mutex<Option<OnchainForGasQuote>>,
    statuses: Mutex<HashMap<String, StatusResponse>>,
    decline_psbt: Mutex<bool>,
    lose_post_responses: Mutex<bool>,
    posted: Mutex<Vec<(String, String)>>,
    refund_addresses: Mutex<Vec<(String, String)>>,
    status_calls: AtomicUsize,
    status_delay: Mutex<Duration>,
}

impl MockIntermediary {
    /// Status returned by every status endpoint for `payment_hash`.
    pub fn set_status(&self, payment_hash: &str, code: u32, data: Option<serde_json::Value>) {
        self.statuses.lock().unwrap().insert(
            payment_hash.to_owned(),
            StatusResponse {
                code,
                msg: String::new(),
                data,
            },
        );
    }

    pub fn decline_psbts(&self) {
        *self.decline_psbt.lock().unwrap() = true;
    }

    /// Accepts posted withdrawals but times out before answering.
    pub fn lose_post_responses(&self) {
        *self.lose_post_responses.lock().unwrap() = true;
    }

    pub fn posted(&self) -> Vec<(String, String)> {
        self.posted.lock().unwrap().clone()
    }

    pub fn refund_addresses(&self) -> Vec<(String, String)> {
        self.refund_addresses.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Delays every status answer, like an overloaded intermediary.
    pub fn slow_statuses(&self, by: Duration) {
        *self.status_delay.lock().unwrap() = by;
    }

    async fn status(&self, payment_hash: &str) -> Result<StatusResponse, SwapError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.status_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.statuses
            .lock()
            .unwrap()
            .get(payment_hash)
            .cloned()
            .ok_or_else(|| SwapError::transient(format!("no status for {payment_hash}")))
    }
}

fn quote<T: Clone>(slot: &Mutex<Option<T>>) -> Result<T, SwapError> {
    slot.lock()
        .unwrap()
        .clone()
        .ok_or_else(|| SwapError::transient("no quote configured"))
}

#[async_trait]
impl IntermediaryApi for MockIntermediary {
    async fn to_btc_quote(&self, _url: &str, _req: &ToBtcQuoteRequest) -> Result<ToBtcQuote, SwapError> {
        quote(&self.to_btc)
    }

    async fn to_btcln_quote(
        &self,
        _url: &str,
        _req: &ToBtcLnQuoteRequest,
    ) -> Result<ToBtcLnQuote, SwapError> {
        quote(&self.to_btcln)
    }

    async fn from_btc_quote(
        &self,
        _url: &str,
        _req: &FromBtcQuoteRequest,
    ) -> Result<FromBtcQuote, SwapError> {
        quote(&self.from_btc)
    }

    async fn from_btcln_quote(
        &self,
        _url: &str,
        req: &FromBtcLnQuoteRequest,
    ) -> Result<FromBtcLnQuote, SwapError> {
        let mut quote = quote(&self.from_btcln)?;
        if quote.invoice.is_empty() {
            quote.invoice = super::invoice(&req.payment_hash, req.amount_sats);
        }
        Ok(quote)
    }

    async fn spv_vault_quote(
        &self,
        _url: &str,
        _req: &SpvVaultQuoteRequest,
    ) -> Result<SpvVaultQuote, SwapError> {
        quote(&self.spv_vault)
    }

    async fn post_spv_psbt(&self, url: &str, quote_id: &str, psbt_hex: &str) -> Result<(), SwapError> {
        if *self.decline_psbt.lock().unwrap() {
            return Err(SwapError::integrity(Some(url), "withdrawal rejected"));
        }
        self.posted
            .lock()
            .unwrap()
            .push((quote_id.to_owned(), psbt_hex.to_owned()));
        if *self.lose_post_responses.lock().unwrap() {
            return Err(SwapError::transient("post response timed out"));
        }
        Ok(())
    }

    async fn ln_for_gas_quote(
        &self,
        _url: &str,
        _req: &LnForGasQuoteRequest,
    ) -> Result<LnForGasQuote, SwapError> {
        quote(&self.ln_for_gas)
    }

    async fn onchain_for_gas_quote(
        &self,
        _url: &str,
        _req: &OnchainForGasQuoteRequest,
    ) -> Result<OnchainForGasQuote, SwapError> {
        quote(&self.onchain_for_gas)
    }

    async fn refund_authorization(
        &self,
        _url: &str,
        payment_hash: &str,
        _sequence: u64,
    ) -> Result<StatusResponse, SwapError> {
        self.status(payment_hash).await
    }

    async fn payment_authorization(
        &self,
        _url: &str,
        payment_hash: &str,
    ) -> Result<StatusResponse, SwapError> {
        self.status(payment_hash).await
    }

    async fn invoice_status(&self, _url: &str, payment_hash: &str) -> Result<StatusResponse, SwapError> {
        self.status(payment_hash).await
    }

    async fn address_status(&self, _url: &str, payment_hash: &str) -> Result<StatusResponse, SwapError> {
        self.status(payment_hash).await
    }

    async fn set_refund_address(
        &self,
        _url: &str,
        payment_hash: &str,
        address: &str,
    ) -> Result<(), SwapError> {
        self.refund_addresses
            .lock()
            .unwrap()
            .push((payment_hash.to_owned(), address.to_owned()));
        Ok(())
    }
}
