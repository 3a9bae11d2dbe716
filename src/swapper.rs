//! Top-level entry point holding one wrapper per swap family.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::SwapError;
use crate::quote::{QuoteResult, race_quotes};
use crate::swap::escrow::{FromBtc, FromBtcLn, ToBtcLnSwap, ToBtcSwap};
use crate::swap::trusted::{LnForGas, OnchainForGas};
use crate::swap::vault::SpvFromBtc;
use crate::swap::{SwapContext, SwapEvent, SwapFamily};
use crate::wrapper::SwapWrapper;

pub struct Swapper {
    ctx: Arc<SwapContext>,
    pub to_btc: Arc<SwapWrapper<ToBtcSwap>>,
    pub to_btcln: Arc<SwapWrapper<ToBtcLnSwap>>,
    pub from_btc: Arc<SwapWrapper<FromBtc>>,
    pub from_btcln: Arc<SwapWrapper<FromBtcLn>>,
    pub spv_from_btc: Arc<SwapWrapper<SpvFromBtc>>,
    pub ln_for_gas: Arc<SwapWrapper<LnForGas>>,
    pub onchain_for_gas: Arc<SwapWrapper<OnchainForGas>>,
}

fn wrapper<F: SwapFamily>(ctx: &Arc<SwapContext>) -> Arc<SwapWrapper<F>> {
    let (events, _) = broadcast::channel(ctx.config.event_channel_capacity);
    Arc::new(SwapWrapper::new(ctx.clone(), events))
}

impl Swapper {
    pub fn new(ctx: SwapContext) -> Self {
        let ctx = Arc::new(ctx);
        Self {
            to_btc: wrapper(&ctx),
            to_btcln: wrapper(&ctx),
            from_btc: wrapper(&ctx),
            from_btcln: wrapper(&ctx),
            spv_from_btc: wrapper(&ctx),
            ln_for_gas: wrapper(&ctx),
            onchain_for_gas: wrapper(&ctx),
            ctx,
        }
    }

    pub fn ctx(&self) -> &Arc<SwapContext> {
        &self.ctx
    }

    /// Loads and reconciles the pending swaps of every family.
    pub async fn init(&self) -> Result<usize, SwapError> {
        let loaded = self.to_btc.init().await?
            + self.to_btcln.init().await?
            + self.from_btc.init().await?
            + self.from_btcln.init().await?
            + self.spv_from_btc.init().await?
            + self.ln_for_gas.init().await?
            + self.onchain_for_gas.init().await?;
        Ok(loaded)
    }

    pub fn start(&self) {
        self.to_btc.start();
        self.to_btcln.start();
        self.from_btc.start();
        self.from_btcln.start();
        self.spv_from_btc.start();
        self.ln_for_gas.start();
        self.onchain_for_gas.start();
    }

    pub async fn stop(&self) {
        self.to_btc.stop().await;
        self.to_btcln.stop().await;
        self.from_btc.stop().await;
        self.from_btcln.stop().await;
        self.spv_from_btc.stop().await;
        self.ln_for_gas.stop().await;
        self.onchain_for_gas.stop().await;
    }

    /// Prunes expired, never-initiated quotes of every family.
    pub async fn prune(&self) -> Result<usize, SwapError> {
        Ok(self.to_btc.prune().await?
            + self.to_btcln.prune().await?
            + self.from_btc.prune().await?
            + self.from_btcln.prune().await?
            + self.spv_from_btc.prune().await?
            + self.ln_for_gas.prune().await?
            + self.onchain_for_gas.prune().await?)
    }

    /// Merged state-change stream of every family.
    pub fn subscribe(&self) -> broadcast::Receiver<SwapEvent> {
        let (tx, rx) = broadcast::channel(self.ctx.config.event_channel_capacity);
        forward(self.to_btc.subscribe(), tx.clone());
        forward(self.to_btcln.subscribe(), tx.clone());
        forward(self.from_btc.subscribe(), tx.clone());
        forward(self.from_btcln.subscribe(), tx.clone());
        forward(self.spv_from_btc.subscribe(), tx.clone());
        forward(self.ln_for_gas.subscribe(), tx.clone());
        forward(self.onchain_for_gas.subscribe(), tx);
        rx
    }

    /// Races a quote request across `urls`, skipping counterparties
    /// flagged earlier in this session.
    pub async fn race_quotes<T, F, Fut>(&self, urls: &[String], request: F) -> Vec<QuoteResult<T>>
    where
        T: Send + 'static,
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, SwapError>> + Send + 'static,
    {
        let trusted: Vec<String> = urls
            .iter()
            .filter(|url| !self.ctx.blacklist.contains(url))
            .cloned()
            .collect();
        race_quotes(&trusted, self.ctx.config.quote_race_bound, request).await
    }
}

fn forward(mut rx: broadcast::Receiver<SwapEvent>, tx: broadcast::Sender<SwapEvent>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "swap event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
