#![allow(dead_code)]

pub mod chain;
pub mod fixtures;
pub mod intermediary;
pub mod ledger;
pub mod wait;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bitcoin::Network;
use bitcoin::hashes::{Hash as _, sha256};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use lightning_invoice::{Currency, InvoiceBuilder, PaymentSecret};
use tokio::sync::broadcast;

use lp_swap::clock::Clock;
use lp_swap::config::SwapConfig;
use lp_swap::intermediary::FeeQuote;
use lp_swap::ledger::{EscrowData, EscrowKind, SignatureData};
use lp_swap::retry::RetryPolicy;
use lp_swap::storage::{MemorySwapStorage, QueryParam, StoredSwap, SwapStorage};
use lp_swap::swap::pricing::swap_fee;
use lp_swap::swap::{SwapContext, SwapFamily};
use lp_swap::wrapper::SwapWrapper;

use self::chain::MockBitcoin;
use self::intermediary::MockIntermediary;
use self::ledger::MockLedger;

pub const LP_URL: &str = "https://lp.example";
/// 2023-11-14T22:13:20Z.
pub const START_MS: u64 = 1_700_000_000_000;

#[derive(Debug)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn set(&self, ms: u64) {
        self.0.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Memory storage that counts writes per swap id.
#[derive(Default)]
pub struct CountingStorage {
    inner: MemorySwapStorage,
    saves: Mutex<HashMap<String, usize>>,
}

impl CountingStorage {
    pub fn saves(&self, id: &str) -> usize {
        self.saves.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    pub async fn row(&self, id: &str) -> Option<StoredSwap> {
        self.inner
            .query(&[vec![QueryParam::id(id)]])
            .await
            .unwrap()
            .into_iter()
            .next()
    }
}

#[async_trait]
impl SwapStorage for CountingStorage {
    async fn save(&self, swap: &StoredSwap) -> Result<()> {
        *self.saves.lock().unwrap().entry(swap.id.clone()).or_default() += 1;
        self.inner.save(swap).await
    }

    async fn save_all(&self, swaps: &[StoredSwap]) -> Result<()> {
        for swap in swaps {
            self.save(swap).await?;
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.inner.remove(id).await
    }

    async fn remove_all(&self, ids: &[String]) -> Result<()> {
        self.inner.remove_all(ids).await
    }

    async fn query(&self, groups: &[Vec<QueryParam>]) -> Result<Vec<StoredSwap>> {
        self.inner.query(groups).await
    }
}

pub struct Harness {
    pub ctx: Arc<SwapContext>,
    pub ledger: Arc<MockLedger>,
    pub lp: Arc<MockIntermediary>,
    pub btc: Arc<MockBitcoin>,
    pub clock: Arc<ManualClock>,
    pub storage: Arc<CountingStorage>,
}

pub fn test_config() -> SwapConfig {
    SwapConfig {
        network: Network::Regtest,
        tick_interval: Duration::from_millis(10),
        sync_interval: Duration::from_millis(20),
        watchdog_interval: Duration::from_millis(20),
        retry: RetryPolicy {
            attempts: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        },
        quote_race_bound: Duration::from_millis(50),
        ..SwapConfig::default()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_storage(Arc::new(CountingStorage::default()))
    }

    /// A fresh context over `storage`, as after a restart.
    pub fn with_storage(storage: Arc<CountingStorage>) -> Self {
        let ledger = Arc::new(MockLedger::default());
        let lp = Arc::new(MockIntermediary::default());
        let btc = Arc::new(MockBitcoin::default());
        let clock = Arc::new(ManualClock(AtomicU64::new(START_MS)));
        let ctx = Arc::new(SwapContext::new(
            storage.clone(),
            ledger.clone(),
            lp.clone(),
            btc.clone(),
            clock.clone(),
            test_config(),
        ));
        Self {
            ctx,
            ledger,
            lp,
            btc,
            clock,
            storage,
        }
    }

    pub fn wrapper<F: SwapFamily>(&self) -> Arc<SwapWrapper<F>> {
        let (events, _) = broadcast::channel(64);
        Arc::new(SwapWrapper::new(self.ctx.clone(), events))
    }

    pub fn now_secs(&self) -> u64 {
        self.clock.now_secs()
    }
}

/// Fee terms whose `swap_fee` is exactly what `amount_sats` costs.
pub fn fee_quote(amount_sats: u64) -> FeeQuote {
    FeeQuote {
        base_fee: 10,
        fee_ppm: 1_000,
        swap_fee: swap_fee(10, 1_000, amount_sats).unwrap(),
        swap_price_uppm: 2_000_000,
    }
}

pub fn signature(timeout_secs: u64) -> SignatureData {
    SignatureData {
        prefix: "initialize".into(),
        timeout: timeout_secs,
        signature: "sig".into(),
    }
}

pub fn escrow(kind: EscrowKind, claim_hash: &str) -> EscrowData {
    EscrowData {
        kind,
        offerer: "0xuser".into(),
        claimer: "0xlp".into(),
        token: "0xtoken".into(),
        amount: 50_000,
        claim_hash: claim_hash.to_owned(),
        sequence: 7,
        expiry: START_MS / 1000 + 86_400,
        confirmations: 2,
        nonce: 42,
        security_deposit: 0,
        claimer_bounty: 0,
    }
}

/// Signed regtest BOLT11 invoice for `payment_hash_hex`, issued at `START_MS`.
pub fn invoice(payment_hash_hex: &str, amount_sats: u64) -> String {
    let hash = sha256::Hash::from_slice(&hex::decode(payment_hash_hex).unwrap()).unwrap();
    let key = SecretKey::from_slice(&[0x42; 32]).unwrap();
    let secp = Secp256k1::new();
    InvoiceBuilder::new(Currency::Regtest)
        .description("swap".into())
        .payment_hash(hash)
        .payment_secret(PaymentSecret([7; 32]))
        .duration_since_epoch(Duration::from_millis(START_MS))
        .min_final_cltv_expiry_delta(144)
        .amount_milli_satoshis(amount_sats * 1_000)
        .build_signed(|msg| secp.sign_ecdsa_recoverable(msg, &key))
        .unwrap()
        .to_string()
}
