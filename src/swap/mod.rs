//! Swap lifecycle shared by every family: the state trait, the persisted
//! record, the per-swap handle that applies transitions, and the
//! reconciliation hooks each family implements.

pub mod escrow;
pub mod handle;
pub mod migrate;
pub mod pricing;
pub mod record;
pub mod state;
pub mod trusted;
pub mod vault;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::btc::BitcoinRpc;
use crate::clock::Clock;
use crate::config::SwapConfig;
use crate::error::SwapError;
use crate::intermediary::{Blacklist, IntermediaryApi};
use crate::ledger::{Ledger, LedgerEvent};
use crate::storage::{StoredSwap, SwapStorage};

pub use handle::{Candidate, Evidence, SwapHandle, WaitOrdering};
pub use pricing::PricingInfo;
pub use record::SwapRecord;
pub use state::{StateInfo, SwapState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapType {
    ToBtc,
    #[serde(rename = "to_btcln")]
    ToBtcLn,
    FromBtc,
    #[serde(rename = "from_btcln")]
    FromBtcLn,
    SpvFromBtc,
    LnForGas,
    OnchainForGas,
}

impl SwapType {
    pub const ALL: [SwapType; 7] = [
        Self::ToBtc,
        Self::ToBtcLn,
        Self::FromBtc,
        Self::FromBtcLn,
        Self::SpvFromBtc,
        Self::LnForGas,
        Self::OnchainForGas,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToBtc => "to_btc",
            Self::ToBtcLn => "to_btcln",
            Self::FromBtc => "from_btc",
            Self::FromBtcLn => "from_btcln",
            Self::SpvFromBtc => "spv_from_btc",
            Self::LnForGas => "ln_for_gas",
            Self::OnchainForGas => "onchain_for_gas",
        }
    }

    /// Classification of `code` under this family's state enum.
    pub fn state_info(self, code: i32) -> Option<StateInfo> {
        match self {
            Self::ToBtc | Self::ToBtcLn => state::state_info::<escrow::ToBtcState>(code),
            Self::FromBtc => state::state_info::<escrow::FromBtcState>(code),
            Self::FromBtcLn => state::state_info::<escrow::FromBtcLnState>(code),
            Self::SpvFromBtc => state::state_info::<vault::SpvFromBtcState>(code),
            Self::LnForGas => state::state_info::<trusted::LnForGasState>(code),
            Self::OnchainForGas => state::state_info::<trusted::OnchainForGasState>(code),
        }
    }

    pub fn pending_codes(self) -> Vec<i32> {
        match self {
            Self::ToBtc | Self::ToBtcLn => escrow::ToBtcState::pending_codes(),
            Self::FromBtc => escrow::FromBtcState::pending_codes(),
            Self::FromBtcLn => escrow::FromBtcLnState::pending_codes(),
            Self::SpvFromBtc => vault::SpvFromBtcState::pending_codes(),
            Self::LnForGas => trusted::LnForGasState::pending_codes(),
            Self::OnchainForGas => trusted::OnchainForGasState::pending_codes(),
        }
    }
}

impl fmt::Display for SwapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwapType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown swap type {s:?}"))
    }
}

/// Records that only ever quoted and expired unused, and are older than
/// `retention_ms`, may be removed. Everything else is kept for audit.
pub fn is_prunable(row: &StoredSwap, now_ms: u64, retention_ms: u64) -> bool {
    let quote_expired = row
        .swap_type
        .state_info(row.state)
        .is_some_and(|info| info.quote_expired);
    let initiated = row
        .data
        .get("initiated")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(true);
    quote_expired && !initiated && row.created_at.saturating_add(retention_ms) < now_ms
}

/// Collaborators shared by every swap of every family.
pub struct SwapContext {
    pub storage: Arc<dyn SwapStorage>,
    pub ledger: Arc<dyn Ledger>,
    pub intermediary: Arc<dyn IntermediaryApi>,
    pub bitcoin: Arc<dyn BitcoinRpc>,
    pub clock: Arc<dyn Clock>,
    pub config: SwapConfig,
    pub blacklist: Blacklist,
}

impl SwapContext {
    pub fn new(
        storage: Arc<dyn SwapStorage>,
        ledger: Arc<dyn Ledger>,
        intermediary: Arc<dyn IntermediaryApi>,
        bitcoin: Arc<dyn BitcoinRpc>,
        clock: Arc<dyn Clock>,
        config: SwapConfig,
    ) -> Self {
        Self {
            storage,
            ledger,
            intermediary,
            bitcoin,
            clock,
            config,
            blacklist: Blacklist::default(),
        }
    }

    /// Runs a collaborator call under the configured retry policy.
    pub async fn retry<T, F, Fut>(&self, what: &str, f: F) -> Result<T, SwapError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SwapError>>,
    {
        crate::retry::retry(what, &self.config.retry, None, f).await
    }

    /// Fails fast for counterparties flagged earlier in this session.
    pub fn ensure_trusted(&self, url: &str) -> Result<(), SwapError> {
        if self.blacklist.contains(url) {
            return Err(SwapError::integrity(
                Some(url),
                "counterparty is flagged as unreliable".to_string(),
            ));
        }
        Ok(())
    }
}

/// Emitted on a wrapper's event channel after a transition is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapEvent {
    pub id: String,
    pub swap_type: SwapType,
    pub previous: i32,
    pub state: i32,
}

/// Per-family reconciliation behavior.
///
/// `sync` re-derives the swap's status from the ledger, the intermediary
/// and the Bitcoin chain; `tick` applies purely time-based transitions;
/// `on_event` handles a ledger event routed to this swap. All three return
/// whether a transition was persisted.
#[async_trait]
pub trait SwapFamily: Sized + Send + Sync + 'static {
    type State: SwapState;
    type Data: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    const TYPE: SwapType;

    /// Value of the indexed `payment_hash` column.
    fn payment_hash(data: &Self::Data) -> Option<String>;

    /// `payment_hash` column value of the swaps an event may concern.
    fn event_hash(event: &LedgerEvent) -> Option<String> {
        event.escrow_key().map(|(hash, _)| hash.to_owned())
    }

    fn matches_event(record: &SwapRecord<Self::Data>, event: &LedgerEvent) -> bool {
        Self::event_hash(event).is_some_and(|hash| Self::payment_hash(&record.data) == Some(hash))
    }

    async fn sync(swap: &SwapHandle<Self>) -> Result<bool, SwapError>;

    async fn tick(swap: &SwapHandle<Self>) -> Result<bool, SwapError>;

    async fn on_event(swap: &SwapHandle<Self>, event: &LedgerEvent) -> Result<bool, SwapError> {
        let _ = (swap, event);
        Ok(false)
    }
}
