use rand::Rng as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::SwapType;
use super::migrate::CURRENT_VERSION;
use super::pricing::PricingInfo;
use crate::error::SwapError;
use crate::ledger::SignatureData;
use crate::storage::StoredSwap;

/// Persisted state of one swap. `data` holds the family-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapRecord<D> {
    pub id: String,
    pub swap_type: SwapType,
    pub state: i32,
    pub version: u32,
    /// Intermediary the swap was quoted by.
    pub url: String,
    /// Smart-chain address of the local party.
    pub initiator: String,
    pub pricing: PricingInfo,
    pub signature: Option<SignatureData>,
    /// Quote expiry, unix milliseconds.
    pub expiry: u64,
    pub commit_tx_id: Option<String>,
    pub claim_tx_id: Option<String>,
    pub refund_tx_id: Option<String>,
    /// Set once the user starts consuming the quote.
    pub initiated: bool,
    /// Unix milliseconds.
    pub created_at: u64,
    pub data: D,
}

impl<D: Serialize + DeserializeOwned> SwapRecord<D> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        swap_type: SwapType,
        state: i32,
        url: &str,
        initiator: &str,
        pricing: PricingInfo,
        signature: Option<SignatureData>,
        expiry: u64,
        created_at: u64,
        data: D,
    ) -> Self {
        Self {
            id,
            swap_type,
            state,
            version: CURRENT_VERSION,
            url: url.to_owned(),
            initiator: initiator.to_owned(),
            pricing,
            signature,
            expiry,
            commit_tx_id: None,
            claim_tx_id: None,
            refund_tx_id: None,
            initiated: false,
            created_at,
            data,
        }
    }

    pub fn to_stored(&self, payment_hash: Option<String>) -> Result<StoredSwap, SwapError> {
        let data = serde_json::to_value(self)
            .map_err(|e| SwapError::storage(anyhow::anyhow!("encode swap {}: {e}", self.id)))?;
        Ok(StoredSwap {
            id: self.id.clone(),
            swap_type: self.swap_type,
            state: self.state,
            version: self.version,
            initiator: self.initiator.clone(),
            payment_hash,
            created_at: self.created_at,
            data,
        })
    }

    /// Decodes a row that has already been brought to the current version.
    /// The indexed columns are authoritative over the JSON document.
    pub fn from_stored(stored: &StoredSwap) -> Result<Self, SwapError> {
        if stored.version != CURRENT_VERSION {
            return Err(SwapError::storage(anyhow::anyhow!(
                "swap {} is at version {}, expected {CURRENT_VERSION}",
                stored.id,
                stored.version
            )));
        }
        let mut record: Self = serde_json::from_value(stored.data.clone())
            .map_err(|e| SwapError::storage(anyhow::anyhow!("decode swap {}: {e}", stored.id)))?;
        record.id = stored.id.clone();
        record.swap_type = stored.swap_type;
        record.state = stored.state;
        record.version = stored.version;
        Ok(record)
    }
}

/// Swap id derived from the payment or claim hash, salted so that
/// re-quotes for the same hash never collide.
pub fn swap_id(hash_hex: &str) -> String {
    let salt: u32 = rand::thread_rng().r#gen();
    format!("{hash_hex}{salt:08x}")
}
