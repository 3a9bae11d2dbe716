//! Abstract smart-chain ledger holding the hash-locked escrows and the SPV
//! vaults. Concrete chain bindings implement [`Ledger`]; the swap state
//! machines only ever talk to this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::SwapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowKind {
    /// Claimable with a hash preimage (Lightning payment hash).
    Htlc,
    /// Claimable with proof of a Bitcoin output (nonced txo hash).
    ChainNonced,
}

/// On-chain escrow parameters, as signed by the intermediary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowData {
    pub kind: EscrowKind,
    pub offerer: String,
    pub claimer: String,
    pub token: String,
    pub amount: u64,
    /// Hex-encoded 32-byte hash the claim must satisfy.
    pub claim_hash: String,
    pub sequence: u64,
    /// Unix seconds after which the offerer may refund.
    pub expiry: u64,
    pub confirmations: u32,
    pub nonce: u64,
    pub security_deposit: u64,
    pub claimer_bounty: u64,
}

impl EscrowData {
    /// Key identifying this escrow in ledger events.
    pub fn escrow_key(&self) -> (String, u64) {
        (self.claim_hash.clone(), self.sequence)
    }
}

/// Counterparty authorization for an escrow action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureData {
    pub prefix: String,
    /// Unix seconds after which the authorization is void.
    pub timeout: u64,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitStatus {
    NotCommitted { refund_tx_id: Option<String> },
    Committed,
    Paid { claim_tx_id: Option<String> },
    Expired,
    Refundable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    NotFound,
    Pending,
    Success,
    Reverted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerAction {
    Commit,
    Claim,
    Refund,
    VaultClaim,
}

/// Last confirmed on-chain state of an SPV vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultState {
    pub owner: String,
    pub vault_id: u64,
    /// `txid:vout` of the vault UTXO the ledger last saw confirmed.
    pub utxo: String,
    pub btc_address: String,
    pub confirmations: u32,
    pub tokens: [String; 2],
    pub multipliers: [u64; 2],
    /// Raw (unscaled) balances of both vault tokens.
    pub balances: [u64; 2],
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawalState {
    NotFound,
    Fronted { fronter: String, tx_id: String },
    Claimed { claimer: String, tx_id: String },
    Closed { tx_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    Initialize {
        claim_hash: String,
        sequence: u64,
        tx_id: String,
    },
    Claim {
        claim_hash: String,
        sequence: u64,
        tx_id: String,
        /// Hex secret or Bitcoin txid revealed by the claim.
        result: Option<String>,
    },
    Refund {
        claim_hash: String,
        sequence: u64,
        tx_id: String,
    },
    VaultFront {
        owner: String,
        vault_id: u64,
        btc_tx_id: String,
        tx_id: String,
    },
    VaultClaim {
        owner: String,
        vault_id: u64,
        btc_tx_id: String,
        tx_id: String,
    },
    VaultClose {
        owner: String,
        vault_id: u64,
        btc_tx_id: Option<String>,
        tx_id: String,
    },
}

impl LedgerEvent {
    pub fn escrow_key(&self) -> Option<(&str, u64)> {
        match self {
            Self::Initialize {
                claim_hash,
                sequence,
                ..
            }
            | Self::Claim {
                claim_hash,
                sequence,
                ..
            }
            | Self::Refund {
                claim_hash,
                sequence,
                ..
            } => Some((claim_hash.as_str(), *sequence)),
            _ => None,
        }
    }

    pub fn vault_key(&self) -> Option<(&str, u64)> {
        match self {
            Self::VaultFront {
                owner, vault_id, ..
            }
            | Self::VaultClaim {
                owner, vault_id, ..
            }
            | Self::VaultClose {
                owner, vault_id, ..
            } => Some((owner.as_str(), *vault_id)),
            _ => None,
        }
    }

    pub fn tx_id(&self) -> &str {
        match self {
            Self::Initialize { tx_id, .. }
            | Self::Claim { tx_id, .. }
            | Self::Refund { tx_id, .. }
            | Self::VaultFront { tx_id, .. }
            | Self::VaultClaim { tx_id, .. }
            | Self::VaultClose { tx_id, .. } => tx_id,
        }
    }
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn commit_status(&self, escrow: &EscrowData) -> Result<CommitStatus, SwapError>;

    /// Fails with [`SwapError::InvalidSignature`] when `signature` does not
    /// authorize initializing `escrow`.
    async fn verify_init_authorization(
        &self,
        escrow: &EscrowData,
        signature: &SignatureData,
    ) -> Result<(), SwapError>;

    async fn is_authorization_expired(
        &self,
        escrow: &EscrowData,
        signature: &SignatureData,
    ) -> Result<bool, SwapError>;

    async fn verify_refund_authorization(
        &self,
        escrow: &EscrowData,
        signature: &SignatureData,
    ) -> Result<(), SwapError>;

    async fn tx_status(&self, tx_id: &str) -> Result<TxStatus, SwapError>;

    async fn estimate_fee(&self, action: LedgerAction) -> Result<u64, SwapError>;

    async fn commit(
        &self,
        escrow: &EscrowData,
        signature: &SignatureData,
    ) -> Result<String, SwapError>;

    async fn claim_with_secret(&self, escrow: &EscrowData, secret: &str)
    -> Result<String, SwapError>;

    async fn claim_with_btc_tx(
        &self,
        escrow: &EscrowData,
        btc_tx_id: &str,
    ) -> Result<String, SwapError>;

    async fn refund(&self, escrow: &EscrowData) -> Result<String, SwapError>;

    async fn refund_with_authorization(
        &self,
        escrow: &EscrowData,
        authorization: &SignatureData,
    ) -> Result<String, SwapError>;

    async fn vault(&self, owner: &str, vault_id: u64) -> Result<Option<VaultState>, SwapError>;

    async fn withdrawal_state(&self, btc_tx_id: &str) -> Result<WithdrawalState, SwapError>;

    async fn claim_vault_withdrawal(
        &self,
        owner: &str,
        vault_id: u64,
        btc_tx_id: &str,
    ) -> Result<String, SwapError>;

    fn subscribe(&self) -> broadcast::Receiver<LedgerEvent>;
}
