pub mod psbt;

use async_trait::async_trait;
use bitcoin::address::NetworkUnchecked;
use bitcoin::hashes::{Hash as _, sha256};
use bitcoin::{Address, Network, OutPoint, Script, Transaction, Txid};

use crate::error::SwapError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcTx {
    pub tx: Transaction,
    pub confirmations: u32,
}

impl BtcTx {
    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }
}

/// Bitcoin node / indexer collaborator.
#[async_trait]
pub trait BitcoinRpc: Send + Sync {
    async fn get_transaction(&self, txid: &Txid) -> Result<Option<BtcTx>, SwapError>;

    /// First transaction paying at least `amount_sats` to `script_pubkey`.
    async fn find_payment(
        &self,
        script_pubkey: &Script,
        amount_sats: u64,
    ) -> Result<Option<BtcTx>, SwapError>;

    /// Transaction (mempool or confirmed) spending `outpoint`, if any.
    async fn spending_transaction(&self, outpoint: &OutPoint) -> Result<Option<BtcTx>, SwapError>;

    /// Recommended fee rate in sat/vB.
    async fn fee_rate(&self) -> Result<u64, SwapError>;

    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, SwapError>;
}

pub fn parse_address(address: &str, network: Network, url: Option<&str>) -> Result<Address, SwapError> {
    address
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|e| SwapError::integrity(url, format!("invalid bitcoin address {address}: {e}")))?
        .require_network(network)
        .map_err(|e| SwapError::integrity(url, format!("address {address} network mismatch: {e}")))
}

/// Only segwit outputs may take part in vault withdrawals.
pub fn require_witness_script(script: &Script, what: &str, url: Option<&str>) -> Result<(), SwapError> {
    if script.is_witness_program() {
        Ok(())
    } else {
        Err(SwapError::integrity(
            url,
            format!("{what} is not a witness script: {script}"),
        ))
    }
}

/// Claim hash binding an on-chain escrow to one Bitcoin output:
/// `sha256(nonce_le64 || amount_le64 || script_pubkey)`.
pub fn chain_claim_hash(nonce: u64, amount_sats: u64, script_pubkey: &Script) -> [u8; 32] {
    let mut buf = Vec::with_capacity(16 + script_pubkey.len());
    buf.extend_from_slice(&nonce.to_le_bytes());
    buf.extend_from_slice(&amount_sats.to_le_bytes());
    buf.extend_from_slice(script_pubkey.as_bytes());
    sha256::Hash::hash(&buf).to_byte_array()
}

/// Index of the first output paying at least `amount_sats` to `script_pubkey`.
pub fn find_output(tx: &Transaction, script_pubkey: &Script, amount_sats: u64) -> Option<u32> {
    tx.output
        .iter()
        .position(|out| out.script_pubkey.as_script() == script_pubkey && out.value.to_sat() >= amount_sats)
        .map(|vout| vout as u32)
}

pub fn parse_outpoint(raw: &str, url: Option<&str>) -> Result<OutPoint, SwapError> {
    raw.parse::<OutPoint>()
        .map_err(|e| SwapError::integrity(url, format!("invalid outpoint {raw}: {e}")))
}
