use anyhow::Result;
use bitcoin::hashes::{Hash as _, sha256};
use lightning_invoice::Bolt11Invoice;
use rand::RngCore as _;
use std::str::FromStr as _;

/// The parts of a BOLT11 invoice a swap needs to verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInvoice {
    pub payment_hash: [u8; 32],
    pub amount_msat: Option<u64>,
    /// Unix seconds.
    pub expires_at: Option<u64>,
}

pub fn parse_bolt11(invoice: &str) -> Result<ParsedInvoice> {
    let invoice = Bolt11Invoice::from_str(invoice)
        .map_err(|e| anyhow::anyhow!("parse BOLT11 invoice: {e:?}"))?;
    Ok(ParsedInvoice {
        payment_hash: invoice.payment_hash().to_byte_array(),
        amount_msat: invoice.amount_milli_satoshis(),
        expires_at: invoice.expires_at().map(|d| d.as_secs()),
    })
}

pub fn sha256_preimage(secret: &[u8]) -> [u8; 32] {
    sha256::Hash::hash(secret).to_byte_array()
}

/// Fresh 32-byte swap secret.
pub fn new_secret() -> [u8; 32] {
    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}
