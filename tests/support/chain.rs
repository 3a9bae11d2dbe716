use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    Txid, Witness,
};

use lp_swap::SwapError;
use lp_swap::btc::{BitcoinRpc, BtcTx};

/// Chain view made of the transactions the test inserted.
pub struct MockBitcoin {
    txs: Mutex<HashMap<Txid, BtcTx>>,
    fee_rate: Mutex<u64>,
}

impl Default for MockBitcoin {
    fn default() -> Self {
        Self {
            txs: Mutex::default(),
            fee_rate: Mutex::new(2),
        }
    }
}

impl MockBitcoin {
    pub fn add(&self, tx: Transaction, confirmations: u32) -> Txid {
        let txid = tx.compute_txid();
        self.txs
            .lock()
            .unwrap()
            .insert(txid, BtcTx { tx, confirmations });
        txid
    }

    pub fn confirm(&self, txid: &Txid, confirmations: u32) {
        if let Some(tx) = self.txs.lock().unwrap().get_mut(txid) {
            tx.confirmations = confirmations;
        }
    }

    pub fn set_fee_rate(&self, rate: u64) {
        *self.fee_rate.lock().unwrap() = rate;
    }
}

#[async_trait]
impl BitcoinRpc for MockBitcoin {
    async fn get_transaction(&self, txid: &Txid) -> Result<Option<BtcTx>, SwapError> {
        Ok(self.txs.lock().unwrap().get(txid).cloned())
    }

    async fn find_payment(
        &self,
        script_pubkey: &Script,
        amount_sats: u64,
    ) -> Result<Option<BtcTx>, SwapError> {
        Ok(self
            .txs
            .lock()
            .unwrap()
            .values()
            .find(|btc| {
                btc.tx.output.iter().any(|out| {
                    out.script_pubkey.as_script() == script_pubkey
                        && out.value.to_sat() >= amount_sats
                })
            })
            .cloned())
    }

    async fn spending_transaction(&self, outpoint: &OutPoint) -> Result<Option<BtcTx>, SwapError> {
        Ok(self
            .txs
            .lock()
            .unwrap()
            .values()
            .find(|btc| btc.tx.input.iter().any(|i| i.previous_output == *outpoint))
            .cloned())
    }

    async fn fee_rate(&self) -> Result<u64, SwapError> {
        Ok(*self.fee_rate.lock().unwrap())
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<Txid, SwapError> {
        Ok(self.add(tx.clone(), 0))
    }
}

/// Regtest P2WSH address derived from `tag`.
pub fn address(tag: &str) -> Address {
    Address::p2wsh(&ScriptBuf::from_bytes(tag.as_bytes().to_vec()), Network::Regtest)
}

pub fn txin(previous_output: OutPoint) -> TxIn {
    TxIn {
        previous_output,
        script_sig: ScriptBuf::new(),
        sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
        witness: Witness::default(),
    }
}

/// Transaction spending `inputs` into `outputs`.
pub fn tx(inputs: &[OutPoint], outputs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs.iter().copied().map(txin).collect(),
        output: outputs,
    }
}

pub fn pay(address: &Address, sats: u64) -> TxOut {
    TxOut {
        value: Amount::from_sat(sats),
        script_pubkey: address.script_pubkey(),
    }
}
