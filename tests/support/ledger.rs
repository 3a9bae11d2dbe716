use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

use lp_swap::SwapError;
use lp_swap::ledger::{
    CommitStatus, EscrowData, Ledger, LedgerAction, LedgerEvent, SignatureData, TxStatus,
    VaultState, WithdrawalState,
};

/// In-memory ledger whose answers are set by the test.
pub struct MockLedger {
    commits: Mutex<HashMap<String, CommitStatus>>,
    txs: Mutex<HashMap<String, TxStatus>>,
    vaults: Mutex<HashMap<(String, u64), VaultState>>,
    withdrawals: Mutex<HashMap<String, WithdrawalState>>,
    reject_claims: Mutex<bool>,
    claims: Mutex<Vec<String>>,
    events: broadcast::Sender<LedgerEvent>,
}

impl Default for MockLedger {
    fn default() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            commits: Mutex::default(),
            txs: Mutex::default(),
            vaults: Mutex::default(),
            withdrawals: Mutex::default(),
            reject_claims: Mutex::new(false),
            claims: Mutex::default(),
            events,
        }
    }
}

impl MockLedger {
    pub fn set_commit_status(&self, claim_hash: &str, status: CommitStatus) {
        self.commits
            .lock()
            .unwrap()
            .insert(claim_hash.to_owned(), status);
    }

    pub fn set_tx_status(&self, tx_id: &str, status: TxStatus) {
        self.txs.lock().unwrap().insert(tx_id.to_owned(), status);
    }

    pub fn set_vault(&self, vault: VaultState) {
        self.vaults
            .lock()
            .unwrap()
            .insert((vault.owner.clone(), vault.vault_id), vault);
    }

    pub fn set_withdrawal(&self, btc_tx_id: &str, state: WithdrawalState) {
        self.withdrawals
            .lock()
            .unwrap()
            .insert(btc_tx_id.to_owned(), state);
    }

    /// Makes every claim submission fail as if the transaction was rejected.
    pub fn reject_claims(&self) {
        *self.reject_claims.lock().unwrap() = true;
    }

    pub fn claims(&self) -> Vec<String> {
        self.claims.lock().unwrap().clone()
    }

    pub fn emit(&self, event: LedgerEvent) {
        let _ = self.events.send(event);
    }

    fn claim(&self, what: &str) -> Result<String, SwapError> {
        if *self.reject_claims.lock().unwrap() {
            return Err(SwapError::precondition("claim transaction rejected"));
        }
        let tx_id = format!("claim-{what}");
        self.claims.lock().unwrap().push(tx_id.clone());
        Ok(tx_id)
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn commit_status(&self, escrow: &EscrowData) -> Result<CommitStatus, SwapError> {
        Ok(self
            .commits
            .lock()
            .unwrap()
            .get(&escrow.claim_hash)
            .cloned()
            .unwrap_or(CommitStatus::NotCommitted { refund_tx_id: None }))
    }

    async fn verify_init_authorization(
        &self,
        _escrow: &EscrowData,
        signature: &SignatureData,
    ) -> Result<(), SwapError> {
        if signature.signature == "forged" {
            return Err(SwapError::invalid_signature("init authorization"));
        }
        Ok(())
    }

    async fn is_authorization_expired(
        &self,
        _escrow: &EscrowData,
        signature: &SignatureData,
    ) -> Result<bool, SwapError> {
        Ok(signature.signature == "stale")
    }

    async fn verify_refund_authorization(
        &self,
        _escrow: &EscrowData,
        signature: &SignatureData,
    ) -> Result<(), SwapError> {
        if signature.signature == "forged" {
            return Err(SwapError::invalid_signature("refund authorization"));
        }
        Ok(())
    }

    async fn tx_status(&self, tx_id: &str) -> Result<TxStatus, SwapError> {
        Ok(self
            .txs
            .lock()
            .unwrap()
            .get(tx_id)
            .copied()
            .unwrap_or(TxStatus::NotFound))
    }

    async fn estimate_fee(&self, _action: LedgerAction) -> Result<u64, SwapError> {
        Ok(1_000)
    }

    async fn commit(
        &self,
        escrow: &EscrowData,
        _signature: &SignatureData,
    ) -> Result<String, SwapError> {
        self.set_commit_status(&escrow.claim_hash, CommitStatus::Committed);
        Ok(format!("commit-{}", escrow.claim_hash))
    }

    async fn claim_with_secret(
        &self,
        escrow: &EscrowData,
        _secret: &str,
    ) -> Result<String, SwapError> {
        let tx_id = self.claim(&escrow.claim_hash)?;
        self.set_commit_status(
            &escrow.claim_hash,
            CommitStatus::Paid {
                claim_tx_id: Some(tx_id.clone()),
            },
        );
        Ok(tx_id)
    }

    async fn claim_with_btc_tx(
        &self,
        escrow: &EscrowData,
        _btc_tx_id: &str,
    ) -> Result<String, SwapError> {
        let tx_id = self.claim(&escrow.claim_hash)?;
        self.set_commit_status(
            &escrow.claim_hash,
            CommitStatus::Paid {
                claim_tx_id: Some(tx_id.clone()),
            },
        );
        Ok(tx_id)
    }

    async fn refund(&self, escrow: &EscrowData) -> Result<String, SwapError> {
        let tx_id = format!("refund-{}", escrow.claim_hash);
        self.set_commit_status(
            &escrow.claim_hash,
            CommitStatus::NotCommitted {
                refund_tx_id: Some(tx_id.clone()),
            },
        );
        Ok(tx_id)
    }

    async fn refund_with_authorization(
        &self,
        escrow: &EscrowData,
        _authorization: &SignatureData,
    ) -> Result<String, SwapError> {
        let tx_id = format!("coop-refund-{}", escrow.claim_hash);
        self.set_commit_status(
            &escrow.claim_hash,
            CommitStatus::NotCommitted {
                refund_tx_id: Some(tx_id.clone()),
            },
        );
        Ok(tx_id)
    }

    async fn vault(&self, owner: &str, vault_id: u64) -> Result<Option<VaultState>, SwapError> {
        Ok(self
            .vaults
            .lock()
            .unwrap()
            .get(&(owner.to_owned(), vault_id))
            .cloned())
    }

    async fn withdrawal_state(&self, btc_tx_id: &str) -> Result<WithdrawalState, SwapError> {
        Ok(self
            .withdrawals
            .lock()
            .unwrap()
            .get(btc_tx_id)
            .cloned()
            .unwrap_or(WithdrawalState::NotFound))
    }

    async fn claim_vault_withdrawal(
        &self,
        _owner: &str,
        _vault_id: u64,
        btc_tx_id: &str,
    ) -> Result<String, SwapError> {
        let tx_id = self.claim(btc_tx_id)?;
        self.set_withdrawal(
            btc_tx_id,
            WithdrawalState::Claimed {
                claimer: "self".into(),
                tx_id: tx_id.clone(),
            },
        );
        Ok(tx_id)
    }

    fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }
}
