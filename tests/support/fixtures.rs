use std::sync::Arc;

use bitcoin::hashes::Hash as _;
use bitcoin::{Address, Amount, OutPoint, Psbt, Transaction, TxOut, Txid, Witness};

use lp_swap::btc::chain_claim_hash;
use lp_swap::btc::psbt::{FundingInput, WithdrawalData, encode_withdrawal_data};
use lp_swap::intermediary::{
    FromBtcLnQuote, FromBtcQuote, FromBtcQuoteRequest, LnForGasQuote, LnForGasQuoteRequest,
    OnchainForGasQuote, OnchainForGasQuoteRequest, SpvVaultQuote, SpvVaultQuoteRequest,
    ToBtcQuote, ToBtcQuoteRequest,
};
use lp_swap::ledger::{EscrowKind, VaultState};
use lp_swap::swap::SwapHandle;
use lp_swap::swap::escrow::{FromBtc, FromBtcLn, ToBtcSwap};
use lp_swap::swap::trusted::{LnForGas, OnchainForGas};
use lp_swap::swap::vault::SpvFromBtc;
use lp_swap::wrapper::SwapWrapper;

use super::{Harness, LP_URL, START_MS, chain, escrow, fee_quote, invoice, signature};

pub const QUOTE_EXPIRY_MS: u64 = START_MS + 300_000;
pub const PAYOUT_SATS: u64 = 100_000;
pub const GAS_SATS: u64 = 20_000;
pub const VAULT_OWNER: &str = "0xvault-owner";
pub const VAULT_SATS: u64 = 10_000;
pub const WITHDRAW_SATS: u64 = 50_000;

pub fn payout_address() -> Address {
    chain::address("payout")
}

pub fn to_btc_claim_hash() -> String {
    hex::encode(chain_claim_hash(
        42,
        PAYOUT_SATS,
        &payout_address().script_pubkey(),
    ))
}

pub fn to_btc_request() -> ToBtcQuoteRequest {
    ToBtcQuoteRequest {
        address: payout_address().to_string(),
        amount_sats: PAYOUT_SATS,
        confirmations: 2,
        nonce: 42,
        token: "0xtoken".into(),
        offerer: "0xuser".into(),
        max_amount_in: None,
        market_price_uppm: None,
    }
}

/// Stages a to-BTC quote whose authorization carries `sig`.
pub fn quote_to_btc(h: &Harness, sig: &str) {
    let mut signature = signature(h.now_secs() + 3_600);
    signature.signature = sig.into();
    *h.lp.to_btc.lock().unwrap() = Some(ToBtcQuote {
        escrow: escrow(EscrowKind::ChainNonced, &to_btc_claim_hash()),
        signature,
        amount_sats: PAYOUT_SATS,
        fee: fee_quote(PAYOUT_SATS),
        network_fee: 500,
        expiry: QUOTE_EXPIRY_MS,
    });
}

pub async fn to_btc_swap(
    h: &Harness,
    wrapper: &SwapWrapper<ToBtcSwap>,
    sig: &str,
) -> Arc<SwapHandle<ToBtcSwap>> {
    quote_to_btc(h, sig);
    wrapper
        .create(LP_URL, &to_btc_request())
        .await
        .expect("create to_btc swap")
}

pub fn deposit_address() -> Address {
    chain::address("lp-deposit")
}

pub fn from_btc_claim_hash() -> String {
    hex::encode(chain_claim_hash(
        42,
        PAYOUT_SATS,
        &deposit_address().script_pubkey(),
    ))
}

pub async fn from_btc_swap(h: &Harness, wrapper: &SwapWrapper<FromBtc>) -> Arc<SwapHandle<FromBtc>> {
    let mut escrow = escrow(EscrowKind::ChainNonced, &from_btc_claim_hash());
    escrow.offerer = "0xlp".into();
    escrow.claimer = "0xuser".into();
    *h.lp.from_btc.lock().unwrap() = Some(FromBtcQuote {
        escrow,
        signature: signature(h.now_secs() + 3_600),
        btc_address: deposit_address().to_string(),
        amount_sats: PAYOUT_SATS,
        fee: fee_quote(PAYOUT_SATS),
        expiry: QUOTE_EXPIRY_MS,
    });
    let req = FromBtcQuoteRequest {
        amount_sats: PAYOUT_SATS,
        token: "0xtoken".into(),
        claimer: "0xuser".into(),
        sequence: 7,
        market_price_uppm: None,
    };
    wrapper.create(LP_URL, &req).await.expect("create from_btc swap")
}

/// The mock intermediary fills in an invoice for the requested hash.
pub async fn from_btcln_swap(
    h: &Harness,
    wrapper: &SwapWrapper<FromBtcLn>,
) -> Arc<SwapHandle<FromBtcLn>> {
    *h.lp.from_btcln.lock().unwrap() = Some(FromBtcLnQuote {
        invoice: String::new(),
        offerer: "0xlp".into(),
        token_amount: 200_000,
        security_deposit: 0,
        fee: fee_quote(PAYOUT_SATS),
        expiry: QUOTE_EXPIRY_MS,
    });
    wrapper
        .create(LP_URL, PAYOUT_SATS, "0xtoken", "0xuser", None)
        .await
        .expect("create from_btcln swap")
}

pub fn gas_hash(tag: u8) -> String {
    hex::encode([tag; 32])
}

pub async fn ln_for_gas_swap(h: &Harness, wrapper: &SwapWrapper<LnForGas>) -> Arc<SwapHandle<LnForGas>> {
    *h.lp.ln_for_gas.lock().unwrap() = Some(LnForGasQuote {
        invoice: invoice(&gas_hash(1), GAS_SATS),
        amount_sats: GAS_SATS,
        token_amount: 40_000,
        fee: fee_quote(GAS_SATS),
        expiry: QUOTE_EXPIRY_MS,
    });
    let req = LnForGasQuoteRequest {
        amount: GAS_SATS,
        recipient: "0xuser".into(),
        token: "0xgas".into(),
        market_price_uppm: None,
    };
    wrapper.create(LP_URL, &req).await.expect("create ln_for_gas swap")
}

pub async fn onchain_for_gas_swap(
    h: &Harness,
    wrapper: &SwapWrapper<OnchainForGas>,
) -> Arc<SwapHandle<OnchainForGas>> {
    *h.lp.onchain_for_gas.lock().unwrap() = Some(OnchainForGasQuote {
        payment_hash: gas_hash(2),
        btc_address: chain::address("gas-deposit").to_string(),
        amount_sats: GAS_SATS,
        token_amount: 40_000,
        fee: fee_quote(GAS_SATS),
        expiry: QUOTE_EXPIRY_MS,
    });
    let req = OnchainForGasQuoteRequest {
        amount: GAS_SATS,
        recipient: "0xuser".into(),
        token: "0xgas".into(),
        refund_address: None,
        market_price_uppm: None,
    };
    wrapper
        .create(LP_URL, &req)
        .await
        .expect("create onchain_for_gas swap")
}

pub fn vault_address() -> Address {
    chain::address("vault")
}

/// Funds a vault UTXO on the mock chain and registers the vault with
/// `balances` raw units on the ledger.
pub fn open_vault(h: &Harness, balances: [u64; 2]) -> OutPoint {
    let funding = chain::tx(
        &[OutPoint {
            txid: Txid::all_zeros(),
            vout: 7,
        }],
        vec![chain::pay(&vault_address(), VAULT_SATS)],
    );
    let utxo = OutPoint {
        txid: h.btc.add(funding, 6),
        vout: 0,
    };
    h.ledger.set_vault(VaultState {
        owner: VAULT_OWNER.into(),
        vault_id: 1,
        utxo: utxo.to_string(),
        btc_address: vault_address().to_string(),
        confirmations: 6,
        tokens: ["0xtoken".into(), "0xgas".into()],
        multipliers: [10, 1],
        balances,
        closed: false,
    });
    utxo
}

/// Unconfirmed third-party withdrawal spending `utxo`. Returns the vault
/// UTXO it re-forms.
pub fn pending_withdrawal(h: &Harness, utxo: OutPoint, raw_amounts: [u64; 2]) -> OutPoint {
    let data = encode_withdrawal_data(&WithdrawalData {
        recipient: "0xsomeone".into(),
        raw_amounts,
    })
    .expect("encode withdrawal data");
    let tx = chain::tx(
        &[utxo],
        vec![
            chain::pay(&vault_address(), VAULT_SATS),
            TxOut {
                value: Amount::ZERO,
                script_pubkey: data,
            },
            chain::pay(&chain::address("lp-btc"), 1_000),
        ],
    );
    OutPoint {
        txid: h.btc.add(tx, 0),
        vout: 0,
    }
}

pub fn quote_vault(h: &Harness, vault_utxo: OutPoint) {
    *h.lp.spv_vault.lock().unwrap() = Some(SpvVaultQuote {
        quote_id: "quote-1".into(),
        vault_owner: VAULT_OWNER.into(),
        vault_id: 1,
        vault_utxo: vault_utxo.to_string(),
        vault_btc_address: vault_address().to_string(),
        btc_address: chain::address("lp-btc").to_string(),
        amount_sats: WITHDRAW_SATS,
        min_fee_rate: 2,
        token_amount: 5_000,
        gas_amount: 100,
        required_confirmations: 1,
        fee: fee_quote(WITHDRAW_SATS),
        expiry: QUOTE_EXPIRY_MS,
    });
}

pub fn vault_request() -> SpvVaultQuoteRequest {
    SpvVaultQuoteRequest {
        recipient: "0xuser".into(),
        token: "0xtoken".into(),
        amount_sats: WITHDRAW_SATS,
        gas_amount: 100,
        market_price_uppm: None,
    }
}

pub async fn spv_swap(h: &Harness, wrapper: &SwapWrapper<SpvFromBtc>) -> Arc<SwapHandle<SpvFromBtc>> {
    let utxo = open_vault(h, [100_000, 1_000]);
    quote_vault(h, utxo);
    wrapper
        .create(LP_URL, &vault_request())
        .await
        .expect("create spv swap")
}

/// Funds the withdrawal from a wallet UTXO, signs the funding input and
/// submits it. Returns the withdrawal transaction.
pub async fn submit_withdrawal(swap: &SwapHandle<SpvFromBtc>) -> Transaction {
    let psbt = signed_withdrawal(swap).await;
    swap.submit_psbt(&psbt).await.expect("submit withdrawal");
    psbt.unsigned_tx
}

/// Withdrawal PSBT with the wallet's funding input signed.
pub async fn signed_withdrawal(swap: &SwapHandle<SpvFromBtc>) -> Psbt {
    let funding = FundingInput {
        outpoint: OutPoint {
            txid: Txid::all_zeros(),
            vout: 1,
        },
        prevout: chain::pay(&chain::address("wallet"), 100_000),
    };
    let mut psbt = swap
        .funded_psbt(&[funding], &chain::address("change").script_pubkey())
        .await
        .expect("build withdrawal");
    psbt.inputs[1].final_script_witness = Some(Witness::from_slice(&[vec![1u8; 72], vec![2u8; 33]]));
    psbt
}
