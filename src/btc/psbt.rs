//! Vault withdrawal transactions.
//!
//! A withdrawal spends the vault UTXO as input 0 and carries three outputs
//! in fixed order: the re-formed vault UTXO, an `OP_RETURN` with the
//! recipient and raw token amounts, and the BTC payment to the
//! counterparty. Funding inputs and an optional change output follow.

use bitcoin::absolute::LockTime;
use bitcoin::script::{Instruction, PushBytesBuf};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Psbt, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use thiserror::Error;

pub const DUST_LIMIT_SATS: u64 = 546;
/// Per-input witness weight assumed before signatures exist.
const INPUT_WITNESS_WEIGHT: u64 = 110;
const MAX_RECIPIENT_LEN: usize = 63;

#[derive(Debug, Error)]
pub enum PsbtError {
    #[error("recipient length {0} out of range")]
    RecipientLength(usize),
    #[error("withdrawal data payload: {0}")]
    Payload(String),
    #[error("at least one funding input is required")]
    NoFunding,
    #[error("{0} overflows")]
    Overflow(&'static str),
    #[error("insufficient funding: have {have} sats, need {need} sats")]
    InsufficientFunding { have: u64, need: u64 },
    #[error("fee rate {rate} sat/vB below floor {floor} sat/vB")]
    FeeBelowFloor { rate: u64, floor: u64 },
    /// The transaction does not have the withdrawal layout.
    #[error("malformed withdrawal: {0}")]
    Layout(String),
    #[error("signatures: {0}")]
    Signatures(String),
    #[error("psbt: {0}")]
    Psbt(#[from] bitcoin::psbt::Error),
    #[error("psbt hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalData {
    pub recipient: String,
    /// Unscaled amounts of the vault's two tokens.
    pub raw_amounts: [u64; 2],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalPlan {
    pub vault_utxo: OutPoint,
    pub vault_prevout: TxOut,
    pub data: WithdrawalData,
    pub btc_script: ScriptBuf,
    pub amount_sats: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingInput {
    pub outpoint: OutPoint,
    pub prevout: TxOut,
}

pub fn encode_withdrawal_data(data: &WithdrawalData) -> Result<ScriptBuf, PsbtError> {
    let recipient = data.recipient.as_bytes();
    if recipient.is_empty() || recipient.len() > MAX_RECIPIENT_LEN {
        return Err(PsbtError::RecipientLength(recipient.len()));
    }

    let mut payload = Vec::with_capacity(1 + recipient.len() + 16);
    payload.push(recipient.len() as u8);
    payload.extend_from_slice(recipient);
    payload.extend_from_slice(&data.raw_amounts[0].to_le_bytes());
    payload.extend_from_slice(&data.raw_amounts[1].to_le_bytes());

    let push = PushBytesBuf::try_from(payload).map_err(|e| PsbtError::Payload(e.to_string()))?;
    Ok(ScriptBuf::new_op_return(push))
}

pub fn decode_withdrawal_data(script: &Script) -> Option<WithdrawalData> {
    if !script.is_op_return() {
        return None;
    }
    let mut instructions = script.instructions();
    instructions.next()?.ok()?;
    let bytes = match instructions.next()?.ok()? {
        Instruction::PushBytes(bytes) => bytes.as_bytes().to_vec(),
        Instruction::Op(_) => return None,
    };
    if instructions.next().is_some() {
        return None;
    }

    let (&len, rest) = bytes.split_first()?;
    let len = usize::from(len);
    if rest.len() != len + 16 {
        return None;
    }
    let recipient = String::from_utf8(rest[..len].to_vec()).ok()?;
    let amount0 = u64::from_le_bytes(rest[len..len + 8].try_into().ok()?);
    let amount1 = u64::from_le_bytes(rest[len + 8..len + 16].try_into().ok()?);
    Some(WithdrawalData {
        recipient,
        raw_amounts: [amount0, amount1],
    })
}

/// Estimated virtual size once every input carries a single-key witness.
pub fn estimate_vsize(tx: &Transaction) -> u64 {
    let weight = tx.base_size() as u64 * 4 + 2 + tx.input.len() as u64 * INPUT_WITNESS_WEIGHT;
    weight.div_ceil(4)
}

fn estimate_fee(tx: &Transaction, fee_rate: u64) -> Result<u64, PsbtError> {
    estimate_vsize(tx)
        .checked_mul(fee_rate)
        .ok_or(PsbtError::Overflow("fee"))
}

pub fn build_withdrawal_psbt(
    plan: &WithdrawalPlan,
    funding: &[FundingInput],
    change_script: &Script,
    fee_rate: u64,
) -> Result<Psbt, PsbtError> {
    if funding.is_empty() {
        return Err(PsbtError::NoFunding);
    }

    let mut input = vec![txin(plan.vault_utxo)];
    input.extend(funding.iter().map(|f| txin(f.outpoint)));

    let mut output = vec![
        plan.vault_prevout.clone(),
        TxOut {
            value: Amount::ZERO,
            script_pubkey: encode_withdrawal_data(&plan.data)?,
        },
        TxOut {
            value: Amount::from_sat(plan.amount_sats),
            script_pubkey: plan.btc_script.clone(),
        },
    ];

    let funding_total = funding
        .iter()
        .try_fold(0u64, |acc, f| acc.checked_add(f.prevout.value.to_sat()))
        .ok_or(PsbtError::Overflow("funding total"))?;

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output: output.clone(),
    };

    let with_change = {
        let mut t = tx.clone();
        t.output.push(TxOut {
            value: Amount::ZERO,
            script_pubkey: change_script.to_owned(),
        });
        t
    };
    let fee_with_change = estimate_fee(&with_change, fee_rate)?;
    let fee_without_change = estimate_fee(&tx, fee_rate)?;

    let spend = plan.amount_sats;
    let change = funding_total
        .checked_sub(spend)
        .and_then(|left| left.checked_sub(fee_with_change));
    match change {
        Some(change) if change >= DUST_LIMIT_SATS => {
            output.push(TxOut {
                value: Amount::from_sat(change),
                script_pubkey: change_script.to_owned(),
            });
            tx.output = output;
        }
        _ => {
            let needed = spend
                .checked_add(fee_without_change)
                .ok_or(PsbtError::Overflow("amount"))?;
            if funding_total < needed {
                return Err(PsbtError::InsufficientFunding {
                    have: funding_total,
                    need: needed,
                });
            }
        }
    }

    let mut psbt = Psbt::from_unsigned_tx(tx)?;
    psbt.inputs[0].witness_utxo = Some(plan.vault_prevout.clone());
    for (i, f) in funding.iter().enumerate() {
        psbt.inputs[i + 1].witness_utxo = Some(f.prevout.clone());
    }
    Ok(psbt)
}

/// Checks structure, amounts and fee rate of a withdrawal PSBT against the
/// plan. Returns the effective fee rate in sat/vB.
pub fn validate_withdrawal_psbt(
    psbt: &Psbt,
    plan: &WithdrawalPlan,
    min_fee_rate: u64,
) -> Result<u64, PsbtError> {
    let layout = |msg: String| Err(PsbtError::Layout(msg));
    let tx = &psbt.unsigned_tx;
    if tx.input.len() < 2 {
        return layout("withdrawal needs the vault input and at least one funding input".into());
    }
    if tx.input[0].previous_output != plan.vault_utxo {
        return layout(format!(
            "input 0 spends {} instead of vault utxo {}",
            tx.input[0].previous_output, plan.vault_utxo
        ));
    }

    let mut input_total = 0u64;
    for (i, input) in psbt.inputs.iter().enumerate() {
        let prevout = input
            .witness_utxo
            .as_ref()
            .ok_or_else(|| PsbtError::Layout(format!("input {i} is not a witness input")))?;
        if !prevout.script_pubkey.is_witness_program() {
            return layout(format!("input {i} spends a legacy script"));
        }
        input_total = input_total
            .checked_add(prevout.value.to_sat())
            .ok_or(PsbtError::Overflow("input total"))?;
    }
    if psbt.inputs[0].witness_utxo.as_ref() != Some(&plan.vault_prevout) {
        return layout("vault input prevout does not match the vault utxo".into());
    }

    if tx.output.len() < 3 {
        return layout("withdrawal needs vault, data and payment outputs".into());
    }
    if tx.output[0] != plan.vault_prevout {
        return layout("output 0 does not re-form the vault utxo".into());
    }
    match decode_withdrawal_data(&tx.output[1].script_pubkey) {
        Some(data) if data == plan.data => {}
        Some(data) => {
            return layout(format!(
                "output 1 encodes {data:?}, expected {:?}",
                plan.data
            ));
        }
        None => return layout("output 1 is not a withdrawal data output".into()),
    }
    if tx.output[2].script_pubkey != plan.btc_script
        || tx.output[2].value.to_sat() != plan.amount_sats
    {
        return layout("output 2 does not pay the quoted amount to the quoted address".into());
    }
    for (i, out) in tx.output.iter().enumerate().skip(3) {
        if !out.script_pubkey.is_witness_program() {
            return layout(format!("output {i} is not a witness script"));
        }
    }

    let output_total = tx
        .output
        .iter()
        .try_fold(0u64, |acc, o| acc.checked_add(o.value.to_sat()))
        .ok_or(PsbtError::Overflow("output total"))?;
    let fee = input_total
        .checked_sub(output_total)
        .ok_or_else(|| PsbtError::Layout("outputs exceed inputs".into()))?;
    let fee_rate = fee / estimate_vsize(tx);
    if fee_rate < min_fee_rate {
        return Err(PsbtError::FeeBelowFloor {
            rate: fee_rate,
            floor: min_fee_rate,
        });
    }
    Ok(fee_rate)
}

/// The vault input must stay unsigned for the counterparty; every funding
/// input must carry the wallet's signature.
pub fn check_signatures(psbt: &Psbt) -> Result<(), PsbtError> {
    let signed = |input: &bitcoin::psbt::Input| {
        input.final_script_witness.is_some()
            || !input.partial_sigs.is_empty()
            || input.tap_key_sig.is_some()
    };

    let (vault, funding) = psbt
        .inputs
        .split_first()
        .ok_or_else(|| PsbtError::Signatures("psbt has no inputs".into()))?;
    if signed(vault) {
        return Err(PsbtError::Signatures("vault input must be left unsigned".into()));
    }
    if let Some(i) = funding.iter().position(|input| !signed(input)) {
        return Err(PsbtError::Signatures(format!("funding input {} is not signed", i + 1)));
    }
    Ok(())
}

pub fn psbt_to_hex(psbt: &Psbt) -> String {
    hex::encode(psbt.serialize())
}

pub fn psbt_from_hex(raw: &str) -> Result<Psbt, PsbtError> {
    let bytes = hex::decode(raw)?;
    Ok(Psbt::deserialize(&bytes)?)
}

fn txin(previous_output: OutPoint) -> TxIn {
    TxIn {
        previous_output,
        script_sig: ScriptBuf::new(),
        sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
        witness: Witness::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    #[test]
    fn withdrawal_data_survives_op_return() {
        let data = WithdrawalData {
            recipient: "0x5f3c".into(),
            raw_amounts: [1_234, 5],
        };
        let script = encode_withdrawal_data(&data).expect("encode");
        assert!(script.is_op_return());
        assert_eq!(decode_withdrawal_data(&script), Some(data));
    }

    #[test]
    fn oversized_recipient_is_rejected() {
        let data = WithdrawalData {
            recipient: "x".repeat(64),
            raw_amounts: [1, 0],
        };
        assert!(matches!(
            encode_withdrawal_data(&data),
            Err(PsbtError::RecipientLength(64))
        ));
    }

    #[test]
    fn fee_overflow_is_an_error() {
        let plan = WithdrawalPlan {
            vault_utxo: OutPoint::null(),
            vault_prevout: TxOut {
                value: Amount::from_sat(10_000),
                script_pubkey: ScriptBuf::new_p2wsh(&bitcoin::WScriptHash::all_zeros()),
            },
            data: WithdrawalData {
                recipient: "0x5f3c".into(),
                raw_amounts: [1, 0],
            },
            btc_script: ScriptBuf::new_p2wsh(&bitcoin::WScriptHash::all_zeros()),
            amount_sats: 50_000,
        };
        let funding = [FundingInput {
            outpoint: OutPoint::null(),
            prevout: TxOut {
                value: Amount::from_sat(100_000),
                script_pubkey: ScriptBuf::new_p2wsh(&bitcoin::WScriptHash::all_zeros()),
            },
        }];
        let err = build_withdrawal_psbt(&plan, &funding, &plan.btc_script, u64::MAX).unwrap_err();
        assert!(matches!(err, PsbtError::Overflow("fee")), "{err}");

        let err = build_withdrawal_psbt(&plan, &[], &plan.btc_script, 1).unwrap_err();
        assert!(matches!(err, PsbtError::NoFunding));
    }

    #[test]
    fn non_op_return_does_not_decode() {
        assert_eq!(decode_withdrawal_data(&ScriptBuf::new()), None);
    }
}
