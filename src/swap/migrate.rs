//! Versioned upgrade of persisted rows, applied once at load time before a
//! record is decoded or exposed to any caller.

use super::SwapType;
use super::escrow::{FromBtcLnState, FromBtcState, ToBtcState};
use super::state::SwapState;
use super::trusted::LnForGasState;
use crate::error::SwapError;
use crate::storage::StoredSwap;

pub const CURRENT_VERSION: u32 = 1;

/// Brings `row` to [`CURRENT_VERSION`]. Returns whether anything changed.
pub fn upgrade(row: &mut StoredSwap) -> Result<bool, SwapError> {
    match row.version {
        CURRENT_VERSION => Ok(false),
        0 => {
            let state = v0_state(row.swap_type, row.state).ok_or_else(|| {
                SwapError::storage(anyhow::anyhow!(
                    "swap {}: no v1 state for legacy {} state {}",
                    row.id,
                    row.swap_type,
                    row.state
                ))
            })?;
            tracing::info!(
                swap_id = %row.id,
                swap_type = %row.swap_type,
                from = row.state,
                to = state,
                "upgraded legacy swap state"
            );
            row.state = state;
            row.version = CURRENT_VERSION;
            if let Some(doc) = row.data.as_object_mut() {
                doc.insert("state".into(), state.into());
                doc.insert("version".into(), CURRENT_VERSION.into());
            }
            Ok(true)
        }
        other => Err(SwapError::storage(anyhow::anyhow!(
            "swap {} has unsupported version {other}",
            row.id
        ))),
    }
}

fn v0_state(swap_type: SwapType, code: i32) -> Option<i32> {
    let state = match swap_type {
        SwapType::ToBtc | SwapType::ToBtcLn => match code {
            -2 => ToBtcState::Refunded,
            -1 => ToBtcState::QuoteExpired,
            0 => ToBtcState::Created,
            1 => ToBtcState::Committed,
            2 => ToBtcState::Claimed,
            3 => ToBtcState::Refundable,
            _ => return None,
        }
        .code(),
        SwapType::FromBtc => match code {
            -2 => FromBtcState::Failed,
            -1 => FromBtcState::QuoteExpired,
            0..=3 => FromBtcState::from_code(code)?,
            _ => return None,
        }
        .code(),
        SwapType::FromBtcLn => match code {
            -2 => FromBtcLnState::Failed,
            -1 => FromBtcLnState::QuoteExpired,
            0..=3 => FromBtcLnState::from_code(code)?,
            _ => return None,
        }
        .code(),
        SwapType::LnForGas => match code {
            -1 => LnForGasState::Expired,
            0 => LnForGasState::PrCreated,
            1 => LnForGasState::Finished,
            _ => return None,
        }
        .code(),
        SwapType::SpvFromBtc | SwapType::OnchainForGas => return None,
    };
    Some(state)
}
