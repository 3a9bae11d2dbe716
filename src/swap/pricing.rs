use serde::{Deserialize, Serialize};

use crate::error::SwapError;
use crate::intermediary::FeeQuote;

const PPM: u128 = 1_000_000;

/// Fee and price snapshot captured when the quote was accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingInfo {
    pub base_fee: u64,
    pub fee_ppm: u64,
    pub swap_fee: u64,
    /// Quoted token price per BTC, scaled by 1e6.
    pub swap_price_uppm: u64,
    pub market_price_uppm: Option<u64>,
    pub difference_ppm: Option<u64>,
}

impl PricingInfo {
    /// Recomputes the fee for `amount_sats` from the disclosed terms and
    /// checks the quoted price against the market snapshot, if given.
    pub fn verify(
        fee: &FeeQuote,
        amount_sats: u64,
        market_price_uppm: Option<u64>,
        max_difference_ppm: u64,
        url: &str,
    ) -> Result<Self, SwapError> {
        let expected = swap_fee(fee.base_fee, fee.fee_ppm, amount_sats).ok_or_else(|| {
            SwapError::integrity(Some(url), "swap fee overflows u64".to_string())
        })?;
        if fee.swap_fee > expected {
            return Err(SwapError::integrity(
                Some(url),
                format!(
                    "quoted swap fee {} exceeds {expected} recomputed from base {} + {} ppm",
                    fee.swap_fee, fee.base_fee, fee.fee_ppm
                ),
            ));
        }

        let difference_ppm = match market_price_uppm {
            Some(market) => {
                let diff = difference_ppm(fee.swap_price_uppm, market).ok_or_else(|| {
                    SwapError::integrity(Some(url), "market price snapshot is zero".to_string())
                })?;
                if diff > max_difference_ppm {
                    return Err(SwapError::integrity(
                        Some(url),
                        format!(
                            "quoted price {} deviates {diff} ppm from market {market}, limit {max_difference_ppm} ppm",
                            fee.swap_price_uppm
                        ),
                    ));
                }
                Some(diff)
            }
            None => None,
        };

        Ok(Self {
            base_fee: fee.base_fee,
            fee_ppm: fee.fee_ppm,
            swap_fee: fee.swap_fee,
            swap_price_uppm: fee.swap_price_uppm,
            market_price_uppm,
            difference_ppm,
        })
    }

    /// Fee for `amount_sats` under the stored terms.
    pub fn fee_for(&self, amount_sats: u64) -> Option<u64> {
        swap_fee(self.base_fee, self.fee_ppm, amount_sats)
    }
}

/// `base + ceil(amount * ppm / 1e6)`.
pub fn swap_fee(base_fee: u64, fee_ppm: u64, amount: u64) -> Option<u64> {
    let variable = (u128::from(amount) * u128::from(fee_ppm)).div_ceil(PPM);
    u64::try_from(variable).ok()?.checked_add(base_fee)
}

fn difference_ppm(quoted: u64, market: u64) -> Option<u64> {
    if market == 0 {
        return None;
    }
    let diff = u128::from(quoted.abs_diff(market)) * PPM / u128::from(market);
    Some(u64::try_from(diff).unwrap_or(u64::MAX))
}
