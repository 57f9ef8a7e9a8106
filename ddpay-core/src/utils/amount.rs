//! Conversions between decimal order amounts and on-chain minor units.

use alloy::primitives::U256;
use rust_decimal::Decimal;

/// Scale a decimal amount into the token's integer minor unit.
///
/// Returns `None` for negative amounts or when the amount carries more
/// fractional digits than the token has decimals, since such an amount can
/// never be matched exactly.
pub fn to_minor_units(amount: Decimal, decimals: u8) -> Option<U256> {
    let amount = amount.normalize();
    if amount.is_sign_negative() && !amount.is_zero() {
        return None;
    }
    let scale = amount.scale();
    if scale > u32::from(decimals) {
        return None;
    }
    let mantissa = u128::try_from(amount.mantissa()).ok()?;
    let factor = U256::from(10u8).checked_pow(U256::from(u32::from(decimals) - scale))?;
    U256::from(mantissa).checked_mul(factor)
}
