use primitive_types::U256;

use crate::error::MinterError;

/// `a * b / c` with a 256-bit intermediate, truncating. Zero when `c` is
/// zero.
pub fn mul_div(a: U256, b: U256, c: U256) -> Result<u128, MinterError> {
    if c.is_zero() {
        return Ok(0);
    }
    let product = a.checked_mul(b).ok_or(MinterError::Overflow)?;
    let quotient = product / c;
    if quotient > U256::from(u128::MAX) {
        return Err(MinterError::Overflow);
    }
    Ok(quotient.low_u128())
}
