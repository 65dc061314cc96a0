//! Luhn (mod-10) checksum for order and withdrawal identifiers.

use crate::types::LoyaltyError;

/// Whether `number` is a non-empty string of ASCII digits whose Luhn
/// checksum is divisible by 10.
///
/// Digits are processed right to left; every second digit is doubled
/// and reduced by 9 when the result exceeds 9. Operates on characters,
/// so identifiers longer than any machine integer are fine.
pub fn is_valid(number: &str) -> bool {
    if number.is_empty() {
        return false;
    }

    // Kept reduced mod 10 so input length cannot overflow it.
    let mut sum: u32 = 0;
    for (i, c) in number.chars().rev().enumerate() {
        let Some(mut digit) = c.to_digit(10) else {
            return false;
        };
        if i % 2 == 1 {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum = (sum + digit) % 10;
    }

    sum == 0
}

/// Validate a user-supplied identifier, naming the first problem found.
pub fn check(number: &str) -> Result<(), LoyaltyError> {
    if number.is_empty() {
        return Err(LoyaltyError::Validation("empty order number".into()));
    }
    if !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LoyaltyError::Validation(format!(
            "order number must be numeric: {number:?}"
        )));
    }
    if !is_valid(number) {
        return Err(LoyaltyError::Validation(format!(
            "order number fails checksum: {number}"
        )));
    }
    Ok(())
}
