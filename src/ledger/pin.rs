// PIN gate for the sending side
//
// The PIN is access control, not proof of identity. Only a salted argon2
// hash is ever stored.

use crate::ledger::LedgerError;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Number of digits in a PIN
pub const PIN_LENGTH: usize = 4;

/// Check that a PIN is exactly `PIN_LENGTH` ASCII digits
pub fn is_well_formed(pin: &str) -> bool {
    pin.len() == PIN_LENGTH && pin.bytes().all(|b| b.is_ascii_digit())
}

/// Hash a well-formed PIN into a PHC string
pub fn hash_pin(pin: &str) -> Result<String, LedgerError> {
    if !is_well_formed(pin) {
        return Err(LedgerError::InvalidPin);
    }

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map_err(|e| LedgerError::PinHash(e.to_string()))?;
    Ok(hash.to_string())
}

/// Compare a candidate PIN against a stored PHC string
pub fn verify_pin_hash(pin: &str, stored: &str) -> Result<bool, LedgerError> {
    if !is_well_formed(pin) {
        return Ok(false);
    }

    let parsed = PasswordHash::new(stored).map_err(|e| LedgerError::PinHash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(pin.as_bytes(), &parsed)
        .is_ok())
}
