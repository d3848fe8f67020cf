//! Validation helpers for inbound sync payloads.

use validator::ValidationError;

use crate::state::wheel::{MAX_NUMBER, POCKET_COUNT};

const MAX_CLIENT_ID_LEN: usize = 128;

/// Validates that a winning number is a pocket of a single-zero wheel.
///
/// # Examples
///
/// ```ignore
/// validate_winning_number(0)  // Ok
/// validate_winning_number(36) // Ok
/// validate_winning_number(37) // Err
/// ```
pub fn validate_winning_number(number: u8) -> Result<(), ValidationError> {
    if number > MAX_NUMBER {
        let mut err = ValidationError::new("winning_number_range");
        err.message = Some(format!("Winning number must be 0..=36 (got {number})").into());
        return Err(err);
    }
    Ok(())
}

/// Validates that a ball landing index addresses an existing pocket.
pub fn validate_pocket_index(index: usize) -> Result<(), ValidationError> {
    if index >= POCKET_COUNT {
        let mut err = ValidationError::new("pocket_index_range");
        err.message = Some(format!("Pocket index must be below 37 (got {index})").into());
        return Err(err);
    }
    Ok(())
}

/// Validates a display session identifier: non-empty, bounded, printable ASCII.
pub fn validate_client_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_CLIENT_ID_LEN {
        let mut err = ValidationError::new("client_id_length");
        err.message = Some(
            format!(
                "Client ID must be 1..={MAX_CLIENT_ID_LEN} characters (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !id.chars().all(|c| c.is_ascii_graphic()) {
        let mut err = ValidationError::new("client_id_format");
        err.message = Some("Client ID must contain only printable ASCII characters".into());
        return Err(err);
    }

    Ok(())
}
