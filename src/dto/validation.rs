//! Validation helpers for DTOs.

use validator::ValidationError;

/// Length of a room join code.
pub const ROOM_CODE_LEN: usize = 6;
const NICKNAME_MAX_CHARS: usize = 24;
const GUEST_KEY_MIN_LEN: usize = 8;
const GUEST_KEY_MAX_LEN: usize = 128;

/// Validates that a room code is exactly 6 uppercase alphanumeric characters.
///
/// # Examples
///
/// ```ignore
/// validate_room_code("AB12CD") // Ok
/// validate_room_code("ab12cd") // Err - lowercase
/// validate_room_code("AB12C")  // Err - too short
/// ```
pub fn validate_room_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != ROOM_CODE_LEN {
        let mut err = ValidationError::new("room_code_length");
        err.message = Some(
            format!(
                "Room code must be exactly {ROOM_CODE_LEN} characters (got {})",
                code.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        let mut err = ValidationError::new("room_code_format");
        err.message = Some("Room code must contain only uppercase letters and digits".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a display nickname: 1 to 24 characters, not blank, no control characters.
pub fn validate_nickname(nickname: &str) -> Result<(), ValidationError> {
    let trimmed = nickname.trim();
    let count = trimmed.chars().count();
    if count == 0 || count > NICKNAME_MAX_CHARS {
        let mut err = ValidationError::new("nickname_length");
        err.message =
            Some(format!("Nickname must be 1 to {NICKNAME_MAX_CHARS} characters").into());
        return Err(err);
    }

    if trimmed.chars().any(char::is_control) {
        let mut err = ValidationError::new("nickname_format");
        err.message = Some("Nickname must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}

/// Validates an opaque guest key: 8 to 128 characters of `[A-Za-z0-9_-]`.
pub fn validate_guest_key(key: &str) -> Result<(), ValidationError> {
    if !(GUEST_KEY_MIN_LEN..=GUEST_KEY_MAX_LEN).contains(&key.len()) {
        let mut err = ValidationError::new("guest_key_length");
        err.message = Some(
            format!("Guest key must be {GUEST_KEY_MIN_LEN} to {GUEST_KEY_MAX_LEN} characters")
                .into(),
        );
        return Err(err);
    }

    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        let mut err = ValidationError::new("guest_key_format");
        err.message = Some("Guest key may only contain letters, digits, '-' and '_'".into());
        return Err(err);
    }

    Ok(())
}
