use std::borrow::Cow;

use serde::{Deserialize, Deserializer};
use validator::ValidationError;

const BLANK_MESSAGE: &str = "This field may not be blank.";

/// Checks that a username holds only letters, digits and `@ . + - _`.
pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '@' | '.' | '+' | '-' | '_'))
}

/// Rejects values that are empty once surrounding whitespace is trimmed.
pub fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank").with_message(Cow::Borrowed(BLANK_MESSAGE)));
    }
    Ok(())
}

/// Deserializes a string with leading and trailing whitespace removed.
pub fn trimmed<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    if value.trim().len() == value.len() {
        Ok(value)
    } else {
        Ok(value.trim().to_string())
    }
}

pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    not_blank(username)?;
    if !is_valid_username(username) {
        return Err(ValidationError::new("invalid").with_message(Cow::Borrowed(
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.",
        )));
    }
    Ok(())
}
