use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use serde::Deserialize;

pub const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_SIMILARITY: f64 = 0.7;

/// Frequently leaked passwords, one per line, lowercase.
static COMMON_PASSWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    include_str!("../data/common-passwords.txt")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
});

/// Password policy checks applied at registration. Configured by name in
/// `Config.toml` (`password_validators = ["minimum_length", ...]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordValidator {
    UserAttributeSimilarity,
    MinimumLength,
    CommonPassword,
    NumericPassword,
}

impl PasswordValidator {
    pub fn all() -> Vec<Self> {
        vec![
            PasswordValidator::UserAttributeSimilarity,
            PasswordValidator::MinimumLength,
            PasswordValidator::CommonPassword,
            PasswordValidator::NumericPassword,
        ]
    }

    pub fn check(&self, password: &str, username: &str) -> Result<(), String> {
        match self {
            PasswordValidator::UserAttributeSimilarity => {
                if too_similar(password, username) {
                    return Err("The password is too similar to the username.".into());
                }
            }
            PasswordValidator::MinimumLength => {
                if password.chars().count() < MIN_PASSWORD_LENGTH {
                    return Err(format!(
                        "This password is too short. It must contain at least {MIN_PASSWORD_LENGTH} characters."
                    ));
                }
            }
            PasswordValidator::CommonPassword => {
                if COMMON_PASSWORDS.contains(password.trim().to_lowercase().as_str()) {
                    return Err("This password is too common.".into());
                }
            }
            PasswordValidator::NumericPassword => {
                if !password.is_empty() && password.chars().all(|c| c.is_ascii_digit()) {
                    return Err("This password is entirely numeric.".into());
                }
            }
        }
        Ok(())
    }
}

/// Runs every validator and collects all messages.
pub fn validate_password(
    validators: &[PasswordValidator],
    password: &str,
    username: &str,
) -> Result<(), Vec<String>> {
    let errors: Vec<String> = validators
        .iter()
        .filter_map(|validator| validator.check(password, username).err())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Compares against the whole username and each of its word-separated parts.
fn too_similar(password: &str, username: &str) -> bool {
    let password = password.to_lowercase();
    let username = username.to_lowercase();
    if username.is_empty() {
        return false;
    }

    username
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|part| !part.is_empty())
        .chain(std::iter::once(username.as_str()))
        .filter(|part| !exceeds_length_ratio(&password, part))
        .any(|part| quick_ratio(&password, part) >= MAX_SIMILARITY)
}

/// A very long password cannot meaningfully resemble a very short value.
fn exceeds_length_ratio(password: &str, value: &str) -> bool {
    let password_len = password.chars().count();
    let value_len = value.chars().count();
    let length_bound = MAX_SIMILARITY / 2.0 * password_len as f64;
    password_len >= 10 * value_len && (value_len as f64) < length_bound
}

/// Upper bound on sequence similarity: shared characters regardless of order.
fn quick_ratio(a: &str, b: &str) -> f64 {
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 1.0;
    }

    let mut available: HashMap<char, usize> = HashMap::new();
    for c in b.chars() {
        *available.entry(c).or_default() += 1;
    }
    let mut matches = 0usize;
    for c in a.chars() {
        if let Some(count) = available.get_mut(&c) {
            if *count > 0 {
                *count -= 1;
                matches += 1;
            }
        }
    }
    2.0 * matches as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_password_passes_every_validator() {
        assert!(validate_password(&PasswordValidator::all(), "c0rrect-h0rse-battery", "alice").is_ok());
    }

    #[test]
    fn collects_every_failure() {
        let errors = validate_password(&PasswordValidator::all(), "123456", "alice").unwrap_err();
        assert_eq!(
            errors,
            vec![
                "This password is too short. It must contain at least 8 characters.".to_string(),
                "This password is too common.".to_string(),
                "This password is entirely numeric.".to_string(),
            ]
        );
    }

    #[test]
    fn common_passwords_ignore_case_and_padding() {
        assert!(PasswordValidator::CommonPassword.check(" PassWord ", "bob").is_err());
        assert!(PasswordValidator::CommonPassword.check("not-in-the-list-42", "bob").is_ok());
    }

    #[test]
    fn common_list_covers_more_than_the_obvious_few() {
        for password in ["zaq12wsx", "iloveyou1", "qwerty12345", "password1234", "letmein123"] {
            assert!(
                PasswordValidator::CommonPassword.check(password, "zed").is_err(),
                "{password} should be rejected"
            );
        }
        assert!(COMMON_PASSWORDS.len() > 500);
        assert!(COMMON_PASSWORDS.iter().all(|p| *p == p.to_lowercase()));
    }

    #[test]
    fn only_ascii_digits_count_as_numeric() {
        let numeric = PasswordValidator::NumericPassword;
        assert!(numeric.check("48213907", "x").is_err());
        assert!(numeric.check("½½½½½½½½", "x").is_ok());
        assert!(numeric.check("ⅫⅫⅫⅫⅫⅫⅫⅫ", "x").is_ok());
        assert!(numeric.check("4821390a", "x").is_ok());
    }

    #[test]
    fn similarity_checks_username_and_its_parts() {
        let similarity = PasswordValidator::UserAttributeSimilarity;
        assert!(similarity.check("alice123", "alice").is_err());
        assert!(similarity.check("Smith1", "john.smith").is_err());
        assert!(similarity.check("c0rrect-h0rse-battery", "alice").is_ok());
    }

    #[test]
    fn long_passwords_are_not_compared_to_short_values() {
        assert!(exceeds_length_ratio("abcdefghijklmnopqrstu", "ab"));
        assert!(!exceeds_length_ratio("abcdefgh", "alice"));
    }

    #[test]
    fn quick_ratio_counts_shared_characters() {
        assert_eq!(quick_ratio("abcd", "abcd"), 1.0);
        assert_eq!(quick_ratio("abcd", "efgh"), 0.0);
        assert_eq!(quick_ratio("aab", "ab"), 0.8);
    }

    #[test]
    fn disabled_validators_do_not_run() {
        assert!(validate_password(&[PasswordValidator::MinimumLength], "99999999", "x").is_ok());
        assert!(validate_password(&[], "1", "x").is_ok());
    }
}
