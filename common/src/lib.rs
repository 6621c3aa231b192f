use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

pub mod utils;

use utils::{not_blank, validate_username};

/// Username/password pair used both to register and to obtain tokens.
///
/// Missing fields deserialize as empty strings so that they are reported as
/// field errors instead of a body rejection.
#[derive(Serialize, Deserialize, Clone, Debug, Validate, ToSchema)]
pub struct Credentials {
    #[serde(default)]
    #[validate(
        length(max = 150, message = "Ensure this field has no more than 150 characters."),
        custom(function = "validate_username")
    )]
    pub username: String,
    #[serde(default)]
    #[validate(length(min = 1, message = "This field may not be blank."))]
    pub password: String,
}

/// Public view of a freshly registered account. The password is write-only.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, ToSchema)]
pub struct RegisteredUser {
    pub id: i64,
    pub username: String,
}

/// Returned by the token endpoint.
#[derive(Serialize, Deserialize, Clone, Debug, ToSchema)]
pub struct TokenPair {
    pub refresh: String,
    pub access: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Validate, ToSchema)]
pub struct RefreshRequest {
    #[serde(default)]
    #[validate(custom(function = "not_blank"))]
    pub refresh: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, ToSchema)]
pub struct AccessToken {
    pub access: String,
}

/// A note as returned to its author.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, ToSchema)]
pub struct NoteDto {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Id of the owning user.
    pub author: i64,
}

/// Title and content arrive with surrounding whitespace stripped.
#[derive(Serialize, Deserialize, Clone, Debug, Validate, ToSchema)]
pub struct NewNote {
    #[serde(default, deserialize_with = "utils::trimmed")]
    #[validate(
        length(max = 100, message = "Ensure this field has no more than 100 characters."),
        custom(function = "not_blank")
    )]
    pub title: String,
    #[serde(default, deserialize_with = "utils::trimmed")]
    #[validate(custom(function = "not_blank"))]
    pub content: String,
}
