use axum::{extract::State, http::StatusCode, Json};
use bcrypt::{hash, verify};
use notes_common::{AccessToken, Credentials, RefreshRequest, RegisteredUser, TokenPair};
use serde::{Deserialize, Serialize};

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use axum::{extract::Request, middleware::Next, response::Response};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    typed_header::TypedHeaderRejection,
    TypedHeader,
};

use crate::config::JwtSettings;
use crate::error::{AppError, FieldErrors};
use crate::extractors::{AuthUser, ValidatedJson};
use crate::password::validate_password;
use crate::web_server::AppState;
use crate::db;

const NO_ACTIVE_ACCOUNT: &str = "No active account found with the given credentials";
const USERNAME_TAKEN: &str = "A user with that username already exists.";

// --- User & Token Structs ---

#[derive(sqlx::FromRow, Debug)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub token_type: TokenType,
    pub exp: i64,
    pub iat: i64,
    /// Unique per token, so two tokens minted in the same second differ.
    pub jti: String,
    pub user_id: String,
}

// --- Token Helpers ---

/// Signs a token of the given type for `user_id`, valid for the configured
/// lifetime of that type.
pub fn encode_token(
    user_id: i64,
    token_type: TokenType,
    jwt: &JwtSettings,
) -> Result<String, AppError> {
    let lifetime = match token_type {
        TokenType::Access => jwt.access_token_lifetime,
        TokenType::Refresh => jwt.refresh_token_lifetime,
    };
    let now = Utc::now();
    let exp = now
        .checked_add_signed(lifetime)
        .ok_or_else(|| AppError::InternalServerError("Token lifetime out of range".into()))?;

    let claims = Claims {
        token_type,
        exp: exp.timestamp(),
        iat: now.timestamp(),
        jti: Uuid::new_v4().simple().to_string(),
        user_id: user_id.to_string(),
    };

    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(jwt.secret.expose().as_bytes()),
    )?)
}

/// Verifies signature and expiry, and that the token is of the expected type.
pub fn decode_token(token: &str, expected: TokenType, jwt: &JwtSettings) -> Result<Claims, AppError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.leeway = 0;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt.secret.expose().as_bytes()),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!("Rejected token: {}", e);
        AppError::InvalidToken
    })?;

    if token_data.claims.token_type != expected {
        tracing::debug!(
            "Rejected {:?} token where {:?} was expected",
            token_data.claims.token_type,
            expected
        );
        return Err(AppError::InvalidToken);
    }

    Ok(token_data.claims)
}

fn user_id_of(claims: &Claims) -> Result<i64, AppError> {
    claims.user_id.parse().map_err(|_| AppError::InvalidToken)
}

async fn find_user_by_username(state: &AppState, username: &str) -> Result<Option<User>, AppError> {
    Ok(sqlx::query_as::<_, User>(
        "SELECT id, username, password_hash, is_active FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(&state.db_pool)
    .await?)
}

async fn find_user_by_id(state: &AppState, id: i64) -> Result<Option<User>, AppError> {
    Ok(sqlx::query_as::<_, User>(
        "SELECT id, username, password_hash, is_active FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&state.db_pool)
    .await?)
}

// --- API Handlers ---

/// ## Register a new user
/// Validates the username and the password policy, hashes the password and
/// stores the account.
#[utoipa::path(
    post,
    path = "/api/user/register/",
    request_body = Credentials,
    responses(
        (status = 201, description = "User created successfully", body = RegisteredUser),
        (status = 400, description = "Invalid data or username already taken"),
    )
)]
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<Credentials>,
) -> Result<(StatusCode, Json<RegisteredUser>), AppError> {
    if let Err(messages) = validate_password(
        &state.settings.password_validators,
        &payload.password,
        &payload.username,
    ) {
        let mut errors = FieldErrors::new();
        errors.insert("password".into(), messages);
        return Err(AppError::ValidationError(errors));
    }

    tracing::info!("Registering user: {}", &payload.username);
    if find_user_by_username(&state, &payload.username).await?.is_some() {
        return Err(AppError::field("username", USERNAME_TAKEN));
    }

    let password_hash = hash(&payload.password, state.settings.password_hash_cost)?;

    let result = sqlx::query(
        "INSERT INTO users (username, password_hash, is_active, date_joined) VALUES (?, ?, ?, ?)",
    )
    .bind(&payload.username)
    .bind(&password_hash)
    .bind(true)
    .bind(Utc::now().naive_utc())
    .execute(&state.db_pool)
    .await
    .map_err(|e| {
        // Lost a race with a concurrent registration of the same name.
        if db::is_unique_violation(&e) {
            AppError::field("username", USERNAME_TAKEN)
        } else {
            AppError::DatabaseError(e)
        }
    })?;

    let user = RegisteredUser {
        id: db::last_insert_id(&result),
        username: payload.username,
    };
    tracing::info!("Registered user {} with id {}", user.username, user.id);

    Ok((StatusCode::CREATED, Json(user)))
}

/// ## Obtain a token pair
/// Takes username and password and returns a refresh and an access token.
#[utoipa::path(
    post,
    path = "/api/token/",
    request_body = Credentials,
    responses(
        (status = 200, description = "Login successful", body = TokenPair),
        (status = 400, description = "Missing fields"),
        (status = 401, description = "No active account found with the given credentials"),
    )
)]
pub async fn obtain_token(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<Credentials>,
) -> Result<Json<TokenPair>, AppError> {
    let failed = || AppError::AuthenticationFailed {
        detail: NO_ACTIVE_ACCOUNT,
        code: None,
    };

    tracing::info!("Issuing tokens for user: {}", &payload.username);
    let Some(user) = find_user_by_username(&state, &payload.username).await? else {
        // Pay for a bcrypt check anyway so unknown names cannot be told apart
        // by response time.
        verify(&payload.password, state.dummy_password_hash()?)?;
        return Err(failed());
    };

    if !verify(&payload.password, &user.password_hash)? || !user.is_active {
        return Err(failed());
    }

    let jwt = &state.settings.jwt;
    Ok(Json(TokenPair {
        refresh: encode_token(user.id, TokenType::Refresh, jwt)?,
        access: encode_token(user.id, TokenType::Access, jwt)?,
    }))
}

/// ## Refresh the access token
/// Exchanges a valid refresh token for a new access token. The refresh token
/// itself is not rotated.
#[utoipa::path(
    post,
    path = "/api/token/refresh/",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = AccessToken),
        (status = 401, description = "Invalid or expired refresh token")
    )
)]
pub async fn refresh_token(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RefreshRequest>,
) -> Result<Json<AccessToken>, AppError> {
    let jwt = &state.settings.jwt;
    let claims = decode_token(&payload.refresh, TokenType::Refresh, jwt)?;
    let user_id = user_id_of(&claims)?;

    match find_user_by_id(&state, user_id).await? {
        Some(user) if user.is_active => Ok(Json(AccessToken {
            access: encode_token(user.id, TokenType::Access, jwt)?,
        })),
        // A token for an account that is gone or disabled is no longer valid.
        _ => Err(AppError::InvalidToken),
    }
}

// --- Middleware for JWT Authentication ---

pub async fn auth_middleware(
    State(state): State<AppState>,
    auth_header: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // A missing header and a non-Bearer scheme both mean "no credentials".
    let TypedHeader(Authorization(bearer)) = auth_header.map_err(|_| AppError::NotAuthenticated)?;

    let claims = decode_token(bearer.token(), TokenType::Access, &state.settings.jwt)?;
    let user_id = user_id_of(&claims)?;

    let user = find_user_by_id(&state, user_id)
        .await?
        .ok_or(AppError::AuthenticationFailed {
            detail: "User not found",
            code: Some("user_not_found"),
        })?;

    if !user.is_active {
        return Err(AppError::AuthenticationFailed {
            detail: "User is inactive",
            code: Some("user_inactive"),
        });
    }

    request.extensions_mut().insert(AuthUser {
        id: user.id,
        username: user.username,
    });

    Ok(next.run(request).await)
}
