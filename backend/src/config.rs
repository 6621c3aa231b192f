use std::{
    collections::BTreeMap,
    fmt,
    net::SocketAddr,
    path::PathBuf,
};

use axum::http::{HeaderName, HeaderValue, Method};
use chrono::Duration;
use dotenvy::dotenv;
use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::password::PasswordValidator;

/// Optional file holding non-sensitive defaults (CORS lists, bind address...).
pub const CONFIG_FILE: &str = "Config.toml";

/// Executed on every new MySQL connection.
pub const STRICT_SQL_MODE: &str = "SET sql_mode='STRICT_TRANS_TABLES'";

/// The only environment variables the settings loader looks at.
pub const ENV_KEYS: &[&str] = &[
    "SECRET_KEY",
    "DEBUG",
    "ALLOWED_HOSTS",
    "ACCESS_TOKEN_LIFETIME",
    "REFRESH_TOKEN_LIFETIME",
    "DB_NAME",
    "DB_USER",
    "DB_PASSWORD",
    "DB_HOST",
    "DB_PORT",
    "BIND_ADDR",
];

const DEFAULT_DB_HOST: &str = "127.0.0.1";
const DEFAULT_DB_PORT: u16 = 3306;
const DEFAULT_ACCESS_TOKEN_MINUTES: i64 = 30;
const DEFAULT_REFRESH_TOKEN_DAYS: i64 = 1;
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_STATIC_DIR: &str = "static";
const DEFAULT_PREFLIGHT_MAX_AGE: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read configuration: {0}")]
    Figment(#[from] figment::Error),
}

/// A string that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedHosts {
    /// `ALLOWED_HOSTS=*`
    Any,
    List(Vec<String>),
}

impl AllowedHosts {
    /// Parses the comma-separated allowlist. Blank entries are dropped.
    pub fn parse(raw: &str) -> Self {
        if raw == "*" {
            return AllowedHosts::Any;
        }
        AllowedHosts::List(
            raw.split(',')
                .map(str::trim)
                .filter(|host| !host.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }

    /// Patterns actually enforced. In debug mode an empty list falls back to
    /// the loopback names.
    pub fn effective_patterns(&self, debug: bool) -> Vec<String> {
        match self {
            AllowedHosts::Any => vec!["*".to_string()],
            AllowedHosts::List(hosts) if hosts.is_empty() && debug => {
                vec![".localhost".into(), "127.0.0.1".into(), "[::1]".into()]
            }
            AllowedHosts::List(hosts) => hosts.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JwtSettings {
    pub secret: Secret,
    pub access_token_lifetime: Duration,
    pub refresh_token_lifetime: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub name: String,
    pub user: String,
    pub password: Secret,
    pub host: String,
    pub port: u16,
    pub init_command: String,
}

#[derive(Debug, Clone)]
pub struct CorsSettings {
    pub allowed_origins: Vec<HeaderValue>,
    pub allow_credentials: bool,
    /// Always equal to `Settings::debug`.
    pub allow_all_origins: bool,
    pub allow_headers: Vec<HeaderName>,
    pub allow_methods: Vec<Method>,
    pub preflight_max_age: std::time::Duration,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub secret_key: Secret,
    pub debug: bool,
    pub allowed_hosts: AllowedHosts,
    pub jwt: JwtSettings,
    pub database: DatabaseSettings,
    pub cors: CorsSettings,
    pub password_validators: Vec<PasswordValidator>,
    pub password_hash_cost: u32,
    pub bind_addr: SocketAddr,
    pub static_dir: PathBuf,
}

impl Settings {
    /// Reads `.env`, then `Config.toml`, then the process environment. Later
    /// sources win.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv().ok();

        let vars = std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)));

        let figment = Figment::new()
            .merge(Toml::file(CONFIG_FILE))
            .merge(environment_provider(vars));

        Self::from_figment(figment)
    }

    /// Builds settings from an explicit set of variables, ignoring the config
    /// file and the process environment.
    pub fn from_env_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self::from_figment(Figment::new().merge(environment_provider(vars)))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let raw: RawSettings = figment.extract()?;
        Settings::try_from(raw)
    }
}

/// Turns environment variables into a figment provider. Unknown names are
/// skipped; values stay strings so that e.g. a numeric password keeps its
/// leading zeros.
pub fn environment_provider<I, K, V>(vars: I) -> Serialized<BTreeMap<String, String>>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let values = vars
        .into_iter()
        .filter(|(key, _)| ENV_KEYS.contains(&key.as_ref()))
        .map(|(key, value)| (key.as_ref().to_lowercase(), value.into()))
        .collect();
    Serialized::globals(values)
}

/// `"true"` or `"1"` in any case.
pub fn parse_debug(raw: &str) -> bool {
    matches!(raw.to_lowercase().as_str(), "true" | "1")
}

// --- Raw, loosely typed layer ---

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    #[serde(deserialize_with = "scalar")]
    secret_key: Option<String>,
    #[serde(deserialize_with = "scalar")]
    debug: Option<String>,
    #[serde(deserialize_with = "scalar")]
    allowed_hosts: Option<String>,
    #[serde(deserialize_with = "scalar")]
    access_token_lifetime: Option<String>,
    #[serde(deserialize_with = "scalar")]
    refresh_token_lifetime: Option<String>,
    #[serde(deserialize_with = "scalar")]
    db_name: Option<String>,
    #[serde(deserialize_with = "scalar")]
    db_user: Option<String>,
    #[serde(deserialize_with = "scalar")]
    db_password: Option<String>,
    #[serde(deserialize_with = "scalar")]
    db_host: Option<String>,
    #[serde(deserialize_with = "scalar")]
    db_port: Option<String>,
    #[serde(deserialize_with = "scalar")]
    bind_addr: Option<String>,
    static_dir: Option<PathBuf>,
    password_validators: Option<Vec<PasswordValidator>>,
    password_hash_cost: Option<u32>,
    cors: RawCors,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawCors {
    allowed_origins: Vec<String>,
    allow_credentials: bool,
    allow_headers: Vec<String>,
    allow_methods: Vec<String>,
    preflight_max_age: u64,
}

impl Default for RawCors {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            allowed_origins: owned(&[
                "https://fullstack-jwt-notes.vercel.app",
                "http://localhost:5173",
                "http://127.0.0.1:5173",
            ]),
            allow_credentials: true,
            allow_headers: owned(&[
                "accept",
                "accept-encoding",
                "authorization",
                "content-type",
                "dnt",
                "origin",
                "user-agent",
                "x-csrftoken",
                "x-requested-with",
            ]),
            allow_methods: owned(&["DELETE", "GET", "OPTIONS", "PATCH", "POST", "PUT"]),
            preflight_max_age: DEFAULT_PREFLIGHT_MAX_AGE,
        }
    }
}

/// TOML may carry numbers and booleans where the environment only has
/// strings; accept both.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

fn scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|value| match value {
        Scalar::Bool(b) => b.to_string(),
        Scalar::Int(i) => i.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::Text(s) => s,
    }))
}

fn required(value: Option<String>, key: &'static str) -> Result<String, ConfigError> {
    match value {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn positive_int(value: Option<String>, key: &'static str, default: i64) -> Result<i64, ConfigError> {
    let Some(raw) = value else {
        return Ok(default);
    };
    let invalid = |reason: String| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason,
    };
    match raw.trim().parse::<i64>() {
        Ok(n) if n > 0 => Ok(n),
        Ok(_) => Err(invalid("must be a positive integer".into())),
        Err(e) => Err(invalid(e.to_string())),
    }
}

fn non_empty_or(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl TryFrom<RawSettings> for Settings {
    type Error = ConfigError;

    fn try_from(raw: RawSettings) -> Result<Self, Self::Error> {
        let secret_key = Secret::new(required(raw.secret_key, "SECRET_KEY")?);
        let debug = raw.debug.as_deref().is_some_and(parse_debug);
        let allowed_hosts = AllowedHosts::parse(raw.allowed_hosts.as_deref().unwrap_or("*"));

        let access_minutes = positive_int(
            raw.access_token_lifetime,
            "ACCESS_TOKEN_LIFETIME",
            DEFAULT_ACCESS_TOKEN_MINUTES,
        )?;
        let refresh_days = positive_int(
            raw.refresh_token_lifetime,
            "REFRESH_TOKEN_LIFETIME",
            DEFAULT_REFRESH_TOKEN_DAYS,
        )?;
        let jwt = JwtSettings {
            secret: secret_key.clone(),
            access_token_lifetime: Duration::try_minutes(access_minutes).ok_or_else(|| {
                ConfigError::Invalid {
                    key: "ACCESS_TOKEN_LIFETIME",
                    value: access_minutes.to_string(),
                    reason: "out of range".into(),
                }
            })?,
            refresh_token_lifetime: Duration::try_days(refresh_days).ok_or_else(|| {
                ConfigError::Invalid {
                    key: "REFRESH_TOKEN_LIFETIME",
                    value: refresh_days.to_string(),
                    reason: "out of range".into(),
                }
            })?,
        };

        let port = match raw.db_port.filter(|p| !p.trim().is_empty()) {
            None => DEFAULT_DB_PORT,
            Some(p) => p.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                key: "DB_PORT",
                value: p.clone(),
                reason: e.to_string(),
            })?,
        };
        let database = DatabaseSettings {
            name: required(raw.db_name, "DB_NAME")?,
            user: required(raw.db_user, "DB_USER")?,
            password: Secret::new(raw.db_password.ok_or(ConfigError::Missing("DB_PASSWORD"))?),
            host: non_empty_or(raw.db_host, DEFAULT_DB_HOST),
            port,
            init_command: STRICT_SQL_MODE.to_string(),
        };

        let cors = build_cors(raw.cors, debug)?;

        let bind_raw = non_empty_or(raw.bind_addr, DEFAULT_BIND_ADDR);
        let bind_addr = bind_raw
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                key: "BIND_ADDR",
                value: bind_raw.clone(),
                reason: e.to_string(),
            })?;

        let password_hash_cost = raw.password_hash_cost.unwrap_or(bcrypt::DEFAULT_COST);
        if !(4..=31).contains(&password_hash_cost) {
            return Err(ConfigError::Invalid {
                key: "password_hash_cost",
                value: password_hash_cost.to_string(),
                reason: "must be between 4 and 31".into(),
            });
        }

        Ok(Settings {
            secret_key,
            debug,
            allowed_hosts,
            jwt,
            database,
            cors,
            password_validators: raw
                .password_validators
                .unwrap_or_else(PasswordValidator::all),
            password_hash_cost,
            bind_addr,
            static_dir: raw
                .static_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR)),
        })
    }
}

fn build_cors(raw: RawCors, debug: bool) -> Result<CorsSettings, ConfigError> {
    let allowed_origins = raw
        .allowed_origins
        .iter()
        .map(|origin| {
            if origin == "*" {
                return Err(ConfigError::Invalid {
                    key: "cors.allowed_origins",
                    value: origin.clone(),
                    reason: "use DEBUG to allow every origin".into(),
                });
            }
            HeaderValue::from_str(origin).map_err(|e| ConfigError::Invalid {
                key: "cors.allowed_origins",
                value: origin.clone(),
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let allow_headers = raw
        .allow_headers
        .iter()
        .map(|header| {
            HeaderName::from_bytes(header.to_ascii_lowercase().as_bytes()).map_err(|e| {
                ConfigError::Invalid {
                    key: "cors.allow_headers",
                    value: header.clone(),
                    reason: e.to_string(),
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let allow_methods = raw
        .allow_methods
        .iter()
        .map(|method| {
            Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(|e| {
                ConfigError::Invalid {
                    key: "cors.allow_methods",
                    value: method.clone(),
                    reason: e.to_string(),
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsSettings {
        allowed_origins,
        allow_credentials: raw.allow_credentials,
        allow_all_origins: debug,
        allow_headers,
        allow_methods,
        preflight_max_age: std::time::Duration::from_secs(raw.preflight_max_age),
    })
}
