use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
    Router,
};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
};

use crate::{config::CorsSettings, error::AppError, web_server::AppState};

/// Splits a `Host` value into a lowercase domain and port. Returns `None` for
/// anything that is not a hostname, IPv4 or bracketed IPv6 literal, with an
/// optional numeric port. A trailing dot on the domain is dropped.
pub fn split_domain_port(host: &str) -> Option<(String, String)> {
    let host = host.to_lowercase();

    let (domain, port) = if host.starts_with('[') {
        let end = host.find(']')?;
        let (domain, rest) = host.split_at(end + 1);
        let inner = &domain[1..domain.len() - 1];
        if !inner.contains(':')
            || !inner
                .chars()
                .all(|c| c.is_ascii_hexdigit() || c == ':' || c == '.')
        {
            return None;
        }
        let port = if rest.is_empty() {
            ""
        } else {
            rest.strip_prefix(':')?
        };
        (domain.to_string(), port.to_string())
    } else {
        let (domain, port) = match host.rsplit_once(':') {
            Some((domain, port)) => (domain, port),
            None => (host.as_str(), ""),
        };
        if domain.is_empty()
            || !domain
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return None;
        }
        if host.contains(':') && port.is_empty() {
            return None;
        }
        (domain.to_string(), port.to_string())
    };

    if !port.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let domain = domain.strip_suffix('.').unwrap_or(&domain).to_string();
    if domain.is_empty() {
        return None;
    }
    Some((domain, port))
}

/// `*` matches anything, `.example.com` matches `example.com` and its
/// subdomains, everything else must match exactly.
pub fn host_matches(domain: &str, pattern: &str) -> bool {
    let pattern = pattern.to_lowercase();
    if pattern == "*" {
        return true;
    }
    match pattern.strip_prefix('.') {
        Some(base) => domain.ends_with(pattern.as_str()) || domain == base,
        None => domain == pattern,
    }
}

pub fn is_host_allowed(host: &str, patterns: &[String]) -> bool {
    match split_domain_port(host) {
        Some((domain, _)) => patterns.iter().any(|pattern| host_matches(&domain, pattern)),
        None => false,
    }
}

/// Rejects requests whose `Host` is not in `ALLOWED_HOSTS`.
pub async fn validate_host(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .or_else(|| request.uri().authority().map(|a| a.as_str().to_owned()))
        .unwrap_or_default();

    let patterns = state
        .settings
        .allowed_hosts
        .effective_patterns(state.settings.debug);
    if !is_host_allowed(&host, &patterns) {
        return Err(AppError::DisallowedHost(host));
    }

    Ok(next.run(request).await)
}

/// CORS policy. In debug mode any origin is echoed back, so credentials keep
/// working; otherwise only the configured origins are allowed.
pub fn cors_layer(cors: &CorsSettings) -> CorsLayer {
    let origin = if cors.allow_all_origins {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(cors.allowed_origins.iter().cloned())
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(cors.allow_credentials)
        .allow_headers(AllowHeaders::list(cors.allow_headers.iter().cloned()))
        .allow_methods(AllowMethods::list(cors.allow_methods.iter().cloned()))
        .max_age(cors.preflight_max_age)
}

/// Clickjacking, MIME sniffing, referrer and opener protections.
pub fn with_security_headers<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("same-origin"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("cross-origin-opener-policy"),
            HeaderValue::from_static("same-origin"),
        ))
}
