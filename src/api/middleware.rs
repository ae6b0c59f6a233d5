//! Request authentication, caller identity and rate limiting.

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr},
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::config::LedgerConfig;
use crate::models::{Identity, Role};

pub const USER_ID_HEADER: &str = "X-User-Id";
pub const USER_ROLE_HEADER: &str = "X-User-Role";

/// Security settings for the HTTP layer.
#[derive(Clone, Debug)]
pub struct SecurityConfig {
    /// Bearer token required on every request when set.
    pub api_key: Option<String>,
    /// Allowed CORS origins. `None` allows any origin.
    pub cors_origins: Option<Vec<String>>,
    pub rate_limiter: Option<RateLimiter>,
}

impl SecurityConfig {
    /// Rate limiting only applies in remote mode, i.e. when an API key is set.
    pub fn from_config(config: &LedgerConfig) -> Self {
        let rate_limiter = config.api_key.as_ref().map(|_| {
            RateLimiter::new(config.rate_limit_per_minute, Duration::from_secs(60))
        });

        Self {
            api_key: config.api_key.clone(),
            cors_origins: config.cors_origins.clone(),
            rate_limiter,
        }
    }

    /// No authentication and no rate limiting, for local use and tests.
    pub fn disabled() -> Self {
        Self {
            api_key: None,
            cors_origins: None,
            rate_limiter: None,
        }
    }

    pub fn with_api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            ..Self::disabled()
        }
    }

    pub fn with_rate_limit(max_requests: u32) -> Self {
        Self {
            rate_limiter: Some(RateLimiter::new(max_requests, Duration::from_secs(60))),
            ..Self::disabled()
        }
    }
}

/// In-memory sliding-window rate limiter keyed by client IP.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    requests: Arc<Mutex<HashMap<IpAddr, Vec<Instant>>>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            requests: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record a request from `ip`. Returns false if it is over the limit.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let cutoff = now.checked_sub(self.window);

        let mut requests = self.lock();
        let entry = requests.entry(ip).or_default();
        if let Some(cutoff) = cutoff {
            entry.retain(|&t| t > cutoff);
        }

        if entry.len() < self.max_requests as usize {
            entry.push(now);
            true
        } else {
            false
        }
    }

    /// Drop IPs with no requests inside the window.
    pub fn cleanup(&self) {
        let Some(cutoff) = Instant::now().checked_sub(self.window) else {
            return;
        };
        self.lock().retain(|_, timestamps| {
            timestamps.retain(|&t| t > cutoff);
            !timestamps.is_empty()
        });
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, Vec<Instant>>> {
        // The map only holds timestamps, so a poisoned lock is still usable.
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Reject requests without the configured bearer token.
pub async fn auth_middleware(
    State(config): State<SecurityConfig>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected_key) = &config.api_key else {
        return Ok(next.run(request).await);
    };

    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    match auth_header.map(|h| h.strip_prefix("Bearer ")) {
        Some(Some(token)) if token == expected_key.as_str() => Ok(next.run(request).await),
        Some(Some(_)) => {
            tracing::warn!("Invalid API key provided");
            Err(StatusCode::UNAUTHORIZED)
        }
        Some(None) => {
            tracing::warn!("Invalid Authorization header format");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("Missing Authorization header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

pub async fn rate_limit_middleware(
    State(rate_limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let ip = extract_client_ip(request.headers());

    if rate_limiter.check(ip) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(%ip, "Rate limit exceeded");
        Err(StatusCode::TOO_MANY_REQUESTS)
    }
}

fn extract_client_ip(headers: &HeaderMap) -> IpAddr {
    let forwarded: Option<IpAddr> = headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());

    let real_ip = || -> Option<IpAddr> {
        headers
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .and_then(|ip| ip.trim().parse().ok())
    };

    forwarded
        .or_else(real_ip)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// The caller as asserted by the upstream auth proxy.
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let user_id = header(USER_ID_HEADER).ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                format!("Missing {} header", USER_ID_HEADER),
            )
        })?;

        let role = match header(USER_ROLE_HEADER) {
            None => Role::Student,
            Some(role) => Role::from_str(&role.to_ascii_lowercase()).ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    format!("Unknown role: {}", role),
                )
            })?,
        };

        Ok(Identity::new(user_id, role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_blocks_requests_over_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let ip: IpAddr = "192.168.1.1".parse().unwrap();

        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));
    }

    #[test]
    fn rate_limiter_tracks_ips_independently() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let ip1: IpAddr = "10.0.0.1".parse().unwrap();
        let ip2: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(ip1));
        assert!(!limiter.check(ip1));
        assert!(limiter.check(ip2));
    }

    #[test]
    fn cleanup_keeps_recent_requests() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limiter.check(ip));
        limiter.cleanup();
        assert!(!limiter.check(ip));
    }

    #[test]
    fn client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "203.0.113.7, 10.0.0.1".parse().unwrap());
        headers.insert("X-Real-IP", "198.51.100.2".parse().unwrap());
        assert_eq!(
            extract_client_ip(&headers),
            "203.0.113.7".parse::<IpAddr>().unwrap()
        );

        headers.remove("X-Forwarded-For");
        assert_eq!(
            extract_client_ip(&headers),
            "198.51.100.2".parse::<IpAddr>().unwrap()
        );

        assert_eq!(
            extract_client_ip(&HeaderMap::new()),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
    }

    #[test]
    fn security_config_follows_ledger_config() {
        let config = LedgerConfig {
            api_key: Some("secret".to_string()),
            rate_limit_per_minute: 10,
            ..LedgerConfig::default()
        };
        let security = SecurityConfig::from_config(&config);
        assert_eq!(security.api_key.as_deref(), Some("secret"));
        assert!(security.rate_limiter.is_some());

        let local = SecurityConfig::from_config(&LedgerConfig::default());
        assert!(local.api_key.is_none());
        assert!(local.rate_limiter.is_none());
    }
}
