use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::{Clock, DefaultClock},
    DefaultKeyedRateLimiter, Quota, RateLimiter,
};

use crate::config::AppConfig;
use crate::errors::{ConfigError, KeyError};

/// Forget idle clients every this many checks.
const RETAIN_EVERY: u64 = 4096;

/// Per-client-IP limiter. `None` means unlimited.
pub struct ClientLimiter {
    limiter: Option<DefaultKeyedRateLimiter<IpAddr>>,
    checks: AtomicU64,
}

impl ClientLimiter {
    pub fn disabled() -> Self {
        Self {
            limiter: None,
            checks: AtomicU64::new(0),
        }
    }

    fn with_quota(quota: Option<Quota>) -> Self {
        Self {
            limiter: quota.map(RateLimiter::keyed),
            checks: AtomicU64::new(0),
        }
    }

    /// At most `max` requests per second; `0` disables the limit.
    pub fn per_second(max: u32) -> Self {
        Self::with_quota(NonZeroU32::new(max).map(Quota::per_second))
    }

    /// At most `max` requests per `window`, all of which may arrive at once.
    /// `0` or an empty window disables the limit.
    pub fn per_window(max: u32, window: Duration) -> Self {
        let quota = NonZeroU32::new(max).and_then(|burst| {
            Quota::with_period(window / burst.get()).map(|q| q.allow_burst(burst))
        });
        Self::with_quota(quota)
    }

    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    /// `Err(seconds)` tells the client how long to wait before retrying.
    pub fn check(&self, client: IpAddr) -> Result<(), u64> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };

        if self.checks.fetch_add(1, Ordering::Relaxed) % RETAIN_EVERY == RETAIN_EVERY - 1 {
            limiter.retain_recent();
        }

        limiter.check_key(&client).map_err(|not_until| {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            retry_after_secs(wait)
        })
    }
}

fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

/// The two limits applied to HTTP clients.
pub struct RateLimits {
    /// Every request, any route.
    pub requests: ClientLimiter,
    /// POST /key only, on top of `requests`.
    pub key_creation: ClientLimiter,
}

impl RateLimits {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ConfigError> {
        let window = cfg.key_creation_window()?;

        let limits = Self {
            requests: ClientLimiter::per_second(cfg.max_requests_per_sec),
            key_creation: ClientLimiter::per_window(
                cfg.key_creation_ratelimit_max_requests,
                window,
            ),
        };

        if limits.requests.is_enabled() {
            tracing::info!("Rate limit: {} requests/s per client", cfg.max_requests_per_sec);
        }
        if limits.key_creation.is_enabled() {
            tracing::info!(
                "Key creation limit: {} per {:?} per client",
                cfg.key_creation_ratelimit_max_requests,
                window
            );
        }
        Ok(limits)
    }

    pub fn disabled() -> Self {
        Self {
            requests: ClientLimiter::disabled(),
            key_creation: ClientLimiter::disabled(),
        }
    }
}

/// Peer address from `into_make_service_with_connect_info`; requests built
/// in-process have none and share one bucket.
fn client_ip(request: &Request) -> IpAddr {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

async fn enforce(limiter: &ClientLimiter, request: Request, next: Next) -> Response {
    let client = client_ip(&request);
    match limiter.check(client) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            tracing::debug!("Rate limited {client}, retry after {retry_after}s");
            KeyError::TooManyRequests { retry_after }.into_response()
        }
    }
}

/// Global per-client limit.
pub async fn limit_requests(
    State(limits): State<Arc<RateLimits>>,
    request: Request,
    next: Next,
) -> Response {
    enforce(&limits.requests, request, next).await
}

/// Extra limit on POST /key.
pub async fn limit_key_creation(
    State(limits): State<Arc<RateLimits>>,
    request: Request,
    next: Next,
) -> Response {
    enforce(&limits.key_creation, request, next).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn window_allows_burst_then_rejects() {
        let limiter = ClientLimiter::per_window(2, Duration::from_secs(60));

        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_ok());

        let retry = limiter.check(ip(1)).unwrap_err();
        assert!((1..=30).contains(&retry), "retry after {retry}");
    }

    #[test]
    fn clients_have_separate_buckets() {
        let limiter = ClientLimiter::per_window(1, Duration::from_secs(60));

        assert!(limiter.check(ip(1)).is_ok());
        assert!(limiter.check(ip(1)).is_err());
        assert!(limiter.check(ip(2)).is_ok());
        assert!(limiter.check(IpAddr::V6(Ipv6Addr::LOCALHOST)).is_ok());
    }

    #[test]
    fn zero_disables_the_limit() {
        for limiter in [
            ClientLimiter::per_second(0),
            ClientLimiter::per_window(0, Duration::from_secs(60)),
            ClientLimiter::per_window(5, Duration::ZERO),
            ClientLimiter::disabled(),
        ] {
            assert!(!limiter.is_enabled());
            for _ in 0..100 {
                assert!(limiter.check(ip(1)).is_ok());
            }
        }
    }

    #[test]
    fn retry_after_rounds_up_to_whole_seconds() {
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(200)), 1);
        assert_eq!(retry_after_secs(Duration::from_secs(2)), 2);
        assert_eq!(retry_after_secs(Duration::from_millis(2001)), 3);
    }

    #[test]
    fn defaults_follow_config() {
        let limits = RateLimits::from_config(&AppConfig::default()).unwrap();
        assert!(limits.requests.is_enabled());
        assert!(limits.key_creation.is_enabled());

        // Default: one key per minute.
        assert!(limits.key_creation.check(ip(9)).is_ok());
        assert!(limits.key_creation.check(ip(9)).is_err());
    }
}
