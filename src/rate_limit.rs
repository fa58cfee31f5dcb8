//! Per-client fixed-window request limiting.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::{error::ApiError, state::AppState};

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

struct Table {
    windows: HashMap<IpAddr, Window>,
    last_prune: Instant,
}

pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    table: Mutex<Table>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            table: Mutex::new(Table {
                windows: HashMap::new(),
                last_prune: Instant::now(),
            }),
        }
    }

    /// Counts one request for `client`. Returns the time left in the current
    /// window when the client is over its budget.
    pub fn check(&self, client: IpAddr) -> Result<(), Duration> {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: IpAddr, now: Instant) -> Result<(), Duration> {
        let Ok(mut table) = self.table.lock() else {
            warn!("rate limiter lock poisoned, allowing request");
            return Ok(());
        };

        // At most one sweep of expired windows per window length.
        if now.saturating_duration_since(table.last_prune) >= self.window {
            let window = self.window;
            table
                .windows
                .retain(|_, w| now.saturating_duration_since(w.started) < window);
            table.last_prune = now;
        }

        let entry = table.windows.entry(client).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.saturating_duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        if entry.count >= self.max_requests {
            let elapsed = now.saturating_duration_since(entry.started);
            return Err(self.window.saturating_sub(elapsed));
        }
        entry.count += 1;
        Ok(())
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.table.lock().map(|t| t.windows.len()).unwrap_or(0)
    }
}

/// Rejects clients over budget with 429. Requests without a peer address
/// (in-process tests) pass through.
pub async fn limit_by_ip(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(ConnectInfo(addr)) = connect_info {
        if let Err(retry_after) = state.limiter.check(addr.ip()) {
            warn!(
                client = %addr.ip(),
                retry_after_secs = retry_after.as_secs(),
                "rate limited"
            );
            let mut res = ApiError::RateLimited.into_response();
            res.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after.as_secs().max(1)),
            );
            return res;
        }
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const A: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const B: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.check_at(A, now).is_ok());
        }
        let retry = limiter.check_at(A, now).unwrap_err();
        assert!(retry <= Duration::from_secs(60));
    }

    #[test]
    fn clients_are_counted_separately() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at(A, now).is_ok());
        assert!(limiter.check_at(B, now).is_ok());
        assert!(limiter.check_at(A, now).is_err());
    }

    #[test]
    fn window_resets() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at(A, now).is_ok());
        assert!(limiter.check_at(A, now).is_err());
        assert!(limiter.check_at(A, now + Duration::from_secs(61)).is_ok());
    }

    #[test]
    fn expired_windows_are_swept_once_per_window() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let start = Instant::now();
        limiter.check_at(A, start).unwrap();
        limiter.check_at(B, start + Duration::from_secs(30)).unwrap();
        assert_eq!(limiter.tracked_clients(), 2);

        // A's window has expired but the sweep interval has not elapsed yet.
        let c = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3));
        limiter.check_at(c, start + Duration::from_secs(59)).unwrap();
        assert_eq!(limiter.tracked_clients(), 3);

        // Sweep drops A (expired); B and C are still inside their windows.
        limiter.check_at(c, start + Duration::from_secs(61)).unwrap();
        assert_eq!(limiter.tracked_clients(), 2);
    }
}
