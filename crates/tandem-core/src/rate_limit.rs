//! Per-peer rate limiting for the agents' HTTP surfaces

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::ApiError;

/// Idle peers are swept from the table once every this many checks
const SWEEP_EVERY: usize = 256;

/// Sliding-window limiter keyed by peer IP.
///
/// Forwarding headers are ignored: the key is the address the connection
/// came from, so a client cannot pick its own bucket.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<IpAddr, VecDeque<Instant>>>,
    checks: Arc<AtomicUsize>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            checks: Arc::new(AtomicUsize::new(0)),
            max_requests,
            window,
        }
    }

    /// Record a request from `peer`. Returns `false` when the peer is over
    /// its limit; rejected requests are not recorded.
    pub fn check_and_record(&self, peer: IpAddr) -> bool {
        let now = Instant::now();
        let cutoff = now.checked_sub(self.window).unwrap_or(now);

        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep(cutoff);
        }

        let mut entry = self.windows.entry(peer).or_default();
        let window = entry.value_mut();
        while window.front().is_some_and(|&t| t < cutoff) {
            window.pop_front();
        }

        if window.len() >= self.max_requests {
            warn!(
                "Rate limit exceeded for {}: {} requests in {:?}",
                peer,
                window.len(),
                self.window
            );
            return false;
        }
        window.push_back(now);
        true
    }

    /// Drop peers whose newest request is older than `cutoff`
    fn sweep(&self, cutoff: Instant) {
        let before = self.windows.len();
        self.windows
            .retain(|_, window| window.back().is_some_and(|&t| t >= cutoff));
        let evicted = before.saturating_sub(self.windows.len());
        if evicted > 0 {
            debug!("Evicted {} idle rate-limit windows", evicted);
        }
    }

    /// Number of peers currently tracked
    pub fn tracked_peers(&self) -> usize {
        self.windows.len()
    }
}

/// The connecting peer's address. Requests served without connect info
/// share one bucket.
fn peer_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Middleware: reject with `RATE_LIMITED` once a peer exceeds its window
pub async fn enforce_rate_limit(
    State(limiter): State<RateLimiter>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !limiter.check_and_record(peer_ip(&req)) {
        return Err(ApiError::RateLimited);
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn request_from(peer: &str, forwarded: Option<&str>) -> Request {
        let mut builder = Request::builder();
        if let Some(f) = forwarded {
            builder = builder.header("x-forwarded-for", f);
        }
        let mut req = builder.body(axum::body::Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        req
    }

    #[test]
    fn test_rejects_after_limit_and_does_not_record_rejections() {
        let limiter = RateLimiter::new(2, Duration::from_millis(80));
        assert!(limiter.check_and_record(ip(1)));
        assert!(limiter.check_and_record(ip(1)));
        for _ in 0..5 {
            assert!(!limiter.check_and_record(ip(1)));
        }
        assert!(limiter.check_and_record(ip(2)));

        std::thread::sleep(Duration::from_millis(100));
        assert!(limiter.check_and_record(ip(1)));
    }

    #[test]
    fn test_forwarded_for_is_ignored() {
        let spoofed = request_from("198.51.100.4:5000", Some("203.0.113.7"));
        assert_eq!(peer_ip(&spoofed), "198.51.100.4".parse::<IpAddr>().unwrap());

        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check_and_record(peer_ip(&request_from("198.51.100.4:5000", Some("1.1.1.1")))));
        assert!(!limiter.check_and_record(peer_ip(&request_from("198.51.100.4:5001", Some("2.2.2.2")))));
        assert_eq!(limiter.tracked_peers(), 1);
    }

    #[test]
    fn test_missing_connect_info_shares_a_bucket() {
        let req = Request::builder().body(axum::body::Body::empty()).unwrap();
        assert_eq!(peer_ip(&req), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn test_idle_peers_are_evicted() {
        let limiter = RateLimiter::new(5, Duration::from_millis(20));
        for last in 0..100 {
            assert!(limiter.check_and_record(ip(last)));
        }
        assert_eq!(limiter.tracked_peers(), 100);

        std::thread::sleep(Duration::from_millis(40));
        for _ in 0..SWEEP_EVERY {
            limiter.check_and_record(ip(200));
        }
        assert!(limiter.tracked_peers() <= 2);
    }
}
