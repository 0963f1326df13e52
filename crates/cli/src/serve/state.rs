//! Application state and rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use helpdesk_storage::SqliteStore;
use helpdesk_workflow::{DelegationRegistry, StaticDirectory, TicketWorkflow};
use tokio::sync::Mutex;

use super::RATE_LIMIT_WINDOW_SECS;

/// Per-IP request tracker: (request count, window start time).
type IpTracker = HashMap<IpAddr, (u64, Instant)>;

struct Windows {
    by_ip: IpTracker,
    last_prune: Instant,
}

/// In-memory per-IP rate limiter.
///
/// Expired windows are dropped at most once per window length, so the map
/// only holds clients seen during the last minute or so.
pub(crate) struct RateLimiter {
    tracker: Mutex<Windows>,
    /// Maximum requests per window.
    pub(crate) max_requests: u64,
}

impl RateLimiter {
    pub(crate) fn new(max_requests: u64) -> Self {
        Self {
            tracker: Mutex::new(Windows {
                by_ip: HashMap::new(),
                last_prune: Instant::now(),
            }),
            max_requests,
        }
    }

    /// Returns Err(retry_after_secs) once `ip` exceeded its budget for the
    /// current window.
    pub(crate) async fn check(&self, ip: IpAddr) -> Result<(), u64> {
        self.check_at(ip, Instant::now()).await
    }

    async fn check_at(&self, ip: IpAddr, now: Instant) -> Result<(), u64> {
        let window = Duration::from_secs(RATE_LIMIT_WINDOW_SECS);
        let mut tracker = self.tracker.lock().await;

        if now.saturating_duration_since(tracker.last_prune) >= window {
            tracker
                .by_ip
                .retain(|_, (_, start)| now.saturating_duration_since(*start) < window);
            tracker.last_prune = now;
        }

        let entry = tracker.by_ip.entry(ip).or_insert((0, now));

        let elapsed = now.saturating_duration_since(entry.1).as_secs();
        if elapsed >= RATE_LIMIT_WINDOW_SECS {
            *entry = (0, now);
        }

        entry.0 += 1;
        if entry.0 > self.max_requests {
            Err(RATE_LIMIT_WINDOW_SECS.saturating_sub(elapsed))
        } else {
            Ok(())
        }
    }
}

/// Shared across request handlers.
pub(crate) struct AppState {
    pub(crate) workflow: TicketWorkflow<SqliteStore>,
    pub(crate) delegation: DelegationRegistry<SqliteStore>,
    pub(crate) directory: Arc<StaticDirectory>,
    pub(crate) rate_limiter: RateLimiter,
    /// None = no auth required.
    pub(crate) api_key: Option<String>,
}
