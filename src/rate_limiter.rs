//! Per-client request counting over fixed windows.
//!
//! Each client address owns a counter and the instant its window opened. A
//! request past the window's end starts a fresh window; a request inside a
//! full window is rejected. Windows that stop receiving traffic are dropped by
//! [`RateLimiter::sweep`], which the server runs on an interval.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started: Instant,
    count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    Allowed { remaining: u32, reset: Duration },
    Rejected { reset: Duration },
    /// Limiting is switched off in the configuration.
    Unlimited,
}

pub(crate) struct RateLimiter {
    windows: DashMap<IpAddr, RateWindow>,
    window: Duration,
    max_requests: u32,
    enabled: bool,
}

impl RateLimiter {
    pub(crate) fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            window: Duration::from_secs(config.window_secs),
            max_requests: config.max_requests,
            enabled: config.enabled,
        }
    }

    pub(crate) fn admit(&self, client: IpAddr) -> Admission {
        self.admit_at(client, Instant::now())
    }

    fn admit_at(&self, client: IpAddr, now: Instant) -> Admission {
        if !self.enabled {
            return Admission::Unlimited;
        }

        // The entry guard holds the shard lock, so the read-modify-write below
        // cannot interleave with another request from the same client.
        let mut entry = self
            .windows
            .entry(client)
            .or_insert(RateWindow { started: now, count: 0 });
        let window = entry.value_mut();

        if now.saturating_duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }
        let reset = self
            .window
            .saturating_sub(now.saturating_duration_since(window.started));

        if window.count >= self.max_requests {
            return Admission::Rejected { reset };
        }
        window.count += 1;
        Admission::Allowed {
            remaining: self.max_requests - window.count,
            reset,
        }
    }

    /// Drops every window that has ended. Returns how many were removed.
    pub(crate) fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, window| now.saturating_duration_since(window.started) < self.window);
        before.saturating_sub(self.windows.len())
    }

    pub(crate) fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    pub(crate) fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub(crate) fn window(&self) -> Duration {
        self.window
    }

    pub(crate) fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let removed = limiter.sweep();
                if removed > 0 {
                    tracing::debug!(
                        removed,
                        remaining = limiter.tracked_clients(),
                        "Rate limiter sweep completed"
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn limiter(max_requests: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            enabled: true,
            window_secs,
            max_requests,
            sweep_interval_secs: 60,
        })
    }

    fn client(last_octet: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last_octet))
    }

    #[test]
    fn rejects_the_request_past_the_limit() {
        let limiter = limiter(500, 900);
        let now = Instant::now();

        for _ in 0..500 {
            assert!(matches!(
                limiter.admit_at(client(1), now),
                Admission::Allowed { .. }
            ));
        }
        assert!(matches!(
            limiter.admit_at(client(1), now),
            Admission::Rejected { .. }
        ));
        assert!(matches!(
            limiter.admit_at(client(2), now),
            Admission::Allowed { remaining: 499, .. }
        ));
    }

    #[test]
    fn remaining_counts_down_and_reset_tracks_window() {
        let limiter = limiter(3, 60);
        let now = Instant::now();

        assert_eq!(
            limiter.admit_at(client(1), now),
            Admission::Allowed {
                remaining: 2,
                reset: Duration::from_secs(60)
            }
        );
        assert_eq!(
            limiter.admit_at(client(1), now + Duration::from_secs(20)),
            Admission::Allowed {
                remaining: 1,
                reset: Duration::from_secs(40)
            }
        );
    }

    #[test]
    fn window_expiry_resets_the_count() {
        let limiter = limiter(2, 60);
        let now = Instant::now();

        limiter.admit_at(client(1), now);
        limiter.admit_at(client(1), now);
        assert_eq!(
            limiter.admit_at(client(1), now + Duration::from_secs(59)),
            Admission::Rejected {
                reset: Duration::from_secs(1)
            }
        );
        assert!(matches!(
            limiter.admit_at(client(1), now + Duration::from_secs(60)),
            Admission::Allowed { remaining: 1, .. }
        ));
    }

    #[test]
    fn sweep_drops_only_ended_windows() {
        let limiter = limiter(10, 60);
        let now = Instant::now();

        limiter.admit_at(client(1), now);
        limiter.admit_at(client(2), now + Duration::from_secs(30));
        assert_eq!(limiter.tracked_clients(), 2);

        assert_eq!(limiter.sweep_at(now + Duration::from_secs(61)), 1);
        assert_eq!(limiter.tracked_clients(), 1);
        assert_eq!(limiter.sweep_at(now + Duration::from_secs(91)), 1);
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn disabled_limiter_admits_everything_without_tracking() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            enabled: false,
            window_secs: 60,
            max_requests: 1,
            sweep_interval_secs: 60,
        });

        for _ in 0..10 {
            assert_eq!(limiter.admit(client(1)), Admission::Unlimited);
        }
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[tokio::test]
    async fn sweeper_task_evicts_idle_clients() {
        let limiter = Arc::new(limiter(10, 1));
        limiter.admit(client(1));
        let sweeper = limiter.spawn_sweeper(Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(limiter.tracked_clients(), 0);
        sweeper.abort();
    }
}
