//! Per-client abuse guard — sliding-window failure counting and blocks.
//!
//! Independent of attendance state: a blocked client is rejected at the
//! entry point before any detection work runs. Failure timestamps leave
//! the window only by time-based expiry; a successful mark never erases
//! them. Admin login-attempt counters are tracked here too but kept
//! conceptually separate — those ARE cleared by a successful mark.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy)]
pub struct AbuseConfig {
    /// Sliding window over which failures are counted.
    pub window: Duration,
    /// Failures within the window that trigger a block.
    pub max_failures: usize,
    /// How long a triggered block lasts.
    pub block_duration: Duration,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            window: Duration::minutes(10),
            max_failures: 5,
            block_duration: Duration::hours(1),
        }
    }
}

#[derive(Default)]
struct ClientState {
    failures: VecDeque<DateTime<Utc>>,
    blocked_until: Option<DateTime<Utc>>,
    login_attempts: u32,
}

/// Shared across all concurrent scan requests. Lock scope is a handful of
/// map operations, never held across I/O.
pub struct AbuseGuard {
    config: AbuseConfig,
    clients: Mutex<HashMap<String, ClientState>>,
}

impl AbuseGuard {
    pub fn new(config: AbuseConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ClientState>> {
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Entry-point check. `Err` carries the block expiry; the block lifts
    /// exactly at that instant.
    pub fn check(&self, client: &str, now: DateTime<Utc>) -> Result<(), DateTime<Utc>> {
        let mut clients = self.lock();
        let Some(state) = clients.get_mut(client) else {
            return Ok(());
        };
        match state.blocked_until {
            Some(until) if now < until => Err(until),
            Some(_) => {
                state.blocked_until = None;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Record a liveness/match failure. Returns the block expiry when this
    /// failure tips the client over the limit.
    pub fn record_failure(&self, client: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut clients = self.lock();
        let state = clients.entry(client.to_string()).or_default();

        state.failures.push_back(now);
        let horizon = now - self.config.window;
        while state.failures.front().is_some_and(|&t| t <= horizon) {
            state.failures.pop_front();
        }

        if state.failures.len() >= self.config.max_failures {
            let until = now + self.config.block_duration;
            state.blocked_until = Some(until);
            tracing::warn!(
                client,
                failures = state.failures.len(),
                until = %until.to_rfc3339(),
                "client blocked"
            );
            Some(until)
        } else {
            None
        }
    }

    /// A successful mark clears the admin login-attempt counter only;
    /// recorded failures stay until they age out of the window.
    pub fn record_success(&self, client: &str) {
        let mut clients = self.lock();
        if let Some(state) = clients.get_mut(client) {
            state.login_attempts = 0;
        }
    }

    /// Failures currently inside the sliding window.
    pub fn recent_failures(&self, client: &str, now: DateTime<Utc>) -> usize {
        let clients = self.lock();
        let Some(state) = clients.get(client) else {
            return 0;
        };
        let horizon = now - self.config.window;
        state.failures.iter().filter(|&&t| t > horizon).count()
    }

    // --- Admin login-attempt counters (separate concern, same keying) ---
    // Consumed by the admin-auth surface, which lives outside this daemon.

    #[allow(dead_code)]
    pub fn record_login_failure(&self, client: &str) -> u32 {
        let mut clients = self.lock();
        let state = clients.entry(client.to_string()).or_default();
        state.login_attempts += 1;
        state.login_attempts
    }

    #[allow(dead_code)]
    pub fn login_attempts(&self, client: &str) -> u32 {
        self.lock()
            .get(client)
            .map(|s| s.login_attempts)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard() -> AbuseGuard {
        AbuseGuard::new(AbuseConfig::default())
    }

    #[test]
    fn test_fresh_client_allowed() {
        let g = guard();
        assert!(g.check("10.0.0.1", Utc::now()).is_ok());
    }

    #[test]
    fn test_five_failures_in_window_blocks() {
        let g = guard();
        let t0 = Utc::now();
        for i in 0..4 {
            assert_eq!(g.record_failure("c", t0 + Duration::seconds(i)), None);
            assert!(g.check("c", t0 + Duration::seconds(i)).is_ok());
        }
        let until = g.record_failure("c", t0 + Duration::seconds(4));
        assert_eq!(until, Some(t0 + Duration::seconds(4) + Duration::hours(1)));
        assert!(g.check("c", t0 + Duration::seconds(5)).is_err());
    }

    #[test]
    fn test_unblocked_exactly_at_expiry() {
        let g = guard();
        let t0 = Utc::now();
        for _ in 0..5 {
            g.record_failure("c", t0);
        }
        let until = t0 + Duration::hours(1);
        assert_eq!(g.check("c", until - Duration::seconds(1)), Err(until));
        // The block lifts exactly when the expiry is reached.
        assert!(g.check("c", until).is_ok());
    }

    #[test]
    fn test_failures_outside_window_expire() {
        let g = guard();
        let t0 = Utc::now();
        for _ in 0..4 {
            g.record_failure("c", t0);
        }
        // Fifth failure lands after the first four left the window.
        let late = t0 + Duration::minutes(11);
        assert_eq!(g.record_failure("c", late), None);
        assert_eq!(g.recent_failures("c", late), 1);
    }

    #[test]
    fn test_success_keeps_failures_clears_login_attempts() {
        let g = guard();
        let t0 = Utc::now();
        g.record_failure("c", t0);
        g.record_failure("c", t0);
        g.record_login_failure("c");
        g.record_login_failure("c");

        g.record_success("c");

        assert_eq!(g.recent_failures("c", t0), 2);
        assert_eq!(g.login_attempts("c"), 0);
    }

    #[test]
    fn test_clients_tracked_independently() {
        let g = guard();
        let t0 = Utc::now();
        for _ in 0..5 {
            g.record_failure("bad", t0);
        }
        assert!(g.check("bad", t0 + Duration::seconds(1)).is_err());
        assert!(g.check("good", t0 + Duration::seconds(1)).is_ok());
    }
}
