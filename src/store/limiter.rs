use crate::config::{RateLimits, WindowLimits};
use crate::orchestrator::collaborators::{RateLimitDecision, Window};
use crate::orchestrator::types::Identity;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Increments between sweeps of idle identities.
const SWEEP_INTERVAL: u64 = 256;

#[derive(Debug, Default)]
struct WindowState {
    minute: VecDeque<Instant>,
    day: VecDeque<Instant>,
}

impl WindowState {
    fn is_idle(&self) -> bool {
        self.minute.is_empty() && self.day.is_empty()
    }
}

/// Sliding-window request counters keyed by identity.
///
/// Checking never consumes quota; only [`SlidingWindowLimiter::increment`]
/// records a request.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limits: RateLimits,
    minute_window: Duration,
    day_window: Duration,
    state: DashMap<String, WindowState>,
    increments: AtomicU64,
}

impl SlidingWindowLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self::with_windows(limits, Window::Minute.duration(), Window::Day.duration())
    }

    /// Same limiter with custom window lengths.
    pub fn with_windows(limits: RateLimits, minute_window: Duration, day_window: Duration) -> Self {
        Self {
            limits,
            minute_window,
            day_window,
            state: DashMap::new(),
            increments: AtomicU64::new(0),
        }
    }

    fn prune(queue: &mut VecDeque<Instant>, window: Duration, now: Instant) {
        while queue
            .front()
            .is_some_and(|at| now.duration_since(*at) >= window)
        {
            queue.pop_front();
        }
    }

    fn retry_after(queue: &VecDeque<Instant>, window: Duration, now: Instant) -> Option<Duration> {
        queue
            .front()
            .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
    }

    pub fn check(&self, identity: &Identity) -> RateLimitDecision {
        let limits: WindowLimits = self.limits.for_class(identity.is_authenticated());
        let now = Instant::now();
        let key = identity.key();

        let Some(mut state) = self.state.get_mut(&key) else {
            return self.decide(identity, limits, &WindowState::default(), now);
        };
        Self::prune(&mut state.minute, self.minute_window, now);
        Self::prune(&mut state.day, self.day_window, now);
        if !state.is_idle() {
            return self.decide(identity, limits, &state, now);
        }

        drop(state);
        self.state.remove_if(&key, |_, state| state.is_idle());
        self.decide(identity, limits, &WindowState::default(), now)
    }

    fn decide(
        &self,
        identity: &Identity,
        limits: WindowLimits,
        state: &WindowState,
        now: Instant,
    ) -> RateLimitDecision {
        if state.day.len() >= limits.per_day as usize {
            let hint = if identity.is_authenticated() {
                ""
            } else {
                " Sign in for a higher limit."
            };
            return RateLimitDecision::limited(
                format!(
                    "Daily limit of {} messages reached.{}",
                    limits.per_day, hint
                ),
                Self::retry_after(&state.day, self.day_window, now),
            );
        }

        if state.minute.len() >= limits.per_minute as usize {
            let retry_after = Self::retry_after(&state.minute, self.minute_window, now);
            return RateLimitDecision::limited(
                format!(
                    "Too many messages. Please wait {} seconds.",
                    retry_after.map(|d| d.as_secs().max(1)).unwrap_or(1)
                ),
                retry_after,
            );
        }

        RateLimitDecision::allowed()
    }

    pub fn increment(&self, identity: &Identity, window: Window) {
        let seen = self.increments.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % SWEEP_INTERVAL == 0 {
            self.sweep();
        }

        let now = Instant::now();
        let mut state = self.state.entry(identity.key()).or_default();
        match window {
            Window::Minute => state.minute.push_back(now),
            Window::Day => state.day.push_back(now),
        }
    }

    /// Drop identities with no requests left in either window.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.state.retain(|_, state| {
            Self::prune(&mut state.minute, self.minute_window, now);
            Self::prune(&mut state.day, self.day_window, now);
            !state.is_idle()
        });
    }

    /// Number of identities currently holding counters.
    pub fn tracked(&self) -> usize {
        self.state.len()
    }

    /// Requests recorded for `identity` in the current window.
    pub fn count(&self, identity: &Identity, window: Window) -> usize {
        let now = Instant::now();
        self.state
            .get(&identity.key())
            .map(|state| {
                let (queue, length) = match window {
                    Window::Minute => (&state.minute, self.minute_window),
                    Window::Day => (&state.day, self.day_window),
                };
                queue
                    .iter()
                    .filter(|at| now.duration_since(**at) < length)
                    .count()
            })
            .unwrap_or(0)
    }
}
