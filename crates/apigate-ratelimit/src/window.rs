//! Per-key algorithm state

use crate::limiter::Decision;
use crate::quota::{Algorithm, Quota};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WindowState {
    Fixed {
        started: Instant,
        count: u64,
        limit: u64,
        window: Duration,
    },
    Sliding {
        current_start: Instant,
        current: u64,
        previous: u64,
        limit: u64,
        window: Duration,
    },
    Bucket {
        tokens: f64,
        refilled_at: Instant,
        limit: u64,
        window: Duration,
    },
}

impl WindowState {
    pub(crate) fn seed(quota: &Quota, now: Instant) -> Self {
        match quota.algorithm() {
            Algorithm::FixedWindow => Self::Fixed {
                started: now,
                count: 0,
                limit: quota.limit(),
                window: quota.window(),
            },
            Algorithm::SlidingWindow => Self::Sliding {
                current_start: now,
                current: 0,
                previous: 0,
                limit: quota.limit(),
                window: quota.window(),
            },
            #[allow(clippy::cast_precision_loss)]
            Algorithm::TokenBucket => Self::Bucket {
                tokens: quota.limit() as f64,
                refilled_at: now,
                limit: quota.limit(),
                window: quota.window(),
            },
        }
    }

    /// Whether this state was built for `quota`. A mismatch means two
    /// policies share a key with different settings.
    pub(crate) fn matches(&self, quota: &Quota) -> bool {
        match (self, quota.algorithm()) {
            (Self::Fixed { limit, window, .. }, Algorithm::FixedWindow)
            | (Self::Sliding { limit, window, .. }, Algorithm::SlidingWindow)
            | (Self::Bucket { limit, window, .. }, Algorithm::TokenBucket) => {
                *limit == quota.limit() && *window == quota.window()
            }
            _ => false,
        }
    }

    /// Admit one call or reject it. Rejections leave the state untouched.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub(crate) fn admit(&mut self, quota: &Quota, now: Instant) -> Decision {
        let limit = quota.limit();
        let window = quota.window();

        match self {
            Self::Fixed { started, count, .. } => {
                if now.duration_since(*started) >= window {
                    *started = now;
                    *count = 0;
                }
                if *count < limit {
                    *count += 1;
                    Decision::Allowed {
                        limit,
                        remaining: limit - *count,
                    }
                } else {
                    Decision::Rejected {
                        limit,
                        retry_after: window.saturating_sub(now.duration_since(*started)),
                    }
                }
            }
            Self::Sliding {
                current_start,
                current,
                previous,
                ..
            } => {
                let elapsed = now.duration_since(*current_start);
                if elapsed >= window.saturating_mul(2) {
                    *current_start = now;
                    *previous = 0;
                    *current = 0;
                } else if elapsed >= window {
                    *current_start += window;
                    *previous = *current;
                    *current = 0;
                }

                let into_window = now.duration_since(*current_start);
                let weight = 1.0 - into_window.as_secs_f64() / window.as_secs_f64();
                let estimate = *previous as f64 * weight + *current as f64;

                if estimate + 1.0 <= limit as f64 {
                    *current += 1;
                    let remaining = (limit as f64 - estimate - 1.0).floor().max(0.0) as u64;
                    Decision::Allowed { limit, remaining }
                } else {
                    let until_rollover = window.saturating_sub(into_window);
                    let headroom = limit as f64 - *current as f64 - 1.0;
                    // the previous window's share decays linearly; find when it fits
                    let retry_after = if *previous == 0 || headroom < 0.0 {
                        until_rollover
                    } else {
                        let fits_at = window.as_secs_f64() * (1.0 - headroom / *previous as f64);
                        Duration::from_secs_f64(
                            (fits_at - into_window.as_secs_f64()).max(0.001),
                        )
                        .min(until_rollover)
                    };
                    Decision::Rejected { limit, retry_after }
                }
            }
            Self::Bucket {
                tokens,
                refilled_at,
                ..
            } => {
                let rate = limit as f64 / window.as_secs_f64();
                let elapsed = now.duration_since(*refilled_at).as_secs_f64();
                *tokens = (*tokens + elapsed * rate).min(limit as f64);
                *refilled_at = now;

                if *tokens >= 1.0 {
                    *tokens -= 1.0;
                    Decision::Allowed {
                        limit,
                        remaining: tokens.floor() as u64,
                    }
                } else {
                    Decision::Rejected {
                        limit,
                        retry_after: Duration::from_secs_f64((1.0 - *tokens) / rate),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quota(limit: i64, secs: u64, algorithm: Algorithm) -> Quota {
        Quota::new(limit, Duration::from_secs(secs), algorithm).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_window_rejects_after_limit() {
        let q = quota(2, 10, Algorithm::FixedWindow);
        let now = Instant::now();
        let mut state = WindowState::seed(&q, now);

        assert_eq!(state.admit(&q, now), Decision::Allowed { limit: 2, remaining: 1 });
        assert_eq!(state.admit(&q, now), Decision::Allowed { limit: 2, remaining: 0 });
        assert_eq!(
            state.admit(&q, now + Duration::from_secs(4)),
            Decision::Rejected {
                limit: 2,
                retry_after: Duration::from_secs(6)
            }
        );
        assert!(state.admit(&q, now + Duration::from_secs(10)).is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn sliding_window_weights_previous() {
        let q = quota(10, 10, Algorithm::SlidingWindow);
        let start = Instant::now();
        let mut state = WindowState::seed(&q, start);
        for _ in 0..10 {
            assert!(state.admit(&q, start).is_allowed());
        }

        // halfway through the next window half of the previous ten still count
        let mid = start + Duration::from_secs(15);
        let mut admitted = 0;
        while state.admit(&q, mid).is_allowed() {
            admitted += 1;
        }
        assert_eq!(admitted, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn sliding_window_forgets_after_two_windows() {
        let q = quota(3, 10, Algorithm::SlidingWindow);
        let start = Instant::now();
        let mut state = WindowState::seed(&q, start);
        for _ in 0..3 {
            state.admit(&q, start);
        }
        assert!(!state.admit(&q, start).is_allowed());

        let later = start + Duration::from_secs(25);
        assert_eq!(
            state.admit(&q, later),
            Decision::Allowed { limit: 3, remaining: 2 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn token_bucket_refills_gradually() {
        let q = quota(4, 4, Algorithm::TokenBucket);
        let start = Instant::now();
        let mut state = WindowState::seed(&q, start);
        for _ in 0..4 {
            assert!(state.admit(&q, start).is_allowed());
        }
        match state.admit(&q, start) {
            Decision::Rejected { retry_after, .. } => {
                assert_eq!(retry_after, Duration::from_secs(1));
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        assert!(state.admit(&q, start + Duration::from_secs(1)).is_allowed());
        assert!(!state.admit(&q, start + Duration::from_secs(1)).is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_state_tracks_its_quota() {
        let q = quota(4, 4, Algorithm::TokenBucket);
        let state = WindowState::seed(&q, Instant::now());

        assert!(state.matches(&q));
        assert!(!state.matches(&quota(5, 4, Algorithm::TokenBucket)));
        assert!(!state.matches(&quota(4, 4, Algorithm::FixedWindow)));
    }

    #[tokio::test(start_paused = true)]
    async fn window_states_track_limit_and_period() {
        for algorithm in [Algorithm::FixedWindow, Algorithm::SlidingWindow] {
            let q = quota(10, 30, algorithm);
            let state = WindowState::seed(&q, Instant::now());

            assert!(state.matches(&q));
            assert!(!state.matches(&quota(1000, 30, algorithm)));
            assert!(!state.matches(&quota(10, 3600, algorithm)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn longest_window_does_not_overflow() {
        let q = Quota::new(1, crate::quota::MAX_WINDOW, Algorithm::SlidingWindow).unwrap();
        let start = Instant::now();
        let mut state = WindowState::seed(&q, start);

        assert!(state.admit(&q, start).is_allowed());
        assert!(!state.admit(&q, start + Duration::from_secs(1)).is_allowed());
    }
}
