//! Resilience helpers for calls that leave the process
//!
//! Timeouts for Redis and the push endpoint, reconnect backoff for long-lived
//! subscriptions, and a `failsafe` circuit breaker for peer regions.

pub mod timeout {
    //! Timeout defaults for external calls

    use std::time::Duration;

    /// Default timeout for Redis operations
    pub const REDIS_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default timeout for one push to the gateway
    pub const PUSH_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
}

pub mod backoff {
    //! Capped exponential backoff for reconnect loops

    use std::time::Duration;

    /// Initial reconnect delay
    pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

    /// Maximum reconnect delay
    pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

    /// Doubling backoff between `initial` and `max`.
    #[derive(Debug, Clone)]
    pub struct ExponentialBackoff {
        initial: Duration,
        max: Duration,
        current: Duration,
    }

    impl ExponentialBackoff {
        #[must_use]
        pub const fn new(initial: Duration, max: Duration) -> Self {
            Self {
                initial,
                max,
                current: initial,
            }
        }

        /// Delay to wait now; the following call returns double (capped).
        pub fn next_delay(&mut self) -> Duration {
            let delay = self.current;
            self.current = (self.current * 2).min(self.max);
            delay
        }

        /// Back to the initial delay after a healthy connection.
        pub fn reset(&mut self) {
            self.current = self.initial;
        }
    }

    impl Default for ExponentialBackoff {
        fn default() -> Self {
            Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
        }
    }
}

pub mod circuit_breaker {
    //! Circuit breaker for peer regions
    //!
    //! Uses the `failsafe` crate. A peer that keeps failing is skipped until
    //! the backoff elapses, so an unreachable region costs one timeout per
    //! backoff window instead of one per message.

    use std::time::Duration;

    pub use failsafe::CircuitBreaker;

    /// Circuit breaker type used per peer region
    pub type PeerBreaker = failsafe::StateMachine<
        failsafe::failure_policy::ConsecutiveFailures<failsafe::backoff::Exponential>,
        (),
    >;

    /// Opens after `failure_threshold` consecutive failures and stays open
    /// for an exponential backoff between `min_backoff` and `max_backoff`.
    pub fn create(failure_threshold: u32, min_backoff: Duration, max_backoff: Duration) -> PeerBreaker {
        let backoff = failsafe::backoff::exponential(min_backoff, max_backoff);
        let policy = failsafe::failure_policy::consecutive_failures(failure_threshold, backoff);
        failsafe::Config::new().failure_policy(policy).build()
    }

    /// 5 consecutive failures, 5-60s open window
    pub fn create_default() -> PeerBreaker {
        create(5, Duration::from_secs(5), Duration::from_secs(60))
    }
}
