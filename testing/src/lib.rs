//! # Gatekeeper Testing
//!
//! Testing utilities for the Gatekeeper access-event pipeline.
//!
//! This crate provides:
//! - [`InMemoryEventStore`] and [`InMemoryEventBus`] with failure injection
//! - [`FixedClock`] for deterministic expiry checks
//! - Token helpers that mint signed QR tokens for a known secret
//!
//! ## Example
//!
//! ```
//! use gatekeeper_testing::{test_clock, tokens, InMemoryEventStore};
//! use gatekeeper_core::environment::Clock;
//! use gatekeeper_core::token::TokenVerifier;
//!
//! let token = tokens::valid_token("u1", test_clock().now());
//! let claims = TokenVerifier::new(tokens::test_secret())
//!     .verify(&token, test_clock().now())
//!     .unwrap();
//! assert_eq!(claims.user_id, "u1");
//! ```

use chrono::{DateTime, Utc};
use gatekeeper_core::environment::Clock;

pub mod event_bus;
pub mod event_store;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Returns the same time until moved with [`FixedClock::set`].
    ///
    /// # Example
    ///
    /// ```
    /// use gatekeeper_testing::mocks::FixedClock;
    /// use gatekeeper_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug)]
    pub struct FixedClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            if let Ok(mut guard) = self.time.lock() {
                *guard = time;
            }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
                .lock()
                .map_or_else(|poisoned| *poisoned.into_inner(), |guard| *guard)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Signed QR tokens for a fixed test secret.
pub mod tokens {
    use chrono::{DateTime, Duration, Utc};
    use gatekeeper_core::token::{AccessClaims, TokenSigner};
    use secrecy::SecretString;

    /// Secret every helper in this module signs with.
    pub const TEST_SECRET: &str = "test-secret";

    /// [`TEST_SECRET`] as a [`SecretString`].
    #[must_use]
    pub fn test_secret() -> SecretString {
        SecretString::from(TEST_SECRET)
    }

    /// Sign arbitrary claims with [`TEST_SECRET`].
    ///
    /// # Panics
    ///
    /// Panics if the claims cannot be encoded.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn sign(claims: &AccessClaims) -> String {
        TokenSigner::new(test_secret())
            .sign(claims)
            .expect("test claims should always encode")
    }

    /// Token for `user_id` valid for five minutes after `now`.
    #[must_use]
    pub fn valid_token(user_id: &str, now: DateTime<Utc>) -> String {
        sign(&AccessClaims::new(user_id, now + Duration::minutes(5)))
    }

    /// Token for `user_id` that expired an hour before `now`.
    #[must_use]
    pub fn expired_token(user_id: &str, now: DateTime<Utc>) -> String {
        sign(&AccessClaims::new(user_id, now - Duration::hours(1)))
    }

    /// Valid claims signed with a different secret.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn foreign_token(user_id: &str, now: DateTime<Utc>) -> String {
        TokenSigner::new(SecretString::from("someone-else"))
            .sign(&AccessClaims::new(user_id, now + Duration::minutes(5)))
            .expect("test claims should always encode")
    }
}

/// Install a test-friendly tracing subscriber.
///
/// Honours `RUST_LOG`; safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use event_bus::InMemoryEventBus;
pub use event_store::InMemoryEventStore;
pub use mocks::{FixedClock, test_clock};
