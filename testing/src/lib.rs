//! # Desk Booking Testing
//!
//! Testing utilities for the desk booking client.
//!
//! This crate provides:
//! - [`ReducerTest`]: Given-When-Then harness for reducers
//! - [`ScriptedGateway`]: an in-memory booking service with fault injection
//!   and hold gates for reproducing races
//! - [`FixedClock`]: deterministic time
//! - [`fixtures`]: desks, bookings and dates used across tests
//!
//! ## Example
//!
//! ```ignore
//! use deskbook_testing::{fixtures, ScriptedGateway};
//!
//! #[tokio::test]
//! async fn booking_shows_up_after_refresh() {
//!     let gateway = ScriptedGateway::with_desks(fixtures::floor(2));
//!     let engine = SyncEngine::new(gateway.shared(), EngineConfig::for_tests());
//!
//!     engine.select_date(fixtures::june_18()).await?;
//!     engine.book(DeskId::new(1), "alice").await?;
//!     engine.settle(Duration::from_secs(1)).await?;
//!
//!     assert!(engine.state().await.is_booked(DeskId::new(1)));
//! }
//! ```

use chrono::{DateTime, Utc};
use deskbook_core::environment::Clock;


/// In-memory booking service
pub mod gateway;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use deskbook_testing::mocks::FixedClock;
    /// use deskbook_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Fixed clock at 2024-06-18 09:00:00 UTC
    #[must_use]
    pub fn test_clock() -> FixedClock {
        let time = super::fixtures::june_18()
            .and_hms_opt(9, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or_default();
        FixedClock::new(time)
    }
}

/// Shared test data
pub mod fixtures {
    use chrono::NaiveDate;
    use deskbook_core::model::{Booking, BookingId, Desk, DeskId};

    /// 2024-06-18, the date the client opens on by default
    #[must_use]
    pub fn june_18() -> NaiveDate {
        date(2024, 6, 18)
    }

    /// 2024-06-19
    #[must_use]
    pub fn june_19() -> NaiveDate {
        date(2024, 6, 19)
    }

    /// Builds a date, falling back to the epoch for invalid input
    #[must_use]
    pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
    }

    /// A well-formed desk with the given id
    #[must_use]
    pub fn desk(id: i64) -> Desk {
        #[allow(clippy::cast_precision_loss)]
        let offset = (id % 10) as f64 / 10.0;
        Desk {
            id: DeskId::new(id),
            name: format!("Desk {id}"),
            physical_location: format!("R89 floor 2, bay {id}"),
            x: offset,
            y: 1.0 - offset,
            length: 60.0,
            width: 120.0,
        }
    }

    /// Desks `1..=count`
    #[must_use]
    pub fn floor(count: i64) -> Vec<Desk> {
        (1..=count).map(desk).collect()
    }

    /// A booking record
    #[must_use]
    pub fn booking(id: i64, desk_id: i64, booked_by: &str, booked_date: NaiveDate) -> Booking {
        Booking {
            id: BookingId::new(id),
            desk_id: DeskId::new(desk_id),
            booked_by: booked_by.to_string(),
            booked_date,
        }
    }
}

/// Install a test-friendly tracing subscriber
///
/// Safe to call from every test; only the first call installs it. Honours
/// `RUST_LOG`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use gateway::{Operation, ScriptedGateway};
pub use mocks::{FixedClock, test_clock};
pub use reducer_test::{ReducerTest, assertions};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_clock_is_fixed_on_default_date() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.today(), fixtures::june_18());
        assert_eq!(clock.now().hour(), 9);
    }

    #[test]
    fn fixture_desks_are_well_formed() {
        for desk in fixtures::floor(12) {
            assert!(desk.validate().is_ok(), "{desk:?}");
        }
    }
}
