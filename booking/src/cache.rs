//! Reservation cache: the last known desk catalog and the bookings of the
//! selected date.
//!
//! Both collections sit behind an `Arc` and are only ever replaced whole, so
//! a snapshot taken by a reader keeps pointing at one consistent fetch while
//! the engine swaps in the next one.

use chrono::{DateTime, NaiveDate, Utc};
use deskbook_core::model::{Booking, Desk, DeskId, DeskStatus};
use std::sync::Arc;

/// How far the cached bookings can be trusted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Freshness {
    /// No date selected yet
    #[default]
    Empty,
    /// Date selected, bookings not fetched yet
    Stale,
    /// Bookings match the last successful fetch for the selected date
    Fresh,
    /// The last fetch failed; collections are the last known-good ones
    Failed,
}

/// Desks and the bookings of one date
#[derive(Clone, Debug, Default)]
pub struct ReservationCache {
    selected_date: Option<NaiveDate>,
    desks: Arc<Vec<Desk>>,
    bookings: Arc<Vec<Booking>>,
    freshness: Freshness,
    desks_loaded: bool,
    fetched_at: Option<DateTime<Utc>>,
}

impl ReservationCache {
    /// Empty cache without a selected date
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches to `date`
    ///
    /// Bookings of the previous date are dropped and the view is marked
    /// stale until the next fetch lands. Desks are kept.
    pub fn set_date(&mut self, date: NaiveDate) {
        self.selected_date = Some(date);
        self.bookings = Arc::new(Vec::new());
        self.freshness = Freshness::Stale;
    }

    /// Swaps in a freshly fetched desk catalog
    pub fn replace_desks(&mut self, desks: Vec<Desk>) {
        self.desks = Arc::new(desks);
        self.desks_loaded = true;
    }

    /// Swaps in the bookings fetched for the selected date
    ///
    /// Records that do not belong to the selected date are dropped. Without a
    /// selected date nothing is stored.
    pub fn replace_bookings(&mut self, bookings: Vec<Booking>, fetched_at: DateTime<Utc>) {
        let Some(date) = self.selected_date else {
            tracing::debug!("Ignoring bookings, no date selected");
            return;
        };

        let total = bookings.len();
        let bookings: Vec<Booking> = bookings
            .into_iter()
            .filter(|booking| booking.booked_date == date)
            .collect();
        if bookings.len() != total {
            tracing::warn!(
                %date,
                dropped = total - bookings.len(),
                "Fetched bookings contained other dates"
            );
        }

        self.bookings = Arc::new(bookings);
        self.freshness = Freshness::Fresh;
        self.fetched_at = Some(fetched_at);
    }

    /// Marks the bookings as untrusted, keeping the last known-good data
    pub fn mark_failed(&mut self) {
        if self.selected_date.is_some() {
            self.freshness = Freshness::Failed;
        }
    }

    /// Whether the desk has a booking on the selected date
    #[must_use]
    pub fn is_booked(&self, desk_id: DeskId) -> bool {
        self.booking_for(desk_id).is_some()
    }

    /// The booking of the desk on the selected date
    #[must_use]
    pub fn booking_for(&self, desk_id: DeskId) -> Option<&Booking> {
        self.bookings
            .iter()
            .find(|booking| booking.desk_id == desk_id)
    }

    /// Status derived from the bookings alone
    ///
    /// `Unknown` unless the bookings are fresh. `Pending` is decided by the
    /// command queue, not here.
    #[must_use]
    pub fn booking_status(&self, desk_id: DeskId) -> DeskStatus {
        match self.freshness {
            Freshness::Fresh if self.is_booked(desk_id) => DeskStatus::Booked,
            Freshness::Fresh => DeskStatus::Available,
            Freshness::Empty | Freshness::Stale | Freshness::Failed => DeskStatus::Unknown,
        }
    }

    /// Shared handle to the desk catalog
    #[must_use]
    pub fn desks(&self) -> Arc<Vec<Desk>> {
        Arc::clone(&self.desks)
    }

    /// Shared handle to the bookings of the selected date
    #[must_use]
    pub fn bookings(&self) -> Arc<Vec<Booking>> {
        Arc::clone(&self.bookings)
    }

    /// The selected date
    #[must_use]
    pub const fn selected_date(&self) -> Option<NaiveDate> {
        self.selected_date
    }

    /// Trust level of the bookings
    #[must_use]
    pub const fn freshness(&self) -> Freshness {
        self.freshness
    }

    /// Whether a desk catalog was ever fetched successfully
    #[must_use]
    pub const fn desks_loaded(&self) -> bool {
        self.desks_loaded
    }

    /// When the bookings were last replaced
    #[must_use]
    pub const fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskbook_testing::{fixtures, test_clock};
    use deskbook_core::environment::Clock;

    fn loaded_cache() -> ReservationCache {
        let mut cache = ReservationCache::new();
        cache.set_date(fixtures::june_18());
        cache.replace_desks(fixtures::floor(2));
        cache.replace_bookings(
            vec![fixtures::booking(10, 1, "alice", fixtures::june_18())],
            test_clock().now(),
        );
        cache
    }

    #[test]
    fn new_cache_knows_nothing() {
        let cache = ReservationCache::new();
        assert_eq!(cache.selected_date(), None);
        assert_eq!(cache.freshness(), Freshness::Empty);
        assert!(!cache.desks_loaded());
        assert_eq!(cache.booking_status(DeskId::new(1)), DeskStatus::Unknown);
    }

    #[test]
    fn lookups_after_fetch() {
        let cache = loaded_cache();

        assert!(cache.is_booked(DeskId::new(1)));
        assert!(!cache.is_booked(DeskId::new(2)));
        assert_eq!(
            cache.booking_for(DeskId::new(1)).map(|b| b.booked_by.as_str()),
            Some("alice")
        );
        assert_eq!(cache.booking_status(DeskId::new(1)), DeskStatus::Booked);
        assert_eq!(cache.booking_status(DeskId::new(2)), DeskStatus::Available);
        assert_eq!(cache.fetched_at(), Some(test_clock().now()));
    }

    #[test]
    fn changing_date_drops_bookings_and_keeps_desks() {
        let mut cache = loaded_cache();
        cache.set_date(fixtures::june_19());

        assert!(cache.bookings().is_empty());
        assert_eq!(cache.desks().len(), 2);
        assert_eq!(cache.freshness(), Freshness::Stale);
        assert_eq!(cache.booking_status(DeskId::new(2)), DeskStatus::Unknown);
    }

    #[test]
    fn failure_keeps_last_known_good_data() {
        let mut cache = loaded_cache();
        cache.mark_failed();

        assert_eq!(cache.freshness(), Freshness::Failed);
        assert_eq!(cache.desks().len(), 2);
        assert!(cache.is_booked(DeskId::new(1)));
        assert_eq!(cache.booking_status(DeskId::new(1)), DeskStatus::Unknown);
    }

    #[test]
    fn bookings_of_other_dates_are_not_stored() {
        let mut cache = ReservationCache::new();
        cache.set_date(fixtures::june_18());
        cache.replace_bookings(
            vec![
                fixtures::booking(10, 1, "alice", fixtures::june_18()),
                fixtures::booking(11, 2, "bob", fixtures::june_19()),
            ],
            test_clock().now(),
        );

        assert_eq!(cache.bookings().len(), 1);
        assert!(!cache.is_booked(DeskId::new(2)));
    }

    #[test]
    fn snapshots_are_not_affected_by_later_swaps() {
        let mut cache = loaded_cache();
        let before = cache.bookings();

        cache.replace_bookings(Vec::new(), test_clock().now());

        assert_eq!(before.len(), 1);
        assert!(cache.bookings().is_empty());
    }

    #[test]
    fn bookings_without_date_are_ignored() {
        let mut cache = ReservationCache::new();
        cache.replace_bookings(
            vec![fixtures::booking(10, 1, "alice", fixtures::june_18())],
            test_clock().now(),
        );
        assert!(cache.bookings().is_empty());
        assert_eq!(cache.freshness(), Freshness::Empty);
    }
}
