//! Reservation state of one session and the read-only snapshot views get.

use crate::cache::{Freshness, ReservationCache};
use crate::queue::CommandQueue;
use chrono::{DateTime, NaiveDate, Utc};
use deskbook_core::model::{Booking, Desk, DeskId, DeskStatus, ErrorKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Identity of one fetch
///
/// `epoch` changes whenever the selected date changes; `seq` grows with
/// every fetch started. A result is only applied while both still describe
/// the current selection and no newer fetch has been applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchTag {
    /// Date the fetch was started for
    pub date: NaiveDate,
    /// Selection epoch at start
    pub epoch: u64,
    /// Sequence number of the fetch
    pub seq: u64,
}

/// State owned by the synchronization engine
#[derive(Clone, Debug, Default)]
pub struct ReservationState {
    /// Desks and bookings of the selected date
    pub cache: ReservationCache,
    /// Commands in flight
    pub queue: CommandQueue,
    /// Most recent failure, cleared by the next success
    pub last_error: Option<ErrorKind>,
    epoch: u64,
    fetch_seq: u64,
    applied_seq: u64,
}

impl ReservationState {
    /// State of a fresh session: no date, no data
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The selected date
    #[must_use]
    pub const fn selected_date(&self) -> Option<NaiveDate> {
        self.cache.selected_date()
    }

    /// Selects a new date and opens a new fetch epoch
    pub fn select(&mut self, date: NaiveDate) {
        self.epoch += 1;
        self.cache.set_date(date);
    }

    /// Tag for a fetch of the selected date, or `None` without a date
    pub fn next_fetch(&mut self) -> Option<FetchTag> {
        let date = self.selected_date()?;
        self.fetch_seq += 1;
        Some(FetchTag {
            date,
            epoch: self.epoch,
            seq: self.fetch_seq,
        })
    }

    /// Whether a result carrying `tag` may still be applied
    #[must_use]
    pub fn accepts(&self, tag: &FetchTag) -> bool {
        self.selected_date() == Some(tag.date)
            && tag.epoch == self.epoch
            && tag.seq > self.applied_seq
    }

    /// Records that the result of `tag` was applied
    pub fn mark_applied(&mut self, tag: &FetchTag) {
        self.applied_seq = tag.seq;
    }

    /// Current selection epoch
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Status of one desk on the selected date
    #[must_use]
    pub fn status(&self, desk_id: DeskId) -> DeskStatus {
        match self.selected_date() {
            Some(date) if self.queue.is_pending(desk_id, date) => DeskStatus::Pending,
            _ => self.cache.booking_status(desk_id),
        }
    }

    /// Read-only copy for views
    #[must_use]
    pub fn snapshot(&self) -> ReservationSnapshot {
        let desks = self.cache.desks();
        let statuses = desks
            .iter()
            .map(|desk| (desk.id, self.status(desk.id)))
            .collect();

        ReservationSnapshot {
            selected_date: self.selected_date(),
            desks,
            bookings: self.cache.bookings(),
            statuses,
            freshness: self.cache.freshness(),
            fetched_at: self.cache.fetched_at(),
            last_error: self.last_error,
        }
    }
}

/// What a view renders: one consistent picture of the engine state
///
/// Desks and bookings are shared with the engine and never change after the
/// snapshot was taken.
#[derive(Clone, Debug)]
pub struct ReservationSnapshot {
    /// The selected date
    pub selected_date: Option<NaiveDate>,
    /// Desk catalog
    pub desks: Arc<Vec<Desk>>,
    /// Bookings of the selected date
    pub bookings: Arc<Vec<Booking>>,
    /// Status per desk of the catalog
    pub statuses: HashMap<DeskId, DeskStatus>,
    /// Trust level of `bookings`
    pub freshness: Freshness,
    /// When `bookings` were fetched
    pub fetched_at: Option<DateTime<Utc>>,
    /// Most recent failure
    pub last_error: Option<ErrorKind>,
}

impl ReservationSnapshot {
    /// Whether the desk is booked on the selected date
    #[must_use]
    pub fn is_booked(&self, desk_id: DeskId) -> bool {
        self.booking_for(desk_id).is_some()
    }

    /// The booking of the desk on the selected date
    #[must_use]
    pub fn booking_for(&self, desk_id: DeskId) -> Option<&Booking> {
        self.bookings.iter().find(|booking| booking.desk_id == desk_id)
    }

    /// Status of a desk; `Unknown` for ids outside the catalog
    #[must_use]
    pub fn status(&self, desk_id: DeskId) -> DeskStatus {
        self.statuses
            .get(&desk_id)
            .copied()
            .unwrap_or(DeskStatus::Unknown)
    }

    /// Desks paired with their status, in catalog order
    pub fn floor(&self) -> impl Iterator<Item = (&Desk, DeskStatus)> + '_ {
        self.desks.iter().map(|desk| (desk, self.status(desk.id)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use deskbook_core::environment::Clock;
    use deskbook_core::model::{Command, CommandId};
    use deskbook_testing::{fixtures, test_clock};

    #[test]
    fn no_fetch_without_date() {
        let mut state = ReservationState::new();
        assert_eq!(state.next_fetch(), None);
    }

    #[test]
    fn tags_from_previous_epoch_are_rejected() {
        let mut state = ReservationState::new();
        state.select(fixtures::june_18());
        let old = state.next_fetch().unwrap();

        state.select(fixtures::june_19());
        assert!(!state.accepts(&old));

        // Same date again, but a new epoch.
        state.select(fixtures::june_18());
        assert!(!state.accepts(&old));
    }

    #[test]
    fn older_fetch_loses_to_applied_newer_one() {
        let mut state = ReservationState::new();
        state.select(fixtures::june_18());
        let first = state.next_fetch().unwrap();
        let second = state.next_fetch().unwrap();

        assert!(state.accepts(&first));
        assert!(state.accepts(&second));

        state.mark_applied(&second);
        assert!(!state.accepts(&first));
    }

    #[test]
    fn pending_command_overrides_cached_status() {
        let mut state = ReservationState::new();
        state.select(fixtures::june_18());
        state.cache.replace_desks(fixtures::floor(2));
        state.cache.replace_bookings(Vec::new(), test_clock().now());

        let command = Command::Cancel {
            desk_id: DeskId::new(2),
            date: fixtures::june_18(),
        };
        assert!(state
            .queue
            .try_acquire(CommandId::new(1), command, test_clock().now())
            .is_ok());

        let snapshot = state.snapshot();
        assert_eq!(snapshot.status(DeskId::new(1)), DeskStatus::Available);
        assert_eq!(snapshot.status(DeskId::new(2)), DeskStatus::Pending);
        assert_eq!(snapshot.status(DeskId::new(99)), DeskStatus::Unknown);
        assert_eq!(snapshot.floor().count(), 2);
    }
}
