//! Domain types shared by every layer of the client.
//!
//! Desks and bookings are owned by the remote service; the client only ever
//! holds copies of them. Identifiers are server-assigned integers wrapped in
//! newtypes so a desk id can never be passed where a booking id is expected.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Server-assigned desk identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeskId(i64);

impl DeskId {
    /// Wraps a raw desk id
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw id
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for DeskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned booking identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(i64);

impl BookingId {
    /// Wraps a raw booking id
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw id
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for BookingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A bookable desk and its normalized floor-plan placement
///
/// `x` and `y` are unitless positions in `[0, 1]`; mapping them to pixels is
/// the renderer's job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Desk {
    /// Desk identifier
    pub id: DeskId,
    /// Display name
    pub name: String,
    /// Building / room description
    pub physical_location: String,
    /// Normalized horizontal position
    #[serde(rename = "virtual_location_x")]
    pub x: f64,
    /// Normalized vertical position
    #[serde(rename = "virtual_location_y")]
    pub y: f64,
    /// Desk length
    pub length: f64,
    /// Desk width
    pub width: f64,
}

impl Desk {
    /// Checks the geometry constraints of a fetched desk
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.x) || !(0.0..=1.0).contains(&self.y) {
            return Err(format!(
                "desk {} position ({}, {}) outside the unit square",
                self.id, self.x, self.y
            ));
        }
        if self.length <= 0.0 || self.width <= 0.0 {
            return Err(format!(
                "desk {} has non-positive size {}x{}",
                self.id, self.length, self.width
            ));
        }
        Ok(())
    }
}

/// Assignment of a desk to a requestor for one date
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Booking {
    /// Booking identifier
    pub id: BookingId,
    /// Booked desk
    pub desk_id: DeskId,
    /// Who holds the desk
    pub booked_by: String,
    /// Date the booking applies to
    pub booked_date: NaiveDate,
}

/// Correlation id for a submitted command
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(u64);

impl CommandId {
    /// Wraps a raw command id
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cmd-{}", self.0)
    }
}

/// Key the command queue serializes on
pub type CommandKey = (DeskId, NaiveDate);

/// A mutating intent against the remote service
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Book a desk for a date
    Book {
        /// Desk to book
        desk_id: DeskId,
        /// Date to book it for
        date: NaiveDate,
        /// Name recorded on the booking
        requestor: String,
    },
    /// Cancel the booking of a desk on a date
    Cancel {
        /// Desk whose booking is cancelled
        desk_id: DeskId,
        /// Date of the booking
        date: NaiveDate,
    },
}

impl Command {
    /// Desk the command targets
    #[must_use]
    pub const fn desk_id(&self) -> DeskId {
        match self {
            Self::Book { desk_id, .. } | Self::Cancel { desk_id, .. } => *desk_id,
        }
    }

    /// Date the command targets
    #[must_use]
    pub const fn date(&self) -> NaiveDate {
        match self {
            Self::Book { date, .. } | Self::Cancel { date, .. } => *date,
        }
    }

    /// Queue key of the command
    #[must_use]
    pub const fn key(&self) -> CommandKey {
        (self.desk_id(), self.date())
    }

    /// Short label for logs and metrics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Book { .. } => "book",
            Self::Cancel { .. } => "cancel",
        }
    }
}

/// Classification of everything that can go wrong with a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Transport failure or timeout; the user may retry
    #[error("booking service unavailable")]
    Unavailable,
    /// Server state diverged from what the client assumed
    #[error("desk state changed on the server")]
    Conflict,
    /// A command for the same desk and date is still running
    #[error("a request for this desk is already in progress")]
    AlreadyInProgress,
    /// The request itself is malformed and must be corrected
    #[error("invalid request")]
    InvalidRequest,
}

impl ErrorKind {
    /// Whether the engine reconciles with a forced refresh after this error
    #[must_use]
    pub const fn forces_refresh(self) -> bool {
        matches!(self, Self::Conflict)
    }

    /// Whether retrying the same request may succeed
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

/// Per-desk state as seen by the client
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeskStatus {
    /// No booking for the selected date
    Available,
    /// Booked for the selected date
    Booked,
    /// A command for this desk is in flight
    Pending,
    /// Bookings for the selected date are not known
    Unknown,
}

impl std::fmt::Display for DeskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Available => "available",
            Self::Booked => "booked",
            Self::Pending => "pending",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 18).unwrap()
    }

    #[test]
    fn desk_decodes_wire_field_names() {
        let json = r#"{
            "id": 7,
            "name": "Desk 7",
            "physical_location": "R89 2.14",
            "virtual_location_x": 0.25,
            "virtual_location_y": 0.75,
            "length": 60.0,
            "width": 120.0
        }"#;

        let desk: Desk = serde_json::from_str(json).unwrap();
        assert_eq!(desk.id, DeskId::new(7));
        assert!((desk.x - 0.25).abs() < f64::EPSILON);
        assert!((desk.y - 0.75).abs() < f64::EPSILON);
        assert!(desk.validate().is_ok());
    }

    #[test]
    fn desk_outside_unit_square_is_rejected() {
        let desk = Desk {
            id: DeskId::new(1),
            name: "Far".to_string(),
            physical_location: String::new(),
            x: 1.5,
            y: 0.5,
            length: 1.0,
            width: 1.0,
        };
        assert!(desk.validate().is_err());
    }

    #[test]
    fn desk_with_zero_width_is_rejected() {
        let desk = Desk {
            id: DeskId::new(1),
            name: "Flat".to_string(),
            physical_location: String::new(),
            x: 0.5,
            y: 0.5,
            length: 1.0,
            width: 0.0,
        };
        assert!(desk.validate().is_err());
    }

    #[test]
    fn booking_date_is_iso_formatted() {
        let json = r#"{"id":10,"desk_id":1,"booked_by":"alice","booked_date":"2024-06-18"}"#;
        let booking: Booking = serde_json::from_str(json).unwrap();
        assert_eq!(booking.booked_date, date());
        assert_eq!(booking.desk_id, DeskId::new(1));
    }

    #[test]
    fn command_key_combines_desk_and_date() {
        let book = Command::Book {
            desk_id: DeskId::new(3),
            date: date(),
            requestor: "alice".to_string(),
        };
        let cancel = Command::Cancel {
            desk_id: DeskId::new(3),
            date: date(),
        };
        assert_eq!(book.key(), cancel.key());
        assert_eq!(book.kind(), "book");
        assert_eq!(cancel.kind(), "cancel");
    }

    #[test]
    fn only_conflict_forces_refresh() {
        assert!(ErrorKind::Conflict.forces_refresh());
        assert!(!ErrorKind::Unavailable.forces_refresh());
        assert!(!ErrorKind::AlreadyInProgress.forces_refresh());
        assert!(!ErrorKind::InvalidRequest.forces_refresh());
        assert!(ErrorKind::Unavailable.is_retryable());
    }
}
