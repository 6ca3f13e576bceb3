//! Contract of the remote booking service.
//!
//! The client never assumes the service is reachable or that its own view
//! is current. Every operation can fail; failures are classified so the
//! engine can decide between surfacing, refreshing and giving up.

use crate::model::{Booking, Desk, DeskId, ErrorKind};
use chrono::NaiveDate;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Gateway result
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Boxed future returned by gateway operations
pub type GatewayFuture<T> = Pin<Box<dyn Future<Output = GatewayResult<T>> + Send>>;

/// Gateway error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Network, timeout or decode failure
    #[error("booking service unavailable: {reason}")]
    Unavailable {
        /// What went wrong
        reason: String,
    },
    /// Desk already booked, or no booking to cancel
    #[error("booking conflict: {reason}")]
    Conflict {
        /// Server explanation
        reason: String,
    },
    /// Request rejected as malformed
    #[error("invalid booking request: {reason}")]
    InvalidRequest {
        /// Server explanation
        reason: String,
    },
}

impl GatewayError {
    /// Builds an `Unavailable` error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Builds a `Conflict` error
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    /// Builds an `InvalidRequest` error
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Error classification
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
        }
    }
}

impl From<GatewayError> for ErrorKind {
    fn from(error: GatewayError) -> Self {
        error.kind()
    }
}

/// Remote booking service
///
/// Implementations must be cheap to share; the engine holds one behind an
/// `Arc` and calls it from spawned effect tasks.
pub trait BookingGateway: Send + Sync {
    /// Lists the full desk catalog
    ///
    /// # Errors
    ///
    /// `Unavailable` on network or parse failure.
    fn list_desks(&self) -> GatewayFuture<Vec<Desk>>;

    /// Lists bookings for one date
    ///
    /// # Errors
    ///
    /// `Unavailable` on network or parse failure.
    fn list_bookings(&self, date: NaiveDate) -> GatewayFuture<Vec<Booking>>;

    /// Books a desk
    ///
    /// # Errors
    ///
    /// `Conflict` if the desk is already booked for `date`, `InvalidRequest`
    /// if `requestor` is empty, `Unavailable` on transport failure.
    fn create_booking(
        &self,
        desk_id: DeskId,
        date: NaiveDate,
        requestor: &str,
    ) -> GatewayFuture<Booking>;

    /// Cancels the booking of a desk
    ///
    /// # Errors
    ///
    /// `Conflict` if no booking exists for the desk on `date`,
    /// `Unavailable` on transport failure.
    fn cancel_booking(&self, desk_id: DeskId, date: NaiveDate) -> GatewayFuture<()>;
}
