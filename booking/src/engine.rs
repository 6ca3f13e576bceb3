//! The surface a view talks to.
//!
//! [`SyncEngine`] wraps the [`Store`] running the reservation reducer. Intents
//! go in through `select_date`, `refresh`, `book` and `cancel`; state comes
//! out as [`ReservationSnapshot`]s, either on demand or pushed through a
//! [`Subscription`].

use crate::config::EngineConfig;
use crate::reducer::{ReservationAction, ReservationEnvironment, ReservationReducer};
use crate::state::{ReservationSnapshot, ReservationState};
use chrono::NaiveDate;
use deskbook_core::environment::{Clock, SystemClock};
use deskbook_core::gateway::BookingGateway;
use deskbook_core::model::{Booking, CommandId, DeskId, ErrorKind};
use deskbook_runtime::{EffectHandle, Store, StoreError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Result actions buffered for callers waiting on their command
const ACTION_BUFFER: usize = 256;

type ReservationStore =
    Store<ReservationState, ReservationAction, ReservationEnvironment, ReservationReducer>;

/// Errors returned to the view
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The command was refused, locally or by the booking service
    #[error("request rejected: {0}")]
    Rejected(ErrorKind),

    /// The engine runtime failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// No result arrived in time
    #[error("no result for the request")]
    NoResult,
}

impl EngineError {
    /// Classification of a rejection
    #[must_use]
    pub const fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Rejected(kind) => Some(*kind),
            Self::Store(_) | Self::NoResult => None,
        }
    }
}

/// Reservation synchronization engine for one session
///
/// Cheap to clone; clones drive the same session.
#[derive(Clone)]
pub struct SyncEngine {
    store: ReservationStore,
    next_command: Arc<AtomicU64>,
    command_wait: Duration,
}

impl SyncEngine {
    /// Engine on the system clock
    #[must_use]
    pub fn new(gateway: Arc<dyn BookingGateway>, config: EngineConfig) -> Self {
        Self::with_clock(gateway, Arc::new(SystemClock), config)
    }

    /// Engine with an explicit clock
    #[must_use]
    pub fn with_clock(
        gateway: Arc<dyn BookingGateway>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let command_wait = config.command_wait();
        let environment = ReservationEnvironment::new(gateway, clock, config);
        let store = Store::with_broadcast_capacity(
            ReservationState::new(),
            ReservationReducer::new(),
            environment,
            ACTION_BUFFER,
        );

        Self {
            store,
            next_command: Arc::new(AtomicU64::new(1)),
            command_wait,
        }
    }

    /// Current state
    pub async fn state(&self) -> ReservationSnapshot {
        self.store.state(ReservationState::snapshot).await
    }

    /// Shows `date`; selecting the shown date again refreshes it
    ///
    /// Returns once the fetch is started. The handle completes when it
    /// finished.
    ///
    /// # Errors
    ///
    /// [`EngineError::Store`] if the engine is shutting down.
    #[tracing::instrument(skip(self))]
    pub async fn select_date(&self, date: NaiveDate) -> Result<EffectHandle, EngineError> {
        Ok(self.store.send(ReservationAction::SelectDate { date }).await?)
    }

    /// Fetches desks and bookings of the selected date again
    ///
    /// # Errors
    ///
    /// [`EngineError::Store`] if the engine is shutting down.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Result<EffectHandle, EngineError> {
        Ok(self.store.send(ReservationAction::Refresh).await?)
    }

    /// Books `desk_id` on the selected date for `requestor`
    ///
    /// Resolves with the booking the server created. The follow-up fetch
    /// runs in the background; [`settle`](Self::settle) waits for it.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Rejected`] with `AlreadyInProgress`, `InvalidRequest`,
    ///   `Conflict` or `Unavailable`
    /// - [`EngineError::NoResult`] if no result arrived in time
    /// - [`EngineError::Store`] if the engine is shutting down
    #[tracing::instrument(skip(self, requestor))]
    pub async fn book(
        &self,
        desk_id: DeskId,
        requestor: impl Into<String>,
    ) -> Result<Booking, EngineError> {
        let id = self.command_id();
        let action = ReservationAction::Book {
            id,
            desk_id,
            requestor: requestor.into(),
        };

        match self.run(id, action).await? {
            ReservationAction::CommandSucceeded {
                booking: Some(booking),
                ..
            } => Ok(booking),
            other => Err(Self::failure(&other)),
        }
    }

    /// Cancels the booking of `desk_id` on the selected date
    ///
    /// # Errors
    ///
    /// Same as [`book`](Self::book); `Conflict` when there was no booking
    /// to cancel.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, desk_id: DeskId) -> Result<(), EngineError> {
        let id = self.command_id();
        let action = ReservationAction::Cancel { id, desk_id };

        match self.run(id, action).await? {
            ReservationAction::CommandSucceeded { .. } => Ok(()),
            other => Err(Self::failure(&other)),
        }
    }

    /// Pushes a notification after every state change
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            revisions: self.store.subscribe_revisions(),
            store: self.store.clone(),
        }
    }

    /// Waits until no fetch or command is running
    ///
    /// # Errors
    ///
    /// [`EngineError::Store`] with [`StoreError::Timeout`] if work is still
    /// running after `timeout`.
    pub async fn settle(&self, timeout: Duration) -> Result<(), EngineError> {
        Ok(self.store.wait_until_idle(timeout).await?)
    }

    /// Stops accepting intents and waits for running work
    ///
    /// Commands already sent still finish: their results are recorded, the
    /// desk is released and the waiting caller gets the outcome.
    ///
    /// # Errors
    ///
    /// [`EngineError::Store`] if work is still running after `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), EngineError> {
        Ok(self.store.shutdown(timeout).await?)
    }

    fn command_id(&self) -> CommandId {
        CommandId::new(self.next_command.fetch_add(1, Ordering::Relaxed))
    }

    /// Sends a command and waits for its terminal result
    async fn run(
        &self,
        id: CommandId,
        action: ReservationAction,
    ) -> Result<ReservationAction, EngineError> {
        self.store
            .send_and_wait_for(
                action,
                move |result| result.terminal_command() == Some(id),
                self.command_wait,
            )
            .await
            .map_err(|error| match error {
                StoreError::Timeout => {
                    tracing::warn!(command_id = %id, "No result for command");
                    EngineError::NoResult
                },
                other => EngineError::Store(other),
            })
    }

    fn failure(result: &ReservationAction) -> EngineError {
        match result {
            ReservationAction::CommandRejected { error, .. } => EngineError::Rejected(*error),
            ReservationAction::CommandFailed { error, .. } => EngineError::Rejected(error.kind()),
            _ => EngineError::NoResult,
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("pending_effects", &self.store.pending_effects())
            .field("command_wait", &self.command_wait)
            .finish_non_exhaustive()
    }
}

/// Push notifications of state changes
///
/// Several changes that happen before the subscriber looks are folded into
/// one notification carrying the latest state.
pub struct Subscription {
    revisions: watch::Receiver<u64>,
    store: ReservationStore,
}

impl Subscription {
    /// Waits for the next change and returns the state after it
    ///
    /// Returns `None` if the notification channel closed.
    pub async fn changed(&mut self) -> Option<ReservationSnapshot> {
        self.revisions.changed().await.ok()?;
        Some(self.store.state(ReservationState::snapshot).await)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("revision", &*self.revisions.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use deskbook_testing::{ScriptedGateway, fixtures, test_clock};

    fn engine(gateway: &ScriptedGateway) -> SyncEngine {
        SyncEngine::with_clock(gateway.shared(), Arc::new(test_clock()), EngineConfig::for_tests())
    }

    #[tokio::test]
    async fn command_ids_are_unique_across_clones() {
        let engine = engine(&ScriptedGateway::new());
        let clone = engine.clone();

        let first = engine.command_id();
        let second = clone.command_id();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn book_before_date_is_invalid() {
        let engine = engine(&ScriptedGateway::with_desks(fixtures::floor(1)));

        let result = engine.book(DeskId::new(1), "alice").await;
        assert_eq!(result, Err(EngineError::Rejected(ErrorKind::InvalidRequest)));
        assert_eq!(result.unwrap_err().kind(), Some(ErrorKind::InvalidRequest));
    }

    #[tokio::test]
    async fn intents_after_shutdown_fail() {
        let engine = engine(&ScriptedGateway::new());
        engine.shutdown(Duration::from_secs(1)).await.unwrap();

        let result = engine.select_date(fixtures::june_18()).await;
        assert!(matches!(
            result,
            Err(EngineError::Store(StoreError::ShutdownInProgress))
        ));
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            EngineError::Rejected(ErrorKind::Conflict).to_string(),
            "request rejected: desk state changed on the server"
        );
        assert_eq!(EngineError::NoResult.kind(), None);
    }
}
