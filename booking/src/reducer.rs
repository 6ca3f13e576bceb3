//! Synchronization engine.
//!
//! Sequences fetches and commands against the booking gateway and is the only
//! code that writes the reservation cache. Every gateway call leaves the
//! reducer as an [`Effect::Future`] and comes back as a result action, so all
//! writes happen one at a time inside [`Reducer::reduce`].
//!
//! Rules the reducer enforces:
//!
//! - A fetch result is applied only while its [`FetchTag`] still matches the
//!   selection; late results for an earlier date are dropped.
//! - A fetch is applied whole (desks and bookings together) or not at all; a
//!   failure keeps the last known-good collections.
//! - Commands take their `(desk, date)` key in the [`CommandQueue`] before the
//!   gateway is called and release it on the terminal result, which the
//!   command effect produces on success, error, timeout and panic alike.
//! - Bookings are never changed locally ahead of the server. Every command
//!   success and every conflict is followed by a fetch.
//!
//! [`CommandQueue`]: crate::queue::CommandQueue

use crate::config::EngineConfig;
use crate::state::{FetchTag, ReservationState};
use chrono::NaiveDate;
use deskbook_core::gateway::{BookingGateway, GatewayError, GatewayFuture, GatewayResult};
use deskbook_core::model::{Booking, Command, CommandId, CommandKey, Desk, DeskId, ErrorKind};
use deskbook_core::{SmallVec, effect::Effect, environment::Clock, reducer::Reducer, smallvec};
use deskbook_runtime::retry::{RetryPolicy, retry_with_predicate};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Actions
// ============================================================================

/// Intents from the view and results from the gateway
#[derive(Clone, Debug)]
pub enum ReservationAction {
    // Intents
    /// Show another date
    SelectDate {
        /// Date to show
        date: NaiveDate,
    },

    /// Fetch desks and bookings for the selected date
    Refresh,

    /// Book a desk on the selected date
    Book {
        /// Correlation id
        id: CommandId,
        /// Desk to book
        desk_id: DeskId,
        /// Name recorded on the booking
        requestor: String,
    },

    /// Cancel the booking of a desk on the selected date
    Cancel {
        /// Correlation id
        id: CommandId,
        /// Desk whose booking is cancelled
        desk_id: DeskId,
    },

    // Results
    /// A fetch returned
    RefreshSucceeded {
        /// Identity of the fetch
        tag: FetchTag,
        /// Desk catalog, if it was part of the fetch
        desks: Option<Vec<Desk>>,
        /// Bookings of `tag.date`
        bookings: Vec<Booking>,
    },

    /// A fetch failed after retries
    RefreshFailed {
        /// Identity of the fetch
        tag: FetchTag,
        /// Last error
        error: GatewayError,
    },

    /// A command was refused before reaching the gateway
    CommandRejected {
        /// Correlation id
        id: CommandId,
        /// Why
        error: ErrorKind,
    },

    /// The gateway accepted a command
    CommandSucceeded {
        /// Correlation id
        id: CommandId,
        /// Key held by the command
        key: CommandKey,
        /// Created booking; `None` for a cancellation
        booking: Option<Booking>,
    },

    /// The gateway refused a command, or the call timed out or crashed
    CommandFailed {
        /// Correlation id
        id: CommandId,
        /// Key held by the command
        key: CommandKey,
        /// Classified failure
        error: GatewayError,
    },
}

impl ReservationAction {
    /// Id of the command this action ends, if it is a terminal result
    #[must_use]
    pub const fn terminal_command(&self) -> Option<CommandId> {
        match self {
            Self::CommandRejected { id, .. }
            | Self::CommandSucceeded { id, .. }
            | Self::CommandFailed { id, .. } => Some(*id),
            _ => None,
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Dependencies of the synchronization engine
#[derive(Clone)]
pub struct ReservationEnvironment {
    /// Remote booking service
    pub gateway: Arc<dyn BookingGateway>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Timeouts and retries
    pub config: EngineConfig,
}

impl ReservationEnvironment {
    /// Creates a new `ReservationEnvironment`
    #[must_use]
    pub fn new(
        gateway: Arc<dyn BookingGateway>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            gateway,
            clock,
            config,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer of the synchronization engine
#[derive(Clone, Copy, Debug, Default)]
pub struct ReservationReducer;

impl ReservationReducer {
    /// Creates a new `ReservationReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Starts a fetch of the selected date
    fn refresh(
        state: &mut ReservationState,
        env: &ReservationEnvironment,
        include_desks: bool,
    ) -> SmallVec<[Effect<ReservationAction>; 4]> {
        let Some(tag) = state.next_fetch() else {
            tracing::debug!("No date selected, nothing to fetch");
            return SmallVec::new();
        };

        tracing::debug!(date = %tag.date, epoch = tag.epoch, seq = tag.seq, include_desks, "Fetch started");
        smallvec![fetch_effect(env, tag, include_desks)]
    }

    /// Takes the command key and hands the command to the gateway
    fn submit(
        state: &mut ReservationState,
        env: &ReservationEnvironment,
        id: CommandId,
        command: Command,
    ) -> SmallVec<[Effect<ReservationAction>; 4]> {
        let kind = command.kind();
        let desk_id = command.desk_id();
        let date = command.date();

        if let Err(error) = state.queue.try_acquire(id, command.clone(), env.clock.now()) {
            tracing::info!(command_id = %id, kind, %desk_id, %date, "Command already in progress");
            return smallvec![rejection(id, error)];
        }

        metrics::counter!("booking.commands.submitted", "kind" => kind).increment(1);
        tracing::info!(command_id = %id, kind, %desk_id, %date, "Command submitted");

        smallvec![command_effect(env, id, command)]
    }

    /// Frees the key of a finished command
    fn release(
        state: &mut ReservationState,
        env: &ReservationEnvironment,
        key: CommandKey,
        id: CommandId,
    ) {
        match state.queue.release(key, id) {
            Some(entry) => {
                let held_ms = (env.clock.now() - entry.started_at).num_milliseconds();
                tracing::debug!(command_id = %id, desk_id = %key.0, date = %key.1, held_ms, "Command key released");
            },
            None => {
                tracing::warn!(command_id = %id, desk_id = %key.0, date = %key.1, "Finished command did not hold its key");
            },
        }
    }

    fn discard(tag: &FetchTag, state: &ReservationState) {
        tracing::debug!(
            fetched_for = %tag.date,
            selected = ?state.selected_date(),
            epoch = tag.epoch,
            seq = tag.seq,
            "Discarding stale fetch result"
        );
        metrics::counter!("booking.fetch.discarded").increment(1);
    }
}

impl Reducer for ReservationReducer {
    type State = ReservationState;
    type Action = ReservationAction;
    type Environment = ReservationEnvironment;

    #[allow(clippy::too_many_lines)] // one arm per action
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Intents ==========
            ReservationAction::SelectDate { date } => {
                if state.selected_date() == Some(date) {
                    return Self::refresh(state, env, true);
                }

                state.select(date);
                tracing::info!(%date, epoch = state.epoch(), "Date selected");

                let include_desks = !state.cache.desks_loaded();
                Self::refresh(state, env, include_desks)
            },

            ReservationAction::Refresh => Self::refresh(state, env, true),

            ReservationAction::Book {
                id,
                desk_id,
                requestor,
            } => {
                let Some(date) = state.selected_date() else {
                    tracing::info!(command_id = %id, "Book without a selected date");
                    return smallvec![rejection(id, ErrorKind::InvalidRequest)];
                };

                let requestor = requestor.trim();
                if requestor.is_empty() {
                    tracing::info!(command_id = %id, %desk_id, "Book without a requestor");
                    return smallvec![rejection(id, ErrorKind::InvalidRequest)];
                }

                let command = Command::Book {
                    desk_id,
                    date,
                    requestor: requestor.to_string(),
                };
                Self::submit(state, env, id, command)
            },

            ReservationAction::Cancel { id, desk_id } => {
                let Some(date) = state.selected_date() else {
                    tracing::info!(command_id = %id, "Cancel without a selected date");
                    return smallvec![rejection(id, ErrorKind::InvalidRequest)];
                };

                Self::submit(state, env, id, Command::Cancel { desk_id, date })
            },

            // ========== Fetch results ==========
            ReservationAction::RefreshSucceeded {
                tag,
                desks,
                bookings,
            } => {
                if !state.accepts(&tag) {
                    Self::discard(&tag, state);
                    return SmallVec::new();
                }

                state.mark_applied(&tag);
                if let Some(desks) = desks {
                    state.cache.replace_desks(desks);
                }
                state.cache.replace_bookings(bookings, env.clock.now());

                if state.last_error == Some(ErrorKind::Unavailable) {
                    state.last_error = None;
                }

                tracing::debug!(
                    date = %tag.date,
                    seq = tag.seq,
                    desks = state.cache.desks().len(),
                    bookings = state.cache.bookings().len(),
                    "Fetch applied"
                );
                SmallVec::new()
            },

            ReservationAction::RefreshFailed { tag, error } => {
                if !state.accepts(&tag) {
                    Self::discard(&tag, state);
                    return SmallVec::new();
                }

                state.mark_applied(&tag);
                state.cache.mark_failed();
                state.last_error = Some(error.kind());

                metrics::counter!("booking.fetch.failed").increment(1);
                tracing::warn!(date = %tag.date, %error, "Fetch failed, keeping last known data");
                SmallVec::new()
            },

            // ========== Command results ==========
            ReservationAction::CommandRejected { id, error } => {
                metrics::counter!("booking.commands.rejected", "reason" => error_label(error))
                    .increment(1);
                tracing::debug!(command_id = %id, %error, "Command rejected");
                state.last_error = Some(error);
                SmallVec::new()
            },

            ReservationAction::CommandSucceeded { id, key, booking } => {
                Self::release(state, env, key, id);
                state.last_error = None;

                metrics::counter!("booking.commands.completed", "outcome" => "success")
                    .increment(1);
                tracing::info!(
                    command_id = %id,
                    desk_id = %key.0,
                    date = %key.1,
                    booking_id = booking.as_ref().map(|b| b.id.get()),
                    "Command accepted by the booking service"
                );

                let include_desks = !state.cache.desks_loaded();
                Self::refresh(state, env, include_desks)
            },

            ReservationAction::CommandFailed { id, key, error } => {
                Self::release(state, env, key, id);

                let kind = error.kind();
                state.last_error = Some(kind);

                metrics::counter!("booking.commands.completed", "outcome" => error_label(kind))
                    .increment(1);
                tracing::warn!(command_id = %id, desk_id = %key.0, date = %key.1, %error, "Command failed");

                if kind.forces_refresh() {
                    let include_desks = !state.cache.desks_loaded();
                    Self::refresh(state, env, include_desks)
                } else {
                    SmallVec::new()
                }
            },
        }
    }
}

// ============================================================================
// Effects
// ============================================================================

const fn error_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Unavailable => "unavailable",
        ErrorKind::Conflict => "conflict",
        ErrorKind::AlreadyInProgress => "already_in_progress",
        ErrorKind::InvalidRequest => "invalid_request",
    }
}

fn timed_out(timeout: Duration) -> GatewayError {
    GatewayError::unavailable(format!("no answer within {} ms", timeout.as_millis()))
}

/// Feeds a rejection back so that waiters on the command see it
fn rejection(id: CommandId, error: ErrorKind) -> Effect<ReservationAction> {
    Effect::future(async move { Some(ReservationAction::CommandRejected { id, error }) })
}

fn fetch_effect(
    env: &ReservationEnvironment,
    tag: FetchTag,
    include_desks: bool,
) -> Effect<ReservationAction> {
    let gateway = Arc::clone(&env.gateway);
    let policy = env.config.fetch_retry.clone();
    let timeout = env.config.request_timeout;

    Effect::future(async move {
        let fetch = fetch_all(&*gateway, &policy, timeout, tag.date, include_desks);
        let result = AssertUnwindSafe(fetch).catch_unwind().await.unwrap_or_else(|_| {
            tracing::error!(date = %tag.date, "Fetch panicked");
            Err(GatewayError::unavailable("fetch aborted"))
        });

        Some(match result {
            Ok((desks, bookings)) => ReservationAction::RefreshSucceeded {
                tag,
                desks,
                bookings,
            },
            Err(error) => ReservationAction::RefreshFailed { tag, error },
        })
    })
}

fn command_effect(
    env: &ReservationEnvironment,
    id: CommandId,
    command: Command,
) -> Effect<ReservationAction> {
    let gateway = Arc::clone(&env.gateway);
    let timeout = env.config.request_timeout;

    Effect::future(async move {
        let key = command.key();
        let call = execute(&*gateway, &command, timeout);
        let result = AssertUnwindSafe(call).catch_unwind().await.unwrap_or_else(|_| {
            tracing::error!(command_id = %id, "Gateway call panicked");
            Err(GatewayError::unavailable("booking call aborted"))
        });

        Some(match result {
            Ok(booking) => ReservationAction::CommandSucceeded { id, key, booking },
            Err(error) => ReservationAction::CommandFailed { id, key, error },
        })
    })
}

/// Runs one command; never retried
async fn execute(
    gateway: &dyn BookingGateway,
    command: &Command,
    timeout: Duration,
) -> GatewayResult<Option<Booking>> {
    let call = async {
        match command {
            Command::Book {
                desk_id,
                date,
                requestor,
            } => gateway
                .create_booking(*desk_id, *date, requestor)
                .await
                .map(Some),
            Command::Cancel { desk_id, date } => gateway
                .cancel_booking(*desk_id, *date)
                .await
                .map(|()| None),
        }
    };

    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or_else(|_| Err(timed_out(timeout)))
}

/// Fetches bookings, and desks when asked, as one unit
async fn fetch_all(
    gateway: &dyn BookingGateway,
    policy: &RetryPolicy,
    timeout: Duration,
    date: NaiveDate,
    include_desks: bool,
) -> GatewayResult<(Option<Vec<Desk>>, Vec<Booking>)> {
    let bookings = read(policy, timeout, || gateway.list_bookings(date));

    if include_desks {
        let desks = read(policy, timeout, || gateway.list_desks());
        let (desks, bookings) = futures::future::try_join(desks, bookings).await?;
        Ok((Some(desks), bookings))
    } else {
        Ok((None, bookings.await?))
    }
}

/// Idempotent read with timeout per attempt and retry on `Unavailable`
async fn read<T, F>(policy: &RetryPolicy, timeout: Duration, call: F) -> GatewayResult<T>
where
    F: Fn() -> GatewayFuture<T>,
{
    retry_with_predicate(
        policy,
        || {
            let attempt = call();
            async move {
                tokio::time::timeout(timeout, attempt)
                    .await
                    .unwrap_or_else(|_| Err(timed_out(timeout)))
            }
        },
        |error: &GatewayError| error.kind().is_retryable(),
    )
    .await
}
