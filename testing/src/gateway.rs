//! In-memory booking service for tests.
//!
//! [`ScriptedGateway`] behaves like the real service: it keeps bookings for
//! every date, refuses a second booking of the same desk on the same date and
//! refuses to cancel a booking that does not exist. On top of that, tests can
//! script it:
//!
//! - count calls per [`Operation`] and wait until a call has arrived
//! - inject one-shot or persistent failures, or a panic
//! - add latency
//! - hold calls behind a gate and release them one by one, which makes
//!   races (two bookings, a late fetch) reproducible

use chrono::NaiveDate;
use deskbook_core::gateway::{BookingGateway, GatewayError, GatewayFuture, GatewayResult};
use deskbook_core::model::{Booking, BookingId, Desk, DeskId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};

/// Gateway operation, used to address counters, faults and gates
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `list_desks`
    ListDesks,
    /// `list_bookings`
    ListBookings,
    /// `create_booking`
    CreateBooking,
    /// `cancel_booking`
    CancelBooking,
}

#[derive(Clone, Debug)]
enum Fault {
    Error(GatewayError),
    Panic,
}

type GateKey = (Operation, Option<NaiveDate>);

#[derive(Default)]
struct Inner {
    desks: Vec<Desk>,
    bookings: Vec<Booking>,
    next_booking_id: i64,
    calls: HashMap<Operation, usize>,
    next_faults: HashMap<Operation, VecDeque<Fault>>,
    persistent_faults: HashMap<Operation, GatewayError>,
    latency: HashMap<Operation, Duration>,
    gates: HashMap<GateKey, Arc<Semaphore>>,
}

/// Scriptable in-memory [`BookingGateway`]
///
/// Cloning is cheap and clones share the same server state, so a test keeps
/// one clone for scripting and hands another to the engine.
#[derive(Clone)]
pub struct ScriptedGateway {
    inner: Arc<Mutex<Inner>>,
    call_events: Arc<watch::Sender<u64>>,
}

impl Default for ScriptedGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptedGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ScriptedGateway")
            .field("desks", &inner.desks.len())
            .field("bookings", &inner.bookings.len())
            .field("calls", &inner.calls)
            .finish_non_exhaustive()
    }
}

impl ScriptedGateway {
    /// Empty server: no desks, no bookings
    #[must_use]
    pub fn new() -> Self {
        let (call_events, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_booking_id: 10,
                ..Inner::default()
            })),
            call_events: Arc::new(call_events),
        }
    }

    /// Server with the given desk catalog
    #[must_use]
    pub fn with_desks(desks: Vec<Desk>) -> Self {
        let gateway = Self::new();
        gateway.set_desks(desks);
        gateway
    }

    /// This gateway as the trait object the engine expects
    #[must_use]
    pub fn shared(&self) -> Arc<dyn BookingGateway> {
        Arc::new(self.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the desk catalog
    pub fn set_desks(&self, desks: Vec<Desk>) {
        self.lock().desks = desks;
    }

    /// Creates a booking as another client would, bypassing scripting
    ///
    /// Returns `None` if the desk is already booked on `date`.
    pub fn book_directly(&self, desk_id: DeskId, date: NaiveDate, booked_by: &str) -> Option<Booking> {
        insert_booking(&mut self.lock(), desk_id, date, booked_by).ok()
    }

    /// Removes a booking as another client would; returns whether one existed
    pub fn cancel_directly(&self, desk_id: DeskId, date: NaiveDate) -> bool {
        remove_booking(&mut self.lock(), desk_id, date).is_ok()
    }

    /// Bookings the server holds for `date`
    #[must_use]
    pub fn bookings_on(&self, date: NaiveDate) -> Vec<Booking> {
        self.lock()
            .bookings
            .iter()
            .filter(|booking| booking.booked_date == date)
            .cloned()
            .collect()
    }

    /// Number of calls received for `operation`, held ones included
    #[must_use]
    pub fn calls(&self, operation: Operation) -> usize {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Waits until at least `count` calls for `operation` have arrived
    ///
    /// Returns `false` if `timeout` expires first.
    pub async fn wait_for_calls(&self, operation: Operation, count: usize, timeout: Duration) -> bool {
        let mut events = self.call_events.subscribe();
        tokio::time::timeout(timeout, async {
            while self.calls(operation) < count {
                if events.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .is_ok()
    }

    /// The next call for `operation` fails with `error`
    ///
    /// Several queued failures are consumed in order.
    pub fn fail_next(&self, operation: Operation, error: GatewayError) {
        self.lock()
            .next_faults
            .entry(operation)
            .or_default()
            .push_back(Fault::Error(error));
    }

    /// Every call for `operation` fails with `error` until [`recover`](Self::recover)
    pub fn fail_always(&self, operation: Operation, error: GatewayError) {
        self.lock().persistent_faults.insert(operation, error);
    }

    /// The next call for `operation` panics inside its future
    pub fn panic_next(&self, operation: Operation) {
        self.lock()
            .next_faults
            .entry(operation)
            .or_default()
            .push_back(Fault::Panic);
    }

    /// Clears every scripted failure for `operation`
    pub fn recover(&self, operation: Operation) {
        let mut inner = self.lock();
        inner.next_faults.remove(&operation);
        inner.persistent_faults.remove(&operation);
    }

    /// Adds `latency` before every answer for `operation`
    pub fn set_latency(&self, operation: Operation, latency: Duration) {
        self.lock().latency.insert(operation, latency);
    }

    /// Holds every new call for `operation` until released
    pub fn hold(&self, operation: Operation) {
        self.lock()
            .gates
            .insert((operation, None), Arc::new(Semaphore::new(0)));
    }

    /// Holds `list_bookings` calls for one date only
    pub fn hold_bookings_for(&self, date: NaiveDate) {
        self.lock()
            .gates
            .insert((Operation::ListBookings, Some(date)), Arc::new(Semaphore::new(0)));
    }

    /// Lets `count` held calls for `operation` proceed, oldest first
    pub fn release(&self, operation: Operation, count: usize) {
        if let Some(gate) = self.lock().gates.get(&(operation, None)) {
            gate.add_permits(count);
        }
    }

    /// Lets `count` held `list_bookings` calls for `date` proceed
    pub fn release_bookings_for(&self, date: NaiveDate, count: usize) {
        if let Some(gate) = self.lock().gates.get(&(Operation::ListBookings, Some(date))) {
            gate.add_permits(count);
        }
    }

    /// Counts the call and returns the gates it has to pass
    fn arrive(&self, operation: Operation, date: Option<NaiveDate>) -> Vec<Arc<Semaphore>> {
        let gates = {
            let mut inner = self.lock();
            *inner.calls.entry(operation).or_insert(0) += 1;

            let mut gates = Vec::new();
            if let Some(gate) = inner.gates.get(&(operation, None)) {
                gates.push(Arc::clone(gate));
            }
            if let Some(gate) = date.and_then(|date| inner.gates.get(&(operation, Some(date)))) {
                gates.push(Arc::clone(gate));
            }
            gates
        };
        self.call_events.send_modify(|events| *events += 1);
        gates
    }

    /// Passes the gates, waits out the latency and applies scripted faults
    async fn answer<T>(
        &self,
        operation: Operation,
        gates: Vec<Arc<Semaphore>>,
        respond: impl FnOnce(&mut Inner) -> GatewayResult<T>,
    ) -> GatewayResult<T> {
        for gate in gates {
            // A closed gate means it was opened for good.
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let latency = self.lock().latency.get(&operation).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.lock();
        let queued = inner
            .next_faults
            .get_mut(&operation)
            .and_then(VecDeque::pop_front);
        let fault = queued.or_else(|| inner.persistent_faults.get(&operation).cloned().map(Fault::Error));

        match fault {
            Some(Fault::Error(error)) => Err(error),
            #[allow(clippy::panic)] // scripted crash of the remote call
            Some(Fault::Panic) => {
                drop(inner);
                panic!("scripted gateway panic in {operation:?}")
            },
            None => respond(&mut *inner),
        }
    }
}

fn insert_booking(
    inner: &mut Inner,
    desk_id: DeskId,
    date: NaiveDate,
    booked_by: &str,
) -> GatewayResult<Booking> {
    if inner
        .bookings
        .iter()
        .any(|booking| booking.desk_id == desk_id && booking.booked_date == date)
    {
        return Err(GatewayError::conflict(format!(
            "desk {desk_id} is already booked on {date}"
        )));
    }

    let booking = Booking {
        id: BookingId::new(inner.next_booking_id),
        desk_id,
        booked_by: booked_by.to_string(),
        booked_date: date,
    };
    inner.next_booking_id += 1;
    inner.bookings.push(booking.clone());
    Ok(booking)
}

fn remove_booking(inner: &mut Inner, desk_id: DeskId, date: NaiveDate) -> GatewayResult<()> {
    let before = inner.bookings.len();
    inner
        .bookings
        .retain(|booking| !(booking.desk_id == desk_id && booking.booked_date == date));

    if inner.bookings.len() == before {
        Err(GatewayError::conflict(format!(
            "no booking for desk {desk_id} on {date}"
        )))
    } else {
        Ok(())
    }
}

impl BookingGateway for ScriptedGateway {
    fn list_desks(&self) -> GatewayFuture<Vec<Desk>> {
        let gateway = self.clone();
        let gates = self.arrive(Operation::ListDesks, None);
        Box::pin(async move {
            gateway
                .answer(Operation::ListDesks, gates, |inner| Ok(inner.desks.clone()))
                .await
        })
    }

    fn list_bookings(&self, date: NaiveDate) -> GatewayFuture<Vec<Booking>> {
        let gateway = self.clone();
        let gates = self.arrive(Operation::ListBookings, Some(date));
        Box::pin(async move {
            gateway
                .answer(Operation::ListBookings, gates, |inner| {
                    Ok(inner
                        .bookings
                        .iter()
                        .filter(|booking| booking.booked_date == date)
                        .cloned()
                        .collect())
                })
                .await
        })
    }

    fn create_booking(
        &self,
        desk_id: DeskId,
        date: NaiveDate,
        requestor: &str,
    ) -> GatewayFuture<Booking> {
        let gateway = self.clone();
        let requestor = requestor.to_string();
        let gates = self.arrive(Operation::CreateBooking, Some(date));
        Box::pin(async move {
            gateway
                .answer(Operation::CreateBooking, gates, move |inner| {
                    if requestor.trim().is_empty() {
                        return Err(GatewayError::invalid("user must not be empty"));
                    }
                    if !inner.desks.iter().any(|desk| desk.id == desk_id) {
                        return Err(GatewayError::invalid(format!("unknown desk {desk_id}")));
                    }
                    insert_booking(inner, desk_id, date, &requestor)
                })
                .await
        })
    }

    fn cancel_booking(&self, desk_id: DeskId, date: NaiveDate) -> GatewayFuture<()> {
        let gateway = self.clone();
        let gates = self.arrive(Operation::CancelBooking, Some(date));
        Box::pin(async move {
            gateway
                .answer(Operation::CancelBooking, gates, move |inner| {
                    remove_booking(inner, desk_id, date)
                })
                .await
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fixtures;
    use deskbook_core::model::ErrorKind;

    #[tokio::test]
    async fn second_booking_of_same_desk_conflicts() {
        let gateway = ScriptedGateway::with_desks(fixtures::floor(2));
        let date = fixtures::june_18();

        let first = gateway.create_booking(DeskId::new(1), date, "alice").await;
        let second = gateway.create_booking(DeskId::new(1), date, "bob").await;

        assert_eq!(first.unwrap().booked_by, "alice");
        assert_eq!(second.unwrap_err().kind(), ErrorKind::Conflict);
        assert_eq!(gateway.bookings_on(date).len(), 1);
    }

    #[tokio::test]
    async fn same_desk_on_another_date_is_free() {
        let gateway = ScriptedGateway::with_desks(fixtures::floor(1));

        gateway
            .create_booking(DeskId::new(1), fixtures::june_18(), "alice")
            .await
            .unwrap();
        gateway
            .create_booking(DeskId::new(1), fixtures::june_19(), "bob")
            .await
            .unwrap();

        let june_19 = gateway.list_bookings(fixtures::june_19()).await.unwrap();
        assert_eq!(june_19.len(), 1);
        assert_eq!(june_19[0].booked_by, "bob");
    }

    #[tokio::test]
    async fn empty_requestor_is_invalid() {
        let gateway = ScriptedGateway::with_desks(fixtures::floor(1));
        let result = gateway
            .create_booking(DeskId::new(1), fixtures::june_18(), "  ")
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn cancelling_missing_booking_conflicts() {
        let gateway = ScriptedGateway::with_desks(fixtures::floor(1));
        let result = gateway.cancel_booking(DeskId::new(1), fixtures::june_18()).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn one_shot_failure_is_consumed() {
        let gateway = ScriptedGateway::with_desks(fixtures::floor(3));
        gateway.fail_next(Operation::ListDesks, GatewayError::unavailable("reset"));

        assert!(gateway.list_desks().await.is_err());
        assert_eq!(gateway.list_desks().await.unwrap().len(), 3);
        assert_eq!(gateway.calls(Operation::ListDesks), 2);
    }

    #[tokio::test]
    async fn persistent_failure_until_recovered() {
        let gateway = ScriptedGateway::new();
        gateway.fail_always(Operation::ListBookings, GatewayError::unavailable("down"));

        assert!(gateway.list_bookings(fixtures::june_18()).await.is_err());
        assert!(gateway.list_bookings(fixtures::june_18()).await.is_err());

        gateway.recover(Operation::ListBookings);
        assert!(gateway.list_bookings(fixtures::june_18()).await.is_ok());
    }

    #[tokio::test]
    async fn held_call_waits_for_release() {
        let gateway = ScriptedGateway::with_desks(fixtures::floor(1));
        gateway.hold(Operation::CreateBooking);

        let pending = tokio::spawn(gateway.create_booking(DeskId::new(1), fixtures::june_18(), "alice"));
        assert!(
            gateway
                .wait_for_calls(Operation::CreateBooking, 1, Duration::from_secs(1))
                .await
        );
        assert!(gateway.bookings_on(fixtures::june_18()).is_empty());

        gateway.release(Operation::CreateBooking, 1);
        let booking = pending.await.unwrap().unwrap();
        assert_eq!(booking.desk_id, DeskId::new(1));
    }

    #[tokio::test]
    async fn date_gate_only_holds_that_date() {
        let gateway = ScriptedGateway::new();
        gateway.hold_bookings_for(fixtures::june_18());

        let held = tokio::spawn(gateway.list_bookings(fixtures::june_18()));
        let free = gateway.list_bookings(fixtures::june_19()).await;
        assert!(free.is_ok());
        assert!(!held.is_finished());

        gateway.release_bookings_for(fixtures::june_18(), 1);
        assert!(held.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn scripted_panic_unwinds_the_call() {
        let gateway = ScriptedGateway::with_desks(fixtures::floor(1));
        gateway.panic_next(Operation::CancelBooking);

        let joined = tokio::spawn(gateway.cancel_booking(DeskId::new(1), fixtures::june_18())).await;
        assert!(joined.unwrap_err().is_panic());
    }

    #[test]
    fn direct_bookings_respect_single_booking_per_desk() {
        let gateway = ScriptedGateway::with_desks(fixtures::floor(1));
        let date = fixtures::june_18();

        assert!(gateway.book_directly(DeskId::new(1), date, "carol").is_some());
        assert!(gateway.book_directly(DeskId::new(1), date, "dave").is_none());
        assert!(gateway.cancel_directly(DeskId::new(1), date));
        assert!(!gateway.cancel_directly(DeskId::new(1), date));
    }
}
