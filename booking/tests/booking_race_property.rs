//! Property: however many sessions race for one desk, exactly one booking
//! survives and every session ends up showing it.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use desk_booking::{EngineConfig, EngineError, SyncEngine};
use deskbook_core::model::{DeskId, ErrorKind};
use deskbook_testing::{ScriptedGateway, fixtures, test_clock};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const SETTLE: Duration = Duration::from_secs(3);

async fn race(requestors: Vec<String>, sessions: usize) {
    let date = fixtures::june_18();
    let gateway = ScriptedGateway::with_desks(fixtures::floor(3));
    let sessions = sessions.min(requestors.len());

    let mut engines = Vec::with_capacity(sessions);
    for _ in 0..sessions {
        let engine = SyncEngine::with_clock(
            gateway.shared(),
            Arc::new(test_clock()),
            EngineConfig::for_tests(),
        );
        engine.select_date(date).await.unwrap();
        engine.settle(SETTLE).await.unwrap();
        engines.push(engine);
    }

    let attempts = requestors.iter().enumerate().map(|(i, name)| {
        let engine = engines[i % sessions].clone();
        let name = name.clone();
        async move { engine.book(DeskId::new(2), name).await }
    });
    let outcomes = futures::future::join_all(attempts).await;

    let winners: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1, "outcomes: {outcomes:?}");
    for outcome in &outcomes {
        if let Err(error) = outcome {
            assert!(
                matches!(
                    error,
                    EngineError::Rejected(ErrorKind::Conflict | ErrorKind::AlreadyInProgress)
                ),
                "unexpected failure: {error:?}"
            );
        }
    }

    let on_server = gateway.bookings_on(date);
    assert_eq!(on_server.len(), 1);
    assert_eq!(on_server[0], *winners[0]);

    for engine in &engines {
        engine.settle(SETTLE).await.unwrap();
        let state = engine.state().await;
        let on_desk: Vec<_> = state
            .bookings
            .iter()
            .filter(|b| b.desk_id == DeskId::new(2))
            .collect();
        assert_eq!(on_desk, vec![winners[0]]);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn one_booking_survives_a_race(
        requestors in prop::collection::vec("[a-z]{1,8}", 2..7),
        sessions in 1usize..4,
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(race(requestors, sessions));
    }
}
