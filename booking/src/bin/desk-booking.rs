//! Terminal client for the desk booking service.
//!
//! Reads one intent per line from stdin and prints the floor whenever the
//! engine state changes.
//!
//! ```text
//! date 2024-06-19
//! book 4 alice
//! cancel 4
//! refresh
//! show
//! quit
//! ```

use anyhow::Context;
use chrono::NaiveDate;
use desk_booking::{Config, EngineError, HttpGateway, ReservationSnapshot, SyncEngine};
use deskbook_core::model::DeskId;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "\
commands:
  date YYYY-MM-DD      show another date
  book <desk> [name]   book a desk (name defaults to DESK_BOOKING_USER)
  cancel <desk>        cancel the booking of a desk
  refresh              fetch desks and bookings again
  show                 print the floor
  help                 this text
  quit                 exit";

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Date(NaiveDate),
    Book { desk_id: DeskId, name: Option<String> },
    Cancel(DeskId),
    Refresh,
    Show,
    Help,
    Quit,
}

fn parse(line: &str) -> Result<Option<Input>, String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };

    let desk = |word: Option<&str>| -> Result<DeskId, String> {
        word.ok_or_else(|| "missing desk id".to_string())?
            .parse::<i64>()
            .map(DeskId::new)
            .map_err(|e| format!("bad desk id: {e}"))
    };

    let input = match command {
        "date" => {
            let raw = words.next().ok_or("missing date")?;
            let date = raw
                .parse::<NaiveDate>()
                .map_err(|e| format!("bad date {raw:?}: {e}"))?;
            Input::Date(date)
        },
        "book" => {
            let desk_id = desk(words.next())?;
            let name = words.collect::<Vec<_>>().join(" ");
            Input::Book {
                desk_id,
                name: (!name.is_empty()).then_some(name),
            }
        },
        "cancel" => Input::Cancel(desk(words.next())?),
        "refresh" => Input::Refresh,
        "show" => Input::Show,
        "help" | "?" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => return Err(format!("unknown command {other:?}, try help")),
    };
    Ok(Some(input))
}

fn render(snapshot: &ReservationSnapshot) -> String {
    let mut out = String::new();
    let date = snapshot
        .selected_date
        .map_or_else(|| "-".to_string(), |date| date.to_string());
    out.push_str(&format!("\n== {date} ({:?}) ==\n", snapshot.freshness));
    out.push_str(&format!(
        "{:>5}  {:<16} {:<24} {:>5} {:>5}  {:<10} {}\n",
        "id", "name", "location", "x", "y", "status", "booked by"
    ));

    for (desk, status) in snapshot.floor() {
        let booked_by = snapshot
            .booking_for(desk.id)
            .map_or("", |booking| booking.booked_by.as_str());
        out.push_str(&format!(
            "{:>5}  {:<16} {:<24} {:>5.2} {:>5.2}  {:<10} {}\n",
            desk.id.get(),
            desk.name,
            desk.physical_location,
            desk.x,
            desk.y,
            status.to_string(),
            booked_by
        ));
    }
    if snapshot.desks.is_empty() {
        out.push_str("  (no desks)\n");
    }
    if let Some(error) = snapshot.last_error {
        out.push_str(&format!("! {error}\n"));
    }
    out
}

fn outcome(result: Result<String, EngineError>) -> String {
    match result {
        Ok(message) => message,
        Err(error) => format!("error: {error}"),
    }
}

/// Books in the background; the task prints and returns the outcome
fn spawn_book(commands: &mut JoinSet<String>, engine: &SyncEngine, desk_id: DeskId, name: String) {
    let engine = engine.clone();
    commands.spawn(async move {
        let message = outcome(
            engine
                .book(desk_id, name)
                .await
                .map(|booking| format!("booked desk {} for {}", booking.desk_id, booking.booked_by)),
        );
        println!("{message}");
        message
    });
}

/// Cancels in the background; the task prints and returns the outcome
fn spawn_cancel(commands: &mut JoinSet<String>, engine: &SyncEngine, desk_id: DeskId) {
    let engine = engine.clone();
    commands.spawn(async move {
        let message = outcome(
            engine
                .cancel(desk_id)
                .await
                .map(|()| format!("cancelled booking of desk {desk_id}")),
        );
        println!("{message}");
        message
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "desk_booking=info,deskbook_runtime=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env().context("loading configuration")?;
    info!(base_url = %config.base_url, date = %config.default_date, "Configuration loaded");

    let gateway = HttpGateway::from_config(&config).context("creating HTTP client")?;
    let engine = SyncEngine::new(Arc::new(gateway), config.engine());

    let mut subscription = engine.subscribe();
    let renderer = tokio::spawn(async move {
        while let Some(snapshot) = subscription.changed().await {
            print!("{}", render(&snapshot));
        }
    });

    engine
        .select_date(config.default_date)
        .await
        .context("selecting start date")?;
    println!("{HELP}");

    // Commands run in the background so the prompt stays responsive.
    let mut commands = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let input = match parse(&line) {
            Ok(Some(input)) => input,
            Ok(None) => continue,
            Err(message) => {
                println!("{message}");
                continue;
            },
        };

        match input {
            Input::Date(date) => {
                if let Err(error) = engine.select_date(date).await {
                    println!("error: {error}");
                }
            },
            Input::Book { desk_id, name } => {
                let Some(name) = name.or_else(|| config.user.clone()) else {
                    println!("who is booking? use: book {desk_id} <name>");
                    continue;
                };
                spawn_book(&mut commands, &engine, desk_id, name);
            },
            Input::Cancel(desk_id) => spawn_cancel(&mut commands, &engine, desk_id),
            Input::Refresh => {
                if let Err(error) = engine.refresh().await {
                    println!("error: {error}");
                }
            },
            Input::Show => print!("{}", render(&engine.state().await)),
            Input::Help => println!("{HELP}"),
            Input::Quit => break,
        }

        while commands.try_join_next().is_some() {}
    }

    if let Err(error) = engine.shutdown(Duration::from_secs(5)).await {
        warn!(%error, "Shutdown did not finish cleanly");
    }
    while commands.join_next().await.is_some() {}
    renderer.abort();
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use desk_booking::EngineConfig;
    use deskbook_core::model::DeskStatus;
    use deskbook_testing::{Operation, ScriptedGateway, fixtures, test_clock};
    use std::collections::HashMap;

    #[test]
    fn parses_intents() {
        assert_eq!(
            parse("date 2024-06-19").unwrap(),
            Some(Input::Date(fixtures::june_19()))
        );
        assert_eq!(
            parse("book 4 Ada Lovelace").unwrap(),
            Some(Input::Book {
                desk_id: DeskId::new(4),
                name: Some("Ada Lovelace".to_string()),
            })
        );
        assert_eq!(
            parse("book 4").unwrap(),
            Some(Input::Book {
                desk_id: DeskId::new(4),
                name: None,
            })
        );
        assert_eq!(parse("cancel 2").unwrap(), Some(Input::Cancel(DeskId::new(2))));
        assert_eq!(parse("   ").unwrap(), None);
        assert_eq!(parse("quit").unwrap(), Some(Input::Quit));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse("date tomorrow").is_err());
        assert!(parse("book").is_err());
        assert!(parse("cancel four").is_err());
        assert!(parse("dance").is_err());
    }

    #[test]
    fn renders_floor_with_status_and_owner() {
        let desks = fixtures::floor(2);
        let statuses = HashMap::from([
            (DeskId::new(1), DeskStatus::Booked),
            (DeskId::new(2), DeskStatus::Available),
        ]);
        let snapshot = ReservationSnapshot {
            selected_date: Some(fixtures::june_18()),
            desks: Arc::new(desks),
            bookings: Arc::new(vec![fixtures::booking(10, 1, "alice", fixtures::june_18())]),
            statuses,
            freshness: desk_booking::cache::Freshness::Fresh,
            fetched_at: None,
            last_error: Some(deskbook_core::model::ErrorKind::Conflict),
        };

        let text = render(&snapshot);
        assert!(text.contains("2024-06-18"));
        assert!(text.contains("booked"));
        assert!(text.contains("alice"));
        assert!(text.contains("available"));
        assert!(text.contains("desk state changed on the server"));
    }

    #[tokio::test]
    async fn commands_do_not_block_the_prompt() {
        let gateway = ScriptedGateway::with_desks(fixtures::floor(2));
        let engine = SyncEngine::with_clock(
            gateway.shared(),
            Arc::new(test_clock()),
            EngineConfig::for_tests(),
        );
        engine.select_date(fixtures::june_18()).await.unwrap();
        engine.settle(Duration::from_secs(3)).await.unwrap();

        gateway.hold(Operation::CreateBooking);
        let mut commands = JoinSet::new();
        spawn_book(&mut commands, &engine, DeskId::new(1), "alice".to_string());
        assert!(
            gateway
                .wait_for_calls(Operation::CreateBooking, 1, Duration::from_secs(2))
                .await
        );

        // Desk 2 has no booking, so this finishes first with a conflict.
        spawn_cancel(&mut commands, &engine, DeskId::new(2));
        let cancelled = commands.join_next().await.unwrap().unwrap();
        assert!(cancelled.starts_with("error:"), "{cancelled}");

        gateway.release(Operation::CreateBooking, 1);
        let booked = commands.join_next().await.unwrap().unwrap();
        assert_eq!(booked, "booked desk 1 for alice");
    }
}
