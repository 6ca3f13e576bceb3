//! # Desk Booking
//!
//! Client-side synchronization engine for a remote desk booking service.
//!
//! The engine keeps a local view of the desk catalog and of the bookings for
//! one selected date, and lets a view book or cancel desks for that date
//! while other clients do the same. The server owns every booking decision;
//! the engine never applies a booking locally before the server confirmed
//! it, and reconciles with a fresh fetch after every mutation.
//!
//! ## Components
//!
//! - [`cache`]: last known desks and bookings, swapped as whole collections
//! - [`queue`]: at most one in-flight command per desk and date
//! - [`reducer`]: the synchronization engine as a pure reducer
//! - [`engine`]: [`SyncEngine`], the surface a view talks to
//! - [`http`]: [`HttpGateway`], the REST client for the booking service
//! - [`config`]: environment configuration
//!
//! ## Example
//!
//! ```ignore
//! use desk_booking::{EngineConfig, HttpGateway, SyncEngine};
//! use deskbook_core::model::DeskId;
//! use std::sync::Arc;
//!
//! let gateway = HttpGateway::new("http://localhost:8000", Duration::from_secs(5))?;
//! let engine = SyncEngine::new(Arc::new(gateway), EngineConfig::default());
//!
//! engine.select_date(date).await?;
//! let booking = engine.book(DeskId::new(4), "alice").await?;
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod http;
pub mod queue;
pub mod reducer;
pub mod state;

pub use config::{Config, ConfigError, EngineConfig};
pub use engine::{EngineError, Subscription, SyncEngine};
pub use http::HttpGateway;
pub use reducer::{ReservationAction, ReservationEnvironment, ReservationReducer};
pub use state::{ReservationSnapshot, ReservationState};
