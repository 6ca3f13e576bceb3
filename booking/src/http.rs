//! REST client for the booking service.
//!
//! | Operation        | Request                                              |
//! |------------------|------------------------------------------------------|
//! | `list_desks`     | `GET {base}/desks/`                                  |
//! | `list_bookings`  | `GET {base}/bookings?booking_date=YYYY-MM-DD`        |
//! | `create_booking` | `POST {base}/desks/{id}/book` `{"user", "booking_date"}` |
//! | `cancel_booking` | `POST {base}/desks/{id}/cancel?booking_date=YYYY-MM-DD` |
//!
//! Status mapping: 2xx is success, 409 is `Conflict` (404 too when
//! cancelling), 400 and 422 are `InvalidRequest`. Everything else, transport
//! errors and undecodable bodies are `Unavailable`.

use crate::config::Config;
use chrono::NaiveDate;
use deskbook_core::gateway::{BookingGateway, GatewayError, GatewayFuture, GatewayResult};
use deskbook_core::model::{Booking, Desk, DeskId};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

#[derive(Serialize)]
struct BookingRequest<'a> {
    user: &'a str,
    booking_date: NaiveDate,
}

/// HTTP implementation of [`BookingGateway`]
#[derive(Clone, Debug)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
}

impl HttpGateway {
    /// Client for `base_url` with a per-request `timeout`
    ///
    /// # Errors
    ///
    /// `Unavailable` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::unavailable(format!("cannot build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Client built from the application configuration
    ///
    /// # Errors
    ///
    /// `Unavailable` if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> GatewayResult<Self> {
        Self::new(
            config.base_url.clone(),
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    /// Uses an existing `reqwest` client
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Base URL without trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn fetch_desks(&self) -> GatewayResult<Vec<Desk>> {
        let response = self
            .client
            .get(self.url("desks/"))
            .send()
            .await
            .map_err(|e| transport("list desks", &e))?;

        let desks: Vec<Desk> = decode(check(response, "list desks", false).await?).await?;
        for desk in &desks {
            desk.validate().map_err(GatewayError::unavailable)?;
        }
        Ok(desks)
    }

    async fn fetch_bookings(&self, date: NaiveDate) -> GatewayResult<Vec<Booking>> {
        let response = self
            .client
            .get(self.url(&format!("bookings?booking_date={date}")))
            .send()
            .await
            .map_err(|e| transport("list bookings", &e))?;

        decode(check(response, "list bookings", false).await?).await
    }

    async fn book(&self, desk_id: DeskId, date: NaiveDate, requestor: &str) -> GatewayResult<Booking> {
        if requestor.trim().is_empty() {
            return Err(GatewayError::invalid("booking needs a requestor name"));
        }

        let response = self
            .client
            .post(self.url(&format!("desks/{desk_id}/book")))
            .json(&BookingRequest {
                user: requestor,
                booking_date: date,
            })
            .send()
            .await
            .map_err(|e| transport("book desk", &e))?;

        let body = check(response, "book desk", false)
            .await?
            .text()
            .await
            .map_err(|e| transport("book desk", &e))?;

        match serde_json::from_str::<Booking>(&body) {
            Ok(booking) => Ok(booking),
            Err(_) => {
                // Some deployments answer with a message instead of the record.
                tracing::debug!(%desk_id, %date, "Booking response has no record, looking it up");
                self.fetch_bookings(date)
                    .await?
                    .into_iter()
                    .find(|booking| booking.desk_id == desk_id)
                    .ok_or_else(|| {
                        GatewayError::unavailable(format!(
                            "booking of desk {desk_id} on {date} was accepted but is not listed"
                        ))
                    })
            },
        }
    }

    async fn unbook(&self, desk_id: DeskId, date: NaiveDate) -> GatewayResult<()> {
        let response = self
            .client
            .post(self.url(&format!("desks/{desk_id}/cancel?booking_date={date}")))
            .send()
            .await
            .map_err(|e| transport("cancel booking", &e))?;

        check(response, "cancel booking", true).await?;
        Ok(())
    }
}

fn transport(operation: &str, error: &reqwest::Error) -> GatewayError {
    tracing::warn!(operation, %error, "Booking service unreachable");
    GatewayError::unavailable(format!("{operation}: {error}"))
}

/// Maps a non-success status onto the error taxonomy
async fn check(
    response: Response,
    operation: &str,
    missing_is_conflict: bool,
) -> GatewayResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let reason = if body.trim().is_empty() {
        format!("{operation}: HTTP {status}")
    } else {
        format!("{operation}: HTTP {status}: {}", body.trim())
    };

    Err(match status {
        StatusCode::CONFLICT => GatewayError::conflict(reason),
        StatusCode::NOT_FOUND if missing_is_conflict => GatewayError::conflict(reason),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => GatewayError::invalid(reason),
        _ => GatewayError::unavailable(reason),
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> GatewayResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| GatewayError::unavailable(format!("malformed response: {e}")))
}

impl BookingGateway for HttpGateway {
    fn list_desks(&self) -> GatewayFuture<Vec<Desk>> {
        let gateway = self.clone();
        Box::pin(async move { gateway.fetch_desks().await })
    }

    fn list_bookings(&self, date: NaiveDate) -> GatewayFuture<Vec<Booking>> {
        let gateway = self.clone();
        Box::pin(async move { gateway.fetch_bookings(date).await })
    }

    fn create_booking(
        &self,
        desk_id: DeskId,
        date: NaiveDate,
        requestor: &str,
    ) -> GatewayFuture<Booking> {
        let gateway = self.clone();
        let requestor = requestor.to_string();
        Box::pin(async move { gateway.book(desk_id, date, &requestor).await })
    }

    fn cancel_booking(&self, desk_id: DeskId, date: NaiveDate) -> GatewayFuture<()> {
        let gateway = self.clone();
        Box::pin(async move { gateway.unbook(desk_id, date).await })
    }
}
