//! Ride REST client
//!
//! The synchronous surface the tracking core consumes: the fallback fetch and
//! the ride mutations. Every call returns a [`RideSnapshot`].
//!
//! ## Endpoints
//!
//! | Operation            | Request                          |
//! |----------------------|----------------------------------|
//! | `fetch_ride`         | `GET   {base}/rides/{id}`        |
//! | `create_ride`        | `POST  {base}/rides`             |
//! | `update_ride_status` | `PATCH {base}/rides/{id}/status` |
//! | `cancel_ride`        | `POST  {base}/rides/{id}/cancel` |
//!
//! Responses may be a bare ride, `{ "data": ride }`, `{ "ride": ride }` or
//! `{ "data": { "ride": ride } }`.

use std::sync::Arc;

use async_trait::async_trait;
use bridge_traits::{HttpClient, HttpRequest, HttpResponse, RetryPolicy};
use core_auth::CredentialProvider;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::error::{RideApiError, Result};
use crate::types::{CreateRideRequest, RideId, RideSnapshot, RideStatus};

#[async_trait]
pub trait RideApi: Send + Sync {
    async fn fetch_ride(&self, ride_id: &RideId) -> Result<RideSnapshot>;

    async fn create_ride(&self, request: &CreateRideRequest) -> Result<RideSnapshot>;

    async fn update_ride_status(&self, ride_id: &RideId, status: RideStatus) -> Result<RideSnapshot>;

    /// Cancel a ride.
    ///
    /// Fails with [`RideApiError::AlreadyTerminal`] when the ride already
    /// completed or was cancelled; callers treat that as success.
    async fn cancel_ride(&self, ride_id: &RideId, reason: Option<&str>) -> Result<RideSnapshot>;
}

/// [`RideApi`] over the host `HttpClient`.
pub struct HttpRideApi {
    http_client: Arc<dyn HttpClient>,
    credentials: Arc<dyn CredentialProvider>,
    base_url: String,
    read_policy: RetryPolicy,
}

impl HttpRideApi {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        credentials: Arc<dyn CredentialProvider>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            http_client,
            credentials,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            read_policy: RetryPolicy::default(),
        }
    }

    /// Retry policy for reads. Mutations are sent exactly once.
    pub fn with_read_policy(mut self, policy: RetryPolicy) -> Self {
        self.read_policy = policy;
        self
    }

    fn ride_url(&self, ride_id: &RideId, suffix: &str) -> String {
        format!("{}/rides/{}{}", self.base_url, ride_id, suffix)
    }

    async fn authorize(&self, request: HttpRequest) -> HttpRequest {
        let token = match self.credentials.bearer_token().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Credential lookup failed; sending request anonymously");
                None
            }
        };
        request
            .header("Accept", "application/json")
            .maybe_bearer_token(token.as_deref())
    }

    /// Mutations are not idempotent; a retried create could book twice.
    async fn send_once(&self, request: HttpRequest) -> Result<HttpResponse> {
        Ok(self
            .http_client
            .execute_with_retry(request, RetryPolicy::no_retry())
            .await?)
    }
}

impl std::fmt::Debug for HttpRideApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRideApi")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl RideApi for HttpRideApi {
    #[instrument(skip(self), fields(ride_id = %ride_id))]
    async fn fetch_ride(&self, ride_id: &RideId) -> Result<RideSnapshot> {
        let request = self.authorize(HttpRequest::get(self.ride_url(ride_id, ""))).await;
        let response = self
            .http_client
            .execute_with_retry(request, self.read_policy.clone())
            .await?;

        debug!(status = response.status, "Fetched ride");
        match response.status {
            404 => Err(RideApiError::not_found(ride_id)),
            _ => parse_ride(&response),
        }
    }

    #[instrument(skip(self, request))]
    async fn create_ride(&self, request: &CreateRideRequest) -> Result<RideSnapshot> {
        let http_request = self
            .authorize(HttpRequest::post(format!("{}/rides", self.base_url)))
            .await
            .json(request)?;
        let response = self.send_once(http_request).await?;
        let ride = parse_ride(&response)?;
        info!(ride_id = %ride.id, "Ride created");
        Ok(ride)
    }

    #[instrument(skip(self), fields(ride_id = %ride_id, status = %status))]
    async fn update_ride_status(&self, ride_id: &RideId, status: RideStatus) -> Result<RideSnapshot> {
        let request = self
            .authorize(HttpRequest::patch(self.ride_url(ride_id, "/status")))
            .await
            .json(&json!({ "status": status }))?;
        let response = self.send_once(request).await?;

        match response.status {
            404 => Err(RideApiError::not_found(ride_id)),
            409 => Err(already_terminal(ride_id, &response)),
            _ => parse_ride(&response),
        }
    }

    #[instrument(skip(self, reason), fields(ride_id = %ride_id))]
    async fn cancel_ride(&self, ride_id: &RideId, reason: Option<&str>) -> Result<RideSnapshot> {
        let body = match reason {
            Some(reason) => json!({ "reason": reason }),
            None => json!({}),
        };
        let request = self
            .authorize(HttpRequest::post(self.ride_url(ride_id, "/cancel")))
            .await
            .json(&body)?;
        let response = self.send_once(request).await?;

        match response.status {
            404 => Err(RideApiError::not_found(ride_id)),
            409 => Err(already_terminal(ride_id, &response)),
            status if (400..500).contains(&status)
                && body_status(&response).is_some_and(|s| s.is_terminal()) =>
            {
                Err(already_terminal(ride_id, &response))
            }
            _ => {
                let ride = parse_ride(&response)?;
                info!(status = %ride.status, "Ride cancelled");
                Ok(ride)
            }
        }
    }
}

/// Map a response to a ride, or to the error its status implies.
fn parse_ride(response: &HttpResponse) -> Result<RideSnapshot> {
    match response.status {
        401 | 403 => return Err(RideApiError::Unauthorized(error_message(response))),
        status if !response.is_success() => {
            return Err(RideApiError::Http {
                status,
                message: error_message(response),
            })
        }
        _ => {}
    }

    let body: Value = response
        .json()
        .map_err(|e| RideApiError::InvalidResponse(e.to_string()))?;
    serde_json::from_value(unwrap_envelope(body))
        .map_err(|e| RideApiError::InvalidResponse(format!("not a ride: {}", e)))
}

fn unwrap_envelope(body: Value) -> Value {
    let body = match body {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };
    match body {
        Value::Object(mut map) if map.get("ride").is_some_and(Value::is_object) => {
            map.remove("ride").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Status mentioned in an error or ride body.
fn body_status(response: &HttpResponse) -> Option<RideStatus> {
    let body: Value = response.json().ok()?;
    let ride = unwrap_envelope(body);
    ride.get("status")
        .or_else(|| ride.get("currentStatus"))
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse().ok())
}

fn already_terminal(ride_id: &RideId, response: &HttpResponse) -> RideApiError {
    RideApiError::AlreadyTerminal {
        ride_id: ride_id.to_string(),
        status: body_status(response),
    }
}

fn error_message(response: &HttpResponse) -> String {
    let fallback = || format!("HTTP {}", response.status);
    match response.json::<Value>() {
        Ok(body) => body
            .get("message")
            .or_else(|| body.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(fallback),
        Err(_) => response
            .text()
            .ok()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(fallback),
    }
}
