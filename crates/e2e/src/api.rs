//! HTTP client for the application API
//!
//! Used for out-of-band reads (the API flavour of the data layer), for the
//! readiness probe and to resolve seeded accounts to user ids through a
//! login. Every response except health is unwrapped from the
//! `{ success, data, error }` envelope.

use chrono::{DateTime, Utc};
use persistcheck_common::{ApiEnvelope, Credentials, EventKind, EventSummary, ParticipationRecord};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::join_url;

pub const HEALTH_PATH: &str = "/api/health";
use crate::error::{HarnessError, HarnessResult};

/// Event as the API serialises it
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEvent {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default = "default_published")]
    pub is_published: bool,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub capacity: i64,
}

fn default_published() -> bool {
    true
}

impl From<ApiEvent> for EventSummary {
    fn from(e: ApiEvent) -> Self {
        EventSummary {
            id: e.id,
            title: e.title,
            kind: EventKind::from_event_type(&e.event_type),
            is_published: e.is_published,
            start_date: e.start_date,
            capacity: e.capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub scene_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    user: ApiUser,
}

pub struct ApiClient {
    base_url: String,
    http: Client,
}

impl ApiClient {
    /// Client with its own cookie jar, so a login sticks to this instance
    pub fn new(base_url: &str, timeout: Duration) -> HarnessResult<Self> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> HarnessResult<Option<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = join_url(&self.base_url, path);
        let mut request = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!("{} {}", method, url);
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        decode_envelope(method.as_str(), &url, status, &text)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> HarnessResult<Option<T>> {
        self.call::<T, ()>(Method::GET, path, None).await
    }

    pub async fn login(&self, credentials: &Credentials) -> HarnessResult<ApiUser> {
        let data: Option<LoginData> = self
            .call(Method::POST, "/api/auth/login", Some(credentials))
            .await?;
        data.map(|d| d.user).ok_or_else(|| {
            HarnessError::AssertionFailed(format!("login for {} returned no user", credentials.email))
        })
    }

    pub async fn events(&self) -> HarnessResult<Vec<EventSummary>> {
        let events: Option<Vec<ApiEvent>> = self.get("/api/events").await?;
        Ok(events
            .unwrap_or_default()
            .into_iter()
            .map(EventSummary::from)
            .collect())
    }

    pub async fn event(&self, event_id: &str) -> HarnessResult<Option<EventSummary>> {
        match self.get::<ApiEvent>(&format!("/api/events/{event_id}")).await {
            Ok(event) => Ok(event.map(EventSummary::from)),
            Err(HarnessError::ActionFailed { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Every participation for an event; needs an admin session
    pub async fn event_participations(&self, event_id: &str) -> HarnessResult<Vec<ParticipationRecord>> {
        let rows: Option<Vec<ParticipationRecord>> = self
            .get(&format!("/api/admin/events/{event_id}/participations"))
            .await?;
        Ok(rows.unwrap_or_default())
    }

    /// Status of the health endpoint; not wrapped in an envelope
    pub async fn health(&self) -> HarnessResult<StatusCode> {
        let response = self
            .http
            .get(join_url(&self.base_url, HEALTH_PATH))
            .send()
            .await?;
        Ok(response.status())
    }
}

/// Unwrap an HTTP response carrying an [`ApiEnvelope`].
///
/// Non-2xx statuses and `success: false` envelopes both become
/// [`HarnessError::ActionFailed`] with the body attached. An empty 2xx body
/// (e.g. 204) yields `None`.
pub fn decode_envelope<T: DeserializeOwned>(
    method: &str,
    url: &str,
    status: StatusCode,
    body: &str,
) -> HarnessResult<Option<T>> {
    let failed = |body: String| HarnessError::ActionFailed {
        method: method.to_string(),
        url: url.to_string(),
        status: status.as_u16(),
        body,
    };

    if !status.is_success() {
        return Err(failed(body.to_string()));
    }
    if body.trim().is_empty() {
        return Ok(None);
    }

    let envelope: ApiEnvelope<T> = serde_json::from_str(body)?;
    envelope.into_result().map_err(|e| failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_event_maps_social_to_rsvp() {
        let event: ApiEvent = serde_json::from_str(
            r#"{"id":"e1","title":"Rope Social","eventType":"Social","startDate":"2030-01-01T19:00:00Z"}"#,
        )
        .unwrap();
        let summary = EventSummary::from(event);
        assert_eq!(summary.kind, EventKind::Rsvp);
        assert!(summary.is_published);
        assert_eq!(summary.capacity, 0);
    }

    #[test]
    fn test_decode_success_envelope() {
        let data: Option<Vec<String>> = decode_envelope(
            "GET",
            "http://api/x",
            StatusCode::OK,
            r#"{"success":true,"data":["a","b"],"error":null}"#,
        )
        .unwrap();
        assert_eq!(data.unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_decode_no_content() {
        let data: Option<serde_json::Value> =
            decode_envelope("DELETE", "http://api/x", StatusCode::NO_CONTENT, "").unwrap();
        assert!(data.is_none());
    }

    #[test]
    fn test_decode_failure_envelope_keeps_server_message() {
        let err = decode_envelope::<serde_json::Value>(
            "DELETE",
            "http://api/events/1/participation",
            StatusCode::OK,
            r#"{"success":false,"data":null,"error":"No active participation"}"#,
        )
        .unwrap_err();
        match err {
            HarnessError::ActionFailed { status, body, .. } => {
                assert_eq!(status, 200);
                assert!(body.contains("No active participation"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_decode_http_error_carries_status_and_body() {
        let err = decode_envelope::<serde_json::Value>(
            "DELETE",
            "http://api/events/1/ticket",
            StatusCode::NOT_FOUND,
            "Not Found",
        )
        .unwrap_err();
        assert!(matches!(err, HarnessError::ActionFailed { status: 404, .. }));
        assert!(err.to_string().contains("/ticket"));
    }
}
