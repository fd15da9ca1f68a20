use std::fmt::Display;

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, CONTENT_TYPE},
    Method, StatusCode,
};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::{device::DeviceId, payload::UpdatePayload};

pub const CLIENT_ID_HEADER: &str = "X-Client-ID";
pub const AUTH_TOKEN_HEADER: &str = "X-Authentication-Token";

/// Where updates are sent, and who we say we are when sending them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Base URL of the fleet API, e.g. `http://fleet.example.com:6565`.
    pub api: String,
    /// Identifies the person or machine running the batch.
    pub hostname: String,
    pub token: String,
}

/// Error body returned by the fleet API alongside a JSON content type.
///
/// Missing fields and a `null` body decode to defaults. `status_code` echoes
/// whatever the API put there and is never checked against the HTTP status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiErrorBody {
    pub status_code: i64,
    pub error: String,
    pub message: String,
}

/// What happened when updating one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Success,
    /// The API rejected the update and said why. `code` is absent if the
    /// error body could not be read or decoded, in which case `message` holds
    /// that error instead.
    StructuredApiError {
        status: StatusCode,
        code: Option<String>,
        message: String,
    },
    /// Not a JSON response at all. Probably not talking to the right API.
    MalformedResponse { status: StatusCode },
    TransportError { cause: String },
}

impl UpdateOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl Display for UpdateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateOutcome::Success => write!(f, "updated"),
            UpdateOutcome::StructuredApiError {
                status,
                code: Some(code),
                message,
            } => write!(f, "{status} ({code}): {message}"),
            UpdateOutcome::StructuredApiError {
                status,
                code: None,
                message,
            } => write!(f, "{status}: undecodable error body: {message}"),
            UpdateOutcome::MalformedResponse { status } => {
                write!(f, "Unexpected API result: {status}")
            }
            UpdateOutcome::TransportError { cause } => write!(f, "{cause}"),
        }
    }
}

/// Something that can push the update payload to one device.
#[async_trait]
pub trait Updater: Send + Sync {
    async fn update(&self, device: &DeviceId, payload: &UpdatePayload) -> UpdateOutcome;
}

/// [Updater] that talks to the fleet profile API over HTTP.
#[derive(Debug, Clone)]
pub struct UpdateClient {
    http: reqwest::Client,
    endpoint: EndpointConfig,
}

impl UpdateClient {
    pub fn new(endpoint: EndpointConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self { http, endpoint })
    }

    pub fn profile_url(&self, device: &DeviceId) -> String {
        format!(
            "{}/profiles/clientId:{}",
            self.endpoint.api.trim_end_matches('/'),
            device
        )
    }
}

#[async_trait]
impl Updater for UpdateClient {
    #[tracing::instrument(skip_all, fields(device = %device))]
    async fn update(&self, device: &DeviceId, payload: &UpdatePayload) -> UpdateOutcome {
        let url = self.profile_url(device);
        let method = Method::PUT;
        debug!("{method} {url}");

        let sent = self
            .http
            .request(method.clone(), &url)
            .header(CONTENT_TYPE, "application/json")
            .header(CLIENT_ID_HEADER, &self.endpoint.hostname)
            .header(AUTH_TOKEN_HEADER, &self.endpoint.token)
            .body(payload.to_vec())
            .send()
            .await;

        let response = match sent {
            Ok(r) => r,
            Err(e) => {
                return UpdateOutcome::TransportError {
                    cause: format!("{method} {url}: {e}"),
                }
            }
        };

        let status = response.status();
        let json = is_json(response.headers());
        trace!(%status, json, "Got response");

        if !json {
            return UpdateOutcome::MalformedResponse { status };
        }
        if status == StatusCode::OK {
            return UpdateOutcome::Success;
        }

        let body = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                return UpdateOutcome::StructuredApiError {
                    status,
                    code: None,
                    message: e.to_string(),
                }
            }
        };

        match serde_json::from_slice::<Option<ApiErrorBody>>(&body) {
            Ok(details) => {
                let details = details.unwrap_or_default();
                UpdateOutcome::StructuredApiError {
                    status,
                    code: Some(details.error),
                    message: details.message,
                }
            }
            Err(e) => UpdateOutcome::StructuredApiError {
                status,
                code: None,
                message: e.to_string(),
            },
        }
    }
}

/// Whether the response declares a JSON body, ignoring parameters like charset.
fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}
