//! HTTP client for the remote run service.
//!
//! Two calls are needed to hand a run over:
//! - `POST {base}/running/end` with the finished [`RunRecord`]
//! - `POST {base}/running/{record_id}/segments` with the segment items
//!
//! Retrying is not done here. A failed call surfaces as
//! [`TrackerError::Http`] and the sync coordinator decides when to try again.

use std::time::Duration;

use base64::Engine;
use log::{debug, warn};
use reqwest::{Client, RequestBuilder};

use crate::error::{Result, TrackerError};
use crate::session::RunRecord;
use crate::sync::RemoteService;
use crate::wire::WireSegment;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest slice of an error body kept in the error message
const MAX_ERROR_BODY: usize = 200;

/// How requests authenticate against the run service.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum Credentials {
    /// `Authorization: Bearer {token}`
    Bearer { token: String },
    /// Standard HTTP Basic auth
    Basic { username: String, password: String },
}

impl Credentials {
    /// Value of the `Authorization` header.
    pub fn header_value(&self) -> String {
        match self {
            Credentials::Bearer { token } => format!("Bearer {}", token),
            Credentials::Basic { username, password } => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password));
                format!("Basic {}", encoded)
            }
        }
    }
}

/// [`RemoteService`] backed by `reqwest`.
#[derive(Clone)]
pub struct HttpRemoteService {
    client: Client,
    base_url: String,
    auth_header: String,
}

impl HttpRemoteService {
    /// Create a client for `base_url` that sends `credentials` on every call.
    pub fn new(base_url: &str, credentials: &Credentials) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TrackerError::Http {
                message: format!("Failed to create HTTP client: {}", e),
                status_code: None,
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_header: credentials.header_value(),
        })
    }

    fn end_running_url(&self) -> String {
        format!("{}/running/end", self.base_url)
    }

    fn segments_url(&self, record_id: &str) -> String {
        format!("{}/running/{}/segments", self.base_url, record_id)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<()> {
        let response = request
            .header("Authorization", &self.auth_header)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!("[HttpRemoteService] {} -> {}", what, status);
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(MAX_ERROR_BODY).collect();
        warn!("[HttpRemoteService] {} -> {}: {}", what, status, body);

        Err(TrackerError::Http {
            message: format!("{} rejected: {}", what, body),
            status_code: Some(status.as_u16()),
        })
    }
}

impl RemoteService for HttpRemoteService {
    async fn end_running(&self, record: &RunRecord) -> Result<()> {
        let request = self.client.post(self.end_running_url()).json(record);
        self.send(request, &format!("end_running({})", record.record_id))
            .await
    }

    async fn save_segment_items(&self, record_id: &str, segments: &[WireSegment]) -> Result<()> {
        let request = self.client.post(self.segments_url(record_id)).json(segments);
        self.send(
            request,
            &format!("save_segment_items({}, {} items)", record_id, segments.len()),
        )
        .await
    }
}
