use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chatrelay_core::ConnectionId;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Serialize;

use crate::error::{Error, PushFailure, Result};

/// Body pushed to every connection: `{"data": "<message>"}`
#[derive(Debug, Serialize)]
struct PushPayload<'a> {
    data: &'a str,
}

/// Encode the push body for a message once, to be shared by every push.
pub fn encode_payload(message: &str) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(&PushPayload { data: message })?))
}

/// Delivers a payload to one live connection through the transport gateway.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushClient: Send + Sync {
    async fn push(
        &self,
        connection_id: &ConnectionId,
        payload: Bytes,
    ) -> std::result::Result<(), PushFailure>;
}

/// Pushes over the gateway's management API:
/// `POST {endpoint}/@connections/{connection_id}`.
///
/// 2xx is delivered, 410 means the connection is gone, anything else is a
/// transport failure.
#[derive(Clone)]
pub struct HttpPushClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPushClient {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build push client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    fn connection_url(&self, connection_id: &ConnectionId) -> String {
        format!(
            "{}/@connections/{}",
            self.endpoint,
            utf8_percent_encode(connection_id.as_str(), NON_ALPHANUMERIC)
        )
    }
}

#[async_trait]
impl PushClient for HttpPushClient {
    async fn push(
        &self,
        connection_id: &ConnectionId,
        payload: Bytes,
    ) -> std::result::Result<(), PushFailure> {
        let response = self
            .client
            .post(self.connection_url(connection_id))
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| PushFailure::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::GONE {
            Err(PushFailure::Gone)
        } else {
            Err(PushFailure::Transport(format!("unexpected status {status}")))
        }
    }
}
