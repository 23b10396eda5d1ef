//! HTTP client delivering queued mail through a provider API.
//!
//! Serializes the payload to the provider's JSON submission endpoint and
//! categorizes the response for the engine: 2xx means accepted, anything
//! else is a rejection, with connection failures and timeouts reported as
//! their own variants.

use std::time::Duration;

use courier_core::MailPayload;
use serde::Serialize;
use tracing::{info_span, Instrument};

use crate::{
    error::{DeliveryError, Result},
    transport::{DeliveryReceipt, Transport},
};

const MAX_LOGGED_BODY: usize = 1024;

/// Configuration for the mail provider client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Provider submission endpoint receiving the JSON payload.
    pub endpoint_url: String,
    /// Timeout applied to every submission request.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Bearer token for provider authentication, if required.
    pub api_token: Option<String>,
}

impl ClientConfig {
    /// Creates a configuration for the given endpoint with default timeout
    /// and user agent.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            timeout: Duration::from_secs(30),
            user_agent: "Courier-Mail-Delivery/1.0".to_string(),
            api_token: None,
        }
    }

    /// Sets the bearer token sent with every submission.
    #[must_use]
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }
}

/// JSON body posted to the provider.
#[derive(Serialize)]
struct Submission<'a> {
    subject: &'a str,
    body: &'a str,
    from: &'a [String],
    to: &'a [String],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    cc: &'a [String],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    bcc: &'a [String],
    content_type: &'a str,
    charset: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a serde_json::Value>,
}

/// HTTP client for a JSON mail-provider API.
///
/// Uses connection pooling and a per-request timeout so one slow provider
/// response cannot stall a batch indefinitely.
#[derive(Debug, Clone)]
pub struct MailApiClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl MailApiClient {
    /// Creates a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built with the provided settings.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Submits one message to the provider.
    ///
    /// # Errors
    ///
    /// Returns `Network` for connection failures, `Timeout` when the request
    /// exceeds the configured deadline, and `Rejected` for any non-2xx
    /// provider response.
    pub async fn submit(&self, payload: &MailPayload) -> Result<DeliveryReceipt> {
        let start = std::time::Instant::now();

        let span = info_span!(
            "mail_submission",
            subject = %payload.subject,
            recipients = payload.to.len(),
        );

        async move {
            let submission = Submission {
                subject: &payload.subject,
                body: &payload.body,
                from: &payload.from,
                to: &payload.to,
                cc: &payload.cc,
                bcc: &payload.bcc,
                content_type: payload.format.as_mime(),
                charset: payload.charset.as_label(),
                metadata: payload.metadata.as_ref(),
            };

            let mut request = self.client.post(&self.config.endpoint_url).json(&submission);
            if let Some(token) = &self.config.api_token {
                request = request.bearer_auth(token);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start.elapsed();
                    tracing::warn!(duration_ms = duration.as_millis(), "submission failed: {}", e);

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let duration = start.elapsed();
            let status_code = response.status().as_u16();

            if !response.status().is_success() {
                let body = truncated_body(response).await;
                tracing::warn!(status = status_code, "provider rejected submission");
                return Err(DeliveryError::rejected(status_code, body));
            }

            let provider_id = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("id").and_then(|id| id.as_str()).map(str::to_string));

            tracing::debug!(
                status = status_code,
                duration_ms = duration.as_millis(),
                "provider accepted submission"
            );

            Ok(DeliveryReceipt { provider_id, duration })
        }
        .instrument(span)
        .await
    }
}

impl Transport for MailApiClient {
    fn deliver(
        &self,
        payload: MailPayload,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<DeliveryReceipt>> + Send + '_>>
    {
        Box::pin(async move { self.submit(&payload).await })
    }
}

/// Reads a response body for diagnostics, bounded for log and error storage.
async fn truncated_body(response: reqwest::Response) -> String {
    match response.text().await {
        Ok(text) if text.len() > MAX_LOGGED_BODY => {
            let mut end = MAX_LOGGED_BODY;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated)", &text[..end])
        },
        Ok(text) => text,
        Err(e) => format!("[failed to read response body: {e}]"),
    }
}
