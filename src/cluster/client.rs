//! HTTP client for the Kubernetes core/v1 Pods API
//!
//! Lists use a single `GET`; watches keep the response body open and decode
//! it frame by frame (one JSON document per line) on a background task that
//! feeds the session's event channel.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::sync::mpsc;
use url::Url;

use crate::config::ClusterConfig;

use super::api::{ApiError, EventStream, ReplicaApi};
use super::selector::LabelSelector;
use super::types::{PodList, ReplicaList, WatchEvent, WatchParams};

/// Default capacity of the per-session event channel
pub const DEFAULT_EVENT_BUFFER: usize = 256;

// ============================================================================
// Kube Client
// ============================================================================

/// [`ReplicaApi`] implementation speaking the Kubernetes REST protocol
#[derive(Debug, Clone)]
pub struct KubeClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
    event_buffer: usize,
}

impl KubeClient {
    /// Build a client from cluster configuration
    ///
    /// Reads the bearer token and CA bundle from disk when configured.
    pub fn new(config: &ClusterConfig) -> Result<Self, ApiError> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_secs(config.connect_timeout_secs));

        if let Some(path) = &config.ca_cert_path {
            let pem = std::fs::read(path)?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }

        let token = match &config.token_path {
            Some(path) => Some(std::fs::read_to_string(path)?.trim().to_string()),
            None => None,
        };

        let mut client = Self::with_http_client(&config.api_server, builder.build()?)?;
        client.token = token;
        Ok(client)
    }

    /// Build a client around an existing HTTP client, without credentials
    pub fn with_http_client(api_server: &str, http: Client) -> Result<Self, ApiError> {
        let base_url = Url::parse(api_server)
            .map_err(|e| ApiError::Config(format!("invalid API server URL '{api_server}': {e}")))?;

        if base_url.cannot_be_a_base() {
            return Err(ApiError::Config(format!(
                "API server URL '{api_server}' cannot be used as a base"
            )));
        }

        Ok(Self {
            http,
            base_url,
            token: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
        })
    }

    /// Set the per-session event channel capacity
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Set a bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn pods_url(&self, namespace: &str, selector: &LabelSelector) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::Config("API server URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["api", "v1", "namespaces", namespace, "pods"]);

        if !selector.is_empty() {
            url.query_pairs_mut()
                .append_pair("labelSelector", &selector.to_string());
        }

        Ok(url)
    }

    fn get(&self, url: Url) -> RequestBuilder {
        let request = self.http.get(url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ReplicaApi for KubeClient {
    async fn list(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<ReplicaList, ApiError> {
        let url = self.pods_url(namespace, selector)?;
        tracing::debug!(%url, "Listing replicas");

        let response = check_status(self.get(url).send().await?).await?;
        let body = response.bytes().await?;
        let list: PodList = serde_json::from_slice(&body)?;

        Ok(list.into())
    }

    async fn watch(
        &self,
        namespace: &str,
        selector: &LabelSelector,
        params: WatchParams,
    ) -> Result<EventStream, ApiError> {
        let mut url = self.pods_url(namespace, selector)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("watch", "1")
                .append_pair("allowWatchBookmarks", "true")
                .append_pair("timeoutSeconds", &params.timeout.as_secs().max(1).to_string());
            if let Some(version) = &params.resource_version {
                query.append_pair("resourceVersion", version);
            }
        }
        tracing::debug!(%url, "Opening replica watch");

        let response = check_status(self.get(url).send().await?).await?;

        let (tx, rx) = mpsc::channel(self.event_buffer);
        tokio::spawn(forward_events(response.bytes_stream(), tx));

        Ok(rx)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Map non-success responses to [`ApiError`]
async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    if status == StatusCode::GONE {
        return Err(ApiError::Gone(message));
    }

    Err(ApiError::Status {
        code: status.as_u16(),
        message,
    })
}

/// Decode newline-delimited watch frames and forward them to the session
///
/// Returns when the body ends, a transport error occurs, or the session drops
/// its receiver. Dropping `tx` on return closes the session's channel.
async fn forward_events<S>(stream: S, tx: mpsc::Sender<WatchEvent>)
where
    S: Stream<Item = reqwest::Result<bytes::Bytes>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut buffer = BytesMut::new();

    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => return,
            chunk = stream.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => buffer.extend_from_slice(&bytes),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Watch stream transport error");
                return;
            }
            None => break,
        }

        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let frame = buffer.split_to(pos + 1);
            if !forward_frame(&frame[..pos], &tx).await {
                return;
            }
        }
    }

    // Trailing frame without a newline
    if !buffer.is_empty() {
        forward_frame(&buffer, &tx).await;
    }
}

/// Returns `false` once the receiver is gone
async fn forward_frame(frame: &[u8], tx: &mpsc::Sender<WatchEvent>) -> bool {
    let frame = frame.trim_ascii();
    if frame.is_empty() {
        return true;
    }

    match WatchEvent::from_json(frame) {
        Ok(event) => tx.send(event).await.is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping undecodable watch frame");
            true
        }
    }
}
