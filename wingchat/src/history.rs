//! Conversation history over REST.
//!
//! `GET {base}/messages/{counterpart}` with the caller named by the
//! `X-Identity` header. History loads are best-effort: any failure is
//! logged and yields an empty log, and nothing is retried.

use std::time::Duration;

use url::Url;
use wingchat_proto::Identity;
use wingchat_proto::message::Message;

/// Header carrying the caller identity.
pub const IDENTITY_HEADER: &str = "x-identity";

/// Errors from a history request.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// The base URL cannot carry path segments.
    #[error("base URL {0} cannot be a base")]
    BadBase(Url),
    /// The request failed or returned a non-success status.
    #[error("history request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Client for the history endpoint.
#[derive(Debug, Clone)]
pub struct HistoryClient {
    http: reqwest::Client,
    base: Url,
    identity: Identity,
}

impl HistoryClient {
    /// Creates a client for `identity` against `base` (e.g.
    /// `http://127.0.0.1:9000/`).
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::Request`] if the HTTP client cannot be
    /// built.
    pub fn new(base: Url, identity: Identity, timeout: Duration) -> Result<Self, HistoryError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base,
            identity,
        })
    }

    /// URL of the history of the conversation with `counterpart`.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::BadBase`] if the base URL is opaque.
    pub fn messages_url(&self, counterpart: &Identity) -> Result<Url, HistoryError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| HistoryError::BadBase(self.base.clone()))?
            .pop_if_empty()
            .extend(["messages", counterpart.as_str()]);
        Ok(url)
    }

    /// Fetches the history with `counterpart`.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] on network, status or decode failure.
    pub async fn fetch(&self, counterpart: &Identity) -> Result<Vec<Message>, HistoryError> {
        let url = self.messages_url(counterpart)?;
        let messages = self
            .http
            .get(url)
            .header(IDENTITY_HEADER, self.identity.as_str())
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Message>>()
            .await?;
        Ok(messages)
    }

    /// Fetches the history with `counterpart`, degrading to an empty log
    /// on failure.
    pub async fn load(&self, counterpart: &Identity) -> Vec<Message> {
        match self.fetch(counterpart).await {
            Ok(messages) => {
                tracing::debug!(counterpart = %counterpart, count = messages.len(), "history loaded");
                messages
            }
            Err(e) => {
                tracing::warn!(counterpart = %counterpart, error = %e, "failed to load history");
                Vec::new()
            }
        }
    }
}
