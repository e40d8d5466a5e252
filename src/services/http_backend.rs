//! HTTP backend service for Linkmirror.
//!
//! Talks to a PostgREST-style REST surface for reads and mutations and to a
//! streaming endpoint for the change feed. The feed body is newline-delimited
//! JSON, one [`FeedMessage`] per line.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::services::backend::{Backend, ChangeFeed};
use crate::types::bookmark::{Bookmark, NewBookmark};
use crate::types::change::{ChannelStatus, FeedMessage};
use crate::types::errors::BackendError;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Backend reached over HTTP.
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    collection: String,
    api_key: Option<String>,
    capacity: usize,
    streams: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl HttpBackend {
    /// Creates a client for the service rooted at `base_url`.
    pub fn new(base_url: &str, collection: &str, api_key: Option<String>) -> Result<Self, BackendError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| BackendError::NetworkError(format!("invalid base url {}: {}", base_url, e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client: Client::new(),
            base_url,
            collection: collection.to_string(),
            api_key,
            capacity: DEFAULT_CHANNEL_CAPACITY,
            streams: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// `{base}/rest/v1/{collection}`
    pub fn collection_url(&self) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::NetworkError("base url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["rest", "v1", self.collection.as_str()]);
        Ok(url)
    }

    /// `{base}/realtime/v1/channels/{channel}?collection={collection}`
    pub fn channel_url(&self, channel: &str) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::NetworkError("base url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["realtime", "v1", "channels", channel]);
        url.query_pairs_mut().append_pair("collection", &self.collection);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header("apikey", key).bearer_auth(key),
            None => builder,
        }
    }

    async fn send(builder: RequestBuilder) -> Result<Response, BackendError> {
        let resp = builder
            .send()
            .await
            .map_err(|e| BackendError::NetworkError(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(BackendError::Rejected(format!("{}: {}", status, body)))
        } else {
            Err(BackendError::NetworkError(format!("{}: {}", status, body)))
        }
    }

    fn streams(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>>, BackendError> {
        self.streams
            .lock()
            .map_err(|e| BackendError::NetworkError(e.to_string()))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_all(&self, owner_id: &str) -> Result<Vec<Bookmark>, BackendError> {
        let mut url = self.collection_url()?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("owner_id", &format!("eq.{}", owner_id))
            .append_pair("order", "created_at.desc");

        let resp = Self::send(self.request(Method::GET, url)).await?;
        resp.json::<Vec<Bookmark>>()
            .await
            .map_err(|e| BackendError::InvalidPayload(e.to_string()))
    }

    async fn insert(&self, fields: NewBookmark) -> Result<Bookmark, BackendError> {
        let url = self.collection_url()?;
        let builder = self
            .request(Method::POST, url)
            .header("Prefer", "return=representation")
            .json(&[fields]);

        let resp = Self::send(builder).await?;
        let mut rows = resp
            .json::<Vec<Bookmark>>()
            .await
            .map_err(|e| BackendError::InvalidPayload(e.to_string()))?;
        if rows.is_empty() {
            return Err(BackendError::InvalidPayload("insert returned no rows".to_string()));
        }
        Ok(rows.swap_remove(0))
    }

    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        let mut url = self.collection_url()?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{}", id));
        Self::send(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<ChangeFeed, BackendError> {
        if self.streams()?.contains_key(channel) {
            return Err(BackendError::Rejected(format!("channel already open: {}", channel)));
        }

        let url = self.channel_url(channel)?;
        let builder = self
            .request(Method::GET, url)
            .header(ACCEPT, "application/x-ndjson")
            .header(CONTENT_TYPE, "application/json");
        let resp = Self::send(builder).await?;

        let (tx, feed) = ChangeFeed::channel(channel, self.capacity);
        let handle = tokio::spawn(pump_stream(channel.to_string(), resp, tx));
        self.streams()?.insert(channel.to_string(), handle);
        info!(channel, "change stream opened");
        Ok(feed)
    }

    async fn remove_channel(&self, channel: &str) -> Result<(), BackendError> {
        let handle = self
            .streams()?
            .remove(channel)
            .ok_or_else(|| BackendError::ChannelNotFound(channel.to_string()))?;
        handle.abort();

        let url = self.channel_url(channel)?;
        Self::send(self.request(Method::DELETE, url)).await?;
        info!(channel, "change stream released");
        Ok(())
    }
}

/// Forwards decoded lines of a streaming response into the channel's feed.
async fn pump_stream(channel: String, mut resp: Response, tx: mpsc::Sender<FeedMessage>) {
    let mut decoder = LineDecoder::default();
    loop {
        let lines = match resp.chunk().await {
            Ok(Some(bytes)) => decoder.push(&bytes),
            Ok(None) => {
                debug!(channel = %channel, "change stream ended");
                decoder.finish().into_iter().collect()
            }
            Err(e) => {
                let status = ChannelStatus::ChannelError {
                    message: Some(e.to_string()),
                };
                let _ = tx.send(FeedMessage::Status(status)).await;
                return;
            }
        };
        let ended = decoder.is_finished();

        for line in lines {
            match serde_json::from_str::<FeedMessage>(&line) {
                Ok(message) => {
                    if tx.send(message).await.is_err() {
                        return;
                    }
                }
                Err(e) => warn!(channel = %channel, error = %e, "skipping undecodable feed line"),
            }
        }

        if ended {
            return;
        }
    }
}

/// Splits a byte stream into trimmed, non-empty text lines.
#[derive(Debug, Default)]
pub(crate) struct LineDecoder {
    buf: Vec<u8>,
    finished: bool,
}

impl LineDecoder {
    /// Appends a chunk and returns every line it completed.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(line) = Self::clean(&raw[..raw.len() - 1]) {
                lines.push(line);
            }
        }
        lines
    }

    /// Returns whatever trailing text had no newline, and marks the stream finished.
    pub(crate) fn finish(&mut self) -> Option<String> {
        self.finished = true;
        let rest = std::mem::take(&mut self.buf);
        Self::clean(&rest)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    fn clean(raw: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(raw);
        let text = text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}
