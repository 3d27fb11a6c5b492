//! Per-worker HTTP sessions
//!
//! The [`SessionPool`] holds one [`Session`] per worker slot. Slots are plain
//! indices fixed when the pool is created (`0..slots`); a session is built the
//! first time its slot asks for it and reused for the rest of the run, so each
//! worker keeps its own connection pool and User-Agent. [`SessionPool::close_all`]
//! drops every session at shutdown.

use crate::config::{RetryConfig, SessionConfig};
use crate::error::{Error, Result};
use crate::retry::request_with_retry;
use rand::seq::SliceRandom;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Reusable HTTP client bound to one worker slot
///
/// Cloning is cheap and clones share the same connection pool.
#[derive(Clone, Debug)]
pub struct Session {
    slot: usize,
    client: reqwest::Client,
    retry: Arc<RetryConfig>,
}

impl Session {
    /// Build a session for `slot` from the session configuration
    pub fn new(slot: usize, config: &SessionConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .connect_timeout(config.connect_timeout);

        if let Some(agent) = config.user_agents.choose(&mut rand::thread_rng()) {
            builder = builder.user_agent(agent.clone());
        }

        let client = builder
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            slot,
            client,
            retry: Arc::new(config.retry.clone()),
        })
    }

    /// Worker slot this session belongs to
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// GET `url` and decode a JSON body, applying the transport retry policy
    ///
    /// `timeout` bounds each attempt. Any status other than 200 is an
    /// [`Error::HttpStatus`]; 429 and 5xx are retried, other statuses are not.
    pub async fn get_json(&self, url: &str, timeout: Duration) -> Result<Value> {
        let client = &self.client;
        request_with_retry(&self.retry, move || async move {
            let response = client.get(url).timeout(timeout).send().await?;
            let status = response.status();
            if status != StatusCode::OK {
                return Err(Error::HttpStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            Ok(response.json::<Value>().await?)
        })
        .await
    }

    /// GET `url` and return the raw body, applying the transport retry policy
    pub async fn get_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        let client = &self.client;
        request_with_retry(&self.retry, move || async move {
            let response = client.get(url).timeout(timeout).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(Error::HttpStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            Ok(response.bytes().await?.to_vec())
        })
        .await
    }
}

/// Lazily populated table of sessions indexed by worker slot
#[derive(Debug)]
pub struct SessionPool {
    config: SessionConfig,
    sessions: Mutex<Vec<Option<Session>>>,
}

impl SessionPool {
    /// Create a pool with `slots` empty entries
    pub fn new(config: SessionConfig, slots: usize) -> Self {
        Self {
            config,
            sessions: Mutex::new(vec![None; slots]),
        }
    }

    /// Return the session for `slot`, creating it on first use
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `slot` is outside the pool, or an error if
    /// the HTTP client cannot be built.
    pub async fn acquire(&self, slot: usize) -> Result<Session> {
        let mut sessions = self.sessions.lock().await;
        let total = sessions.len();
        let entry = sessions.get_mut(slot).ok_or_else(|| Error::Config {
            message: format!("worker slot {slot} outside session pool of {total}"),
            key: Some("dispatch.concurrency".to_string()),
        })?;

        if let Some(session) = entry {
            return Ok(session.clone());
        }

        let session = Session::new(slot, &self.config)?;
        tracing::debug!(slot, "opened session");
        *entry = Some(session.clone());
        Ok(session)
    }

    /// Number of slots whose session has been created
    pub async fn open_sessions(&self) -> usize {
        self.sessions
            .lock()
            .await
            .iter()
            .filter(|entry| entry.is_some())
            .count()
    }

    /// Drop every cached session
    ///
    /// Safe to call more than once and when some slots were never used. Slots
    /// stay valid; a later [`acquire`](Self::acquire) opens a fresh session.
    pub async fn close_all(&self) {
        let mut sessions = self.sessions.lock().await;
        let mut closed = 0;
        for entry in sessions.iter_mut() {
            if entry.take().is_some() {
                closed += 1;
            }
        }
        if closed > 0 {
            tracing::info!(closed, "closed HTTP sessions");
        }
    }
}
