// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of KWatch.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! External relay state store.
//!
//! Relays are switched by writing `0`/`1` under `relayControl/<relay>` in a
//! realtime key-value database. The manual-control UI writes to the same tree
//! and raises `relayControl/manualMode` while an operator is in charge.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use tracing::{debug, error};

use crate::error::{PipelineError, Result};

/// Relay name -> 0 (off) / 1 (on).
pub type RelayStates = BTreeMap<String, u8>;

#[async_trait]
pub trait RelaySink: Send + Sync {
    /// Write all given relay states in one request.
    async fn push_states(&self, states: &RelayStates) -> Result<()>;

    /// Whether an operator has taken manual control.
    async fn manual_override(&self) -> Result<bool>;
}

/// REST client for a Firebase-style realtime database.
#[derive(Debug, Clone)]
pub struct HttpRelaySink {
    base_url: String,
    auth: Option<String>,
    timeout: Duration,
    client: Client,
}

impl HttpRelaySink {
    pub fn new(base_url: impl Into<String>, auth: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Upstream(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            auth,
            timeout,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}.json", self.base_url)
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some(token) => request.query(&[("auth", token)]),
            None => request,
        }
    }

    fn send_error(&self, e: reqwest::Error) -> PipelineError {
        if e.is_timeout() {
            PipelineError::UpstreamTimeout {
                after: self.timeout,
            }
        } else {
            PipelineError::from(e)
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(response),
            status => {
                let body = response.text().await.unwrap_or_default();
                error!(status = %status, body = %body, "Relay store rejected request");
                Err(PipelineError::Upstream(format!(
                    "relay store returned {status}: {body}"
                )))
            }
        }
    }
}

#[async_trait]
impl RelaySink for HttpRelaySink {
    async fn push_states(&self, states: &RelayStates) -> Result<()> {
        let url = self.url("relayControl");
        debug!(url = %url, ?states, "Pushing relay states");

        let response = self
            .with_auth(self.client.patch(&url))
            .json(states)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        Self::check(response).await?;
        Ok(())
    }

    async fn manual_override(&self) -> Result<bool> {
        let url = self.url("relayControl/manualMode");
        let response = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        let response = Self::check(response).await?;

        // Unset reads back as JSON null
        let flag: Option<bool> = response.json().await?;
        Ok(flag.unwrap_or(false))
    }
}

/// In-process relay store, used in tests and when no remote store is configured.
#[derive(Debug, Default)]
pub struct MemoryRelaySink {
    states: Mutex<RelayStates>,
    manual: AtomicBool,
    pushes: AtomicUsize,
}

impl MemoryRelaySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_manual_override(&self, on: bool) {
        self.manual.store(on, Ordering::SeqCst);
    }

    pub fn states(&self) -> RelayStates {
        self.states.lock().clone()
    }

    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelaySink for MemoryRelaySink {
    async fn push_states(&self, states: &RelayStates) -> Result<()> {
        self.states
            .lock()
            .extend(states.iter().map(|(k, v)| (k.clone(), *v)));
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn manual_override(&self) -> Result<bool> {
        Ok(self.manual.load(Ordering::SeqCst))
    }
}
