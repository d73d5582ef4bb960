//! Application state shared across request handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use relay_broker::BrokerHandle;

use crate::config::Config;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    broker: BrokerHandle,
    http: reqwest::Client,
    upstream_url: String,
    publish_grace: Duration,
    body_limit: usize,
}

impl AppState {
    /// Create the application state, building the shared upstream client.
    pub fn new(broker: BrokerHandle, config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.proxy_connect_timeout)
            .timeout(config.proxy_timeout)
            .build()
            .context("Failed to build upstream HTTP client")?;

        Ok(Self {
            inner: Arc::new(AppStateInner {
                broker,
                http,
                upstream_url: config.upstream_url.clone(),
                publish_grace: config.publish_grace,
                body_limit: config.body_limit,
            }),
        })
    }

    /// Handle to the broker connection manager.
    pub fn broker(&self) -> &BrokerHandle {
        &self.inner.broker
    }

    /// Shared HTTP client for proxied upstream calls.
    pub fn http(&self) -> &reqwest::Client {
        &self.inner.http
    }

    /// Upstream backend base URL.
    pub fn upstream_url(&self) -> &str {
        &self.inner.upstream_url
    }

    /// Bounded wait applied when a publish finds the channel down.
    pub fn publish_grace(&self) -> Duration {
        self.inner.publish_grace
    }

    /// Request body cap in bytes.
    pub fn body_limit(&self) -> usize {
        self.inner.body_limit
    }
}
