// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use crate::metrics::GuardianMetrics;
use ethers::providers::{Http, HttpClientError, JsonRpcClient, Provider};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;

/// Default minimum delay between two requests, in milliseconds
pub const DEFAULT_MIN_REQUEST_DELAY_MS: u64 = 100;

/// Default limit on concurrent requests to the provider
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;

/// Default upper bound on a single provider request
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Whether a provider error message indicates rate limiting or a
/// response-size limit, both of which shrink with a smaller block range.
pub fn is_rate_limit_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("rate limit")
        || message.contains("429")
        || message.contains("too many requests")
        || message.contains("quota exceeded")
        || message.contains("-32005") // Infura limit error code
        || message.contains("limit exceeded")
        || message.contains("query returned more than")
        || message.contains("response size")
}

/// Matches both the display form ("operation timed out") and the debug form
/// (`TimedOut`) of a client-side request timeout.
pub fn is_timeout_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("timeout")
        || message.contains("timed out")
        || message.contains("timedout")
        || message.contains("504")
}

#[derive(Debug, Clone)]
pub struct MeteredEthHttpProvider {
    inner: Http,
    metrics: Arc<GuardianMetrics>,
    semaphore: Arc<tokio::sync::Semaphore>,
    min_request_delay: Duration,
    last_request_time: Arc<Mutex<Instant>>,
}

#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
impl JsonRpcClient for MeteredEthHttpProvider {
    type Error = HttpClientError;

    async fn request<T: Serialize + Send + Sync + Debug, R: DeserializeOwned + Send>(
        &self,
        method: &str,
        params: T,
    ) -> Result<R, HttpClientError> {
        // The semaphore is owned here and never closed
        let _permit = self.semaphore.acquire().await.ok();

        // Enforce minimum delay between requests
        let mut last_request = self.last_request_time.lock().await;
        let elapsed = Instant::now().saturating_duration_since(*last_request);
        if elapsed < self.min_request_delay {
            tokio::time::sleep(self.min_request_delay - elapsed).await;
        }
        *last_request = Instant::now();
        drop(last_request);

        self.metrics
            .eth_rpc_queries
            .with_label_values(&[method])
            .inc();
        let _guard = self
            .metrics
            .eth_rpc_queries_latency
            .with_label_values(&[method])
            .start_timer();

        let result = self.inner.request(method, params).await;

        match &result {
            Ok(_) => self.metrics.eth_node_connected.set(1),
            Err(e) => {
                self.metrics.eth_node_connected.set(0);
                // Some providers answer rate limits with a non-standard body, so
                // the debug form is inspected rather than the error code.
                if is_rate_limit_error(&format!("{:?}", e)) {
                    self.metrics
                        .eth_rpc_rate_limited
                        .with_label_values(&[method])
                        .inc();
                }
            }
        }
        result
    }
}

impl MeteredEthHttpProvider {
    pub fn new(
        url: impl Into<Url>,
        metrics: Arc<GuardianMetrics>,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        Self::with_limits(
            url,
            metrics,
            DEFAULT_MAX_CONCURRENT_REQUESTS,
            Duration::from_millis(DEFAULT_MIN_REQUEST_DELAY_MS),
            request_timeout,
        )
    }

    pub fn with_limits(
        url: impl Into<Url>,
        metrics: Arc<GuardianMetrics>,
        max_concurrent_requests: usize,
        min_request_delay: Duration,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        // Requests that never get an answer fail after `request_timeout`
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            inner: Http::new_with_client(url, client),
            metrics,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent_requests.max(1))),
            min_request_delay,
            last_request_time: Arc::new(Mutex::new(
                Instant::now()
                    .checked_sub(min_request_delay)
                    .unwrap_or_else(Instant::now),
            )),
        })
    }
}

pub fn new_metered_eth_provider(
    url: &str,
    metrics: Arc<GuardianMetrics>,
    request_timeout: Duration,
) -> anyhow::Result<Provider<MeteredEthHttpProvider>> {
    let http_provider = MeteredEthHttpProvider::new(Url::parse(url)?, metrics, request_timeout)?;
    Ok(Provider::new(http_provider))
}
