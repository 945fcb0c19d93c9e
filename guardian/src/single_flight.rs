// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! At-most-one-in-flight execution for a named operation.
//!
//! A call made while the operation is running returns `None` immediately
//! without invoking it. Calls are dropped, never queued. The busy flag is
//! cleared by a drop guard, so it is released on success, error, panic and
//! when the calling future is cancelled.

use crate::metrics::GuardianMetrics;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

pub struct SingleFlightGuard {
    name: String,
    busy: AtomicBool,
    metrics: Option<Arc<GuardianMetrics>>,
}

struct BusyReset<'a>(&'a AtomicBool);

impl Drop for BusyReset<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SingleFlightGuard {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            busy: AtomicBool::new(false),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<GuardianMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn run<F, Fut, T>(&self, op: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("[SingleFlight] {} already in flight, dropping call", self.name);
            if let Some(metrics) = &self.metrics {
                metrics
                    .single_flight_dropped
                    .with_label_values(&[self.name.as_str()])
                    .inc();
            }
            return None;
        }
        let _reset = BusyReset(&self.busy);
        Some(op().await)
    }

    /// Bind `op` to this guard.
    pub fn wrap<F>(self: Arc<Self>, op: F) -> GuardedOperation<F> {
        GuardedOperation { guard: self, op }
    }
}

pub struct GuardedOperation<F> {
    guard: Arc<SingleFlightGuard>,
    op: F,
}

impl<F, Fut, T> GuardedOperation<F>
where
    F: Fn() -> Fut,
    Fut: Future<Output = T>,
{
    pub async fn call(&self) -> Option<T> {
        self.guard.run(&self.op).await
    }

    pub fn guard(&self) -> &SingleFlightGuard {
        &self.guard
    }
}
