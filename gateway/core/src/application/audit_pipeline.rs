// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Audit Pipeline
//!
//! Fire-and-forget event recording for the decision path. `record` is
//! synchronous and never blocks or fails the caller; events land in a
//! bounded buffer drained by one background writer. Overflow drops the
//! oldest buffered event. Cancellation from the request context never
//! cancels the write.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::audit::{AuditEvent, AuditFilter, AuditPage, AuditStats};
use crate::domain::repository::AuditRepository;

use super::registry::RegistryError;

/// Hard cap on one query page.
pub const MAX_QUERY_LIMIT: i64 = 1000;
pub const DEFAULT_QUERY_LIMIT: i64 = 100;
const DEFAULT_TOP_N: i64 = 10;
const DRAIN_BATCH: usize = 256;

pub struct AuditPipeline {
    repo: Arc<dyn AuditRepository>,
    buffer: Mutex<VecDeque<AuditEvent>>,
    notify: Notify,
    capacity: usize,
}

impl AuditPipeline {
    pub fn new(repo: Arc<dyn AuditRepository>, capacity: usize) -> Self {
        Self {
            repo,
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Queue an event. Never blocks; on overflow the oldest buffered
    /// event is dropped and counted against us in the logs.
    pub fn record(&self, event: AuditEvent) {
        {
            let mut buffer = self.buffer.lock();
            if buffer.len() >= self.capacity {
                buffer.pop_front();
                warn!("audit buffer full, dropped oldest event");
            }
            buffer.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Background writer; run once per process. Drains in batches and
    /// swallows storage errors after logging them — an audit failure
    /// must never surface on the decision path.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.drain().await;
                    debug!("audit writer stopping");
                    return;
                }
                _ = self.notify.notified() => {
                    self.drain().await;
                }
            }
        }
    }

    /// Flush everything currently buffered.
    pub async fn drain(&self) {
        loop {
            let batch: Vec<AuditEvent> = {
                let mut buffer = self.buffer.lock();
                let take = buffer.len().min(DRAIN_BATCH);
                buffer.drain(..take).collect()
            };
            if batch.is_empty() {
                return;
            }
            if let Err(e) = self.repo.insert_batch(&batch).await {
                warn!(error = %e, dropped = batch.len(), "audit batch write failed");
            }
        }
    }

    pub async fn query(
        &self,
        filter: &AuditFilter,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<AuditPage, RegistryError> {
        let limit = limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .clamp(1, MAX_QUERY_LIMIT);
        let offset = offset.unwrap_or(0).max(0);
        Ok(self.repo.query(filter, limit, offset).await?)
    }

    pub async fn stats(&self, filter: &AuditFilter) -> Result<AuditStats, RegistryError> {
        Ok(self.repo.stats(filter, DEFAULT_TOP_N).await?)
    }
}
