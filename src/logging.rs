//! Fault reporting for service calls.
//!
//! Failures that are not the caller's fault are handed to a [`FaultSink`]
//! together with the request's non-secret fields. The sink is passed into
//! [`crate::EstimationService`] rather than reached through a global, so tests
//! can install a [`MemorySink`] and inspect what was recorded.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::error;

/// Non-secret fields of the request that triggered a fault. Never holds the API token.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestContext {
    pub request_id: String,
    pub operation: String,
    pub user: String,
    pub account: String,
    pub query: Option<String>,
    pub field: Option<String>,
    pub frequency: Option<String>,
    pub period_count: Option<String>,
}

impl RequestContext {
    pub fn new(operation: &str, user: &str, account: &str) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            operation: operation.to_string(),
            user: user.to_string(),
            account: account.to_string(),
            ..Self::default()
        }
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.query = Some(query.to_string());
        self
    }

    pub fn with_field(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }

    pub fn with_frequency(mut self, frequency: impl ToString) -> Self {
        self.frequency = Some(frequency.to_string());
        self
    }

    pub fn with_period_count(mut self, period_count: impl ToString) -> Self {
        self.period_count = Some(period_count.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaultRecord {
    pub at: DateTime<Utc>,
    pub kind: String,
    pub message: String,
    pub context: RequestContext,
}

pub trait FaultSink: Send + Sync {
    fn record(&self, record: FaultRecord);
}

/// Emits each fault as a structured `tracing` error event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl FaultSink for TracingSink {
    fn record(&self, record: FaultRecord) {
        let ctx = &record.context;
        error!(
            request_id = %ctx.request_id,
            operation = %ctx.operation,
            user = %ctx.user,
            account = %ctx.account,
            query = ctx.query.as_deref().unwrap_or(""),
            field = ctx.field.as_deref().unwrap_or(""),
            frequency = ctx.frequency.as_deref().unwrap_or(""),
            period_count = ctx.period_count.as_deref().unwrap_or(""),
            kind = %record.kind,
            "{}",
            record.message
        );
    }
}

/// Keeps every record in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<FaultRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<FaultRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl FaultSink for MemorySink {
    fn record(&self, record: FaultRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

/// Installs the global `tracing` subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
