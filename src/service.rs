//! The four operations offered to the transport layer.
//!
//! Every operation authenticates with the request's credentials first (a
//! zero-period report is answered without the tracker), runs
//! under the configured request timeout, and hands failures that are not the
//! caller's fault to the [`FaultSink`] with the request's non-secret fields.

use crate::error::{PointCountError, PointCountResult};
use crate::logging::{FaultRecord, FaultSink, RequestContext};
use crate::model::{Credentials, EstimationReport, FieldDescriptor, PeriodCount, SamplingFrequency};
use crate::sampling::EstimationSampler;
use crate::tracker::IssueTrackerClient;
use crate::validation::{CredentialValidator, FieldValidator, QueryValidation, QueryValidator};
use crate::PointCountConfig;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Raw inputs of `compute estimation report`. Frequency and period count are
/// kept as received so malformed values surface as input errors.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportRequest {
    #[serde(flatten)]
    pub credentials: Credentials,
    pub query: String,
    #[serde(alias = "fieldId")]
    pub field: String,
    pub frequency: String,
    #[serde(alias = "periodCount", alias = "weeksAgoCount")]
    pub period_count: serde_json::Value,
}

impl ReportRequest {
    fn context(&self) -> RequestContext {
        let period_count = match &self.period_count {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        RequestContext::new(
            "compute_report",
            &self.credentials.user,
            &self.credentials.account_name,
        )
        .with_query(&self.query)
        .with_field(&self.field)
        .with_frequency(&self.frequency)
        .with_period_count(period_count)
    }
}

pub struct EstimationService {
    client: Arc<dyn IssueTrackerClient>,
    config: PointCountConfig,
    sink: Arc<dyn FaultSink>,
    clock: Arc<dyn Clock>,
}

impl EstimationService {
    pub fn new(
        client: Arc<dyn IssueTrackerClient>,
        config: PointCountConfig,
        sink: Arc<dyn FaultSink>,
    ) -> Self {
        Self {
            client,
            config,
            sink,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &PointCountConfig {
        &self.config
    }

    pub async fn check_credentials(&self, credentials: &Credentials) -> PointCountResult<()> {
        let ctx = RequestContext::new("check_credentials", &credentials.user, &credentials.account_name);
        let validator = CredentialValidator::new(Arc::clone(&self.client));

        self.run(ctx, CancellationToken::new(), async {
            validator.initialize(credentials).await.map(|_| ())
        })
        .await
    }

    pub async fn validate_query(
        &self,
        credentials: &Credentials,
        query: &str,
    ) -> PointCountResult<QueryValidation> {
        let ctx = RequestContext::new("validate_query", &credentials.user, &credentials.account_name)
            .with_query(query);

        self.run(ctx, CancellationToken::new(), async {
            let session = CredentialValidator::new(Arc::clone(&self.client))
                .initialize(credentials)
                .await?;
            QueryValidator::new(Arc::clone(&self.client))
                .validate(&session, query)
                .await
        })
        .await
    }

    pub async fn validate_field(
        &self,
        credentials: &Credentials,
        field_id: &str,
    ) -> PointCountResult<FieldDescriptor> {
        let ctx = RequestContext::new("validate_field", &credentials.user, &credentials.account_name)
            .with_field(field_id);

        self.run(ctx, CancellationToken::new(), async {
            let session = CredentialValidator::new(Arc::clone(&self.client))
                .initialize(credentials)
                .await?;
            FieldValidator::new(Arc::clone(&self.client))
                .validate(&session, field_id)
                .await
        })
        .await
    }

    pub async fn compute_report(&self, request: &ReportRequest) -> PointCountResult<EstimationReport> {
        self.compute_report_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Like [`compute_report`](Self::compute_report), abandoning all remote
    /// work once `cancel` fires.
    pub async fn compute_report_with_cancel(
        &self,
        request: &ReportRequest,
        cancel: CancellationToken,
    ) -> PointCountResult<EstimationReport> {
        let ctx = request.context();
        let sampler_cancel = cancel.child_token();

        self.run(ctx, cancel, async {
            let frequency: SamplingFrequency = request.frequency.parse()?;
            let period_count = PeriodCount::from_json(&request.period_count, self.config.max_period_count)?;
            if period_count.is_zero() {
                debug!("Zero periods requested, skipping the tracker");
                return Ok(EstimationReport::empty(
                    request.query.as_str(),
                    request.field.as_str(),
                    frequency,
                    self.clock.now(),
                ));
            }

            let session = CredentialValidator::new(Arc::clone(&self.client))
                .initialize(&request.credentials)
                .await?;
            QueryValidator::new(Arc::clone(&self.client))
                .validate(&session, &request.query)
                .await?
                .into_result()?;
            let field = FieldValidator::new(Arc::clone(&self.client))
                .validate(&session, &request.field)
                .await?;

            let sampler = EstimationSampler::new(
                Arc::clone(&self.client),
                self.config.max_concurrent_queries,
                self.config.week_start,
            );
            sampler
                .sample(
                    &session,
                    &request.query,
                    &field.id,
                    frequency,
                    period_count,
                    self.clock.now(),
                    &sampler_cancel,
                )
                .await
        })
        .await
    }

    async fn run<T, F>(&self, ctx: RequestContext, cancel: CancellationToken, operation: F) -> PointCountResult<T>
    where
        F: Future<Output = PointCountResult<T>>,
    {
        let timeout = Duration::from_secs(self.config.request_timeout_seconds);
        debug!(request_id = %ctx.request_id, operation = %ctx.operation, "Handling request");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PointCountError::Cancelled),
            outcome = tokio::time::timeout(timeout, operation) => match outcome {
                Ok(result) => result,
                Err(_) => Err(PointCountError::TimedOut(self.config.request_timeout_seconds)),
            },
        };

        match result {
            Ok(value) => {
                info!(request_id = %ctx.request_id, operation = %ctx.operation, "Request succeeded");
                Ok(value)
            }
            Err(err) if err.is_client_error() => {
                info!(
                    request_id = %ctx.request_id,
                    operation = %ctx.operation,
                    kind = err.kind(),
                    "Request rejected: {}",
                    err
                );
                Err(err)
            }
            Err(err) => Err(self.report_fault(ctx, err)),
        }
    }

    fn report_fault(&self, ctx: RequestContext, err: PointCountError) -> PointCountError {
        let request_id = ctx.request_id.clone();
        self.sink.record(FaultRecord {
            at: Utc::now(),
            kind: err.kind().to_string(),
            message: err.to_string(),
            context: ctx,
        });

        match err {
            // unclassified faults never leak their details to the caller
            PointCountError::Internal(_) => {
                PointCountError::Internal(format!("unexpected failure, request id {}", request_id))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;
    use crate::tracker::MemoryTracker;
    use chrono::TimeZone;

    #[test]
    fn test_report_request_accepts_camel_case() {
        let request: ReportRequest = serde_json::from_value(serde_json::json!({
            "user": "ada@example.com",
            "apiToken": "token-1",
            "accountName": "acme",
            "query": "project = X",
            "fieldId": "storyPoints",
            "frequency": "weekly",
            "weeksAgoCount": 4
        }))
        .unwrap();

        assert_eq!(request.credentials.api_token, "token-1");
        assert_eq!(request.field, "storyPoints");
        assert_eq!(request.period_count, serde_json::json!(4));

        let ctx = request.context();
        assert_eq!(ctx.period_count.as_deref(), Some("4"));
        assert_eq!(ctx.frequency.as_deref(), Some("weekly"));
    }

    #[tokio::test]
    async fn test_fixed_clock_drives_report_end() {
        let creds = Credentials::new("ada@example.com", "token-1", "acme");
        let now = Utc.with_ymd_and_hms(2024, 5, 15, 10, 30, 0).unwrap();
        let tracker = MemoryTracker::new().with_account(creds.clone()).with_field(
            FieldDescriptor::new("storyPoints", "Story Points", crate::FieldType::Number),
        );
        let service = EstimationService::new(
            Arc::new(tracker),
            PointCountConfig::default(),
            Arc::new(MemorySink::new()),
        )
        .with_clock(Arc::new(FixedClock(now)));

        let request = ReportRequest {
            credentials: creds,
            query: "project = X".to_string(),
            field: "storyPoints".to_string(),
            frequency: "daily".to_string(),
            period_count: serde_json::json!(2),
        };
        let report = service.compute_report(&request).await.unwrap();
        assert_eq!(report.generated_at, now);
        assert_eq!(report.latest().unwrap().period_end, now);
    }
}
