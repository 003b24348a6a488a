use crate::error::{PointCountError, PointCountResult};
use crate::model::{EstimationReport, PeriodCount, SamplingFrequency, TimeSample};
use crate::sampling::period::{self, Period};
use crate::tracker::{AsOfQuery, AuthenticatedSession, IssueTrackerClient, SearchResult};
use crate::validation::ensure_active;
use chrono::{DateTime, Utc, Weekday};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct EstimationSampler {
    client: Arc<dyn IssueTrackerClient>,
    max_in_flight: usize,
    week_start: Weekday,
}

impl EstimationSampler {
    pub fn new(client: Arc<dyn IssueTrackerClient>, max_in_flight: usize, week_start: Weekday) -> Self {
        Self {
            client,
            max_in_flight: max_in_flight.max(1),
            week_start,
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Sums `field_id` over the issues matching `query` as of the end of each
    /// period, for `period_count` periods ending at `now`.
    ///
    /// At most `max_in_flight` searches run at once. The first failing search
    /// aborts the rest, and so does `cancel`; neither returns a partial report.
    #[allow(clippy::too_many_arguments)]
    pub async fn sample(
        &self,
        session: &AuthenticatedSession,
        query: &str,
        field_id: &str,
        frequency: SamplingFrequency,
        period_count: PeriodCount,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> PointCountResult<EstimationReport> {
        let mut report = EstimationReport::empty(query, field_id, frequency, now);
        if period_count.is_zero() {
            return Ok(report);
        }
        ensure_active(session)?;

        let periods = period::periods(now, frequency, period_count.get(), self.week_start)?;
        info!(
            query = %query,
            field = %field_id,
            frequency = %frequency,
            periods = periods.len(),
            max_in_flight = self.max_in_flight,
            "Sampling estimation totals"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();
        for (index, period) in periods.iter().copied().enumerate() {
            let client = Arc::clone(&self.client);
            let session = session.clone();
            let semaphore = Arc::clone(&semaphore);
            let bounded = AsOfQuery::new(query, period.end);
            let field_id = field_id.to_string();

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| PointCountError::Cancelled)?;
                ensure_active(&session)?;

                debug!(period_start = %period.start, period_end = %period.end, "Searching period");
                let result = client.search_issues_as_of(&session, &bounded, &field_id).await?;
                Ok::<_, PointCountError>((index, result))
            });
        }

        let mut slots: Vec<Option<TimeSample>> = vec![None; periods.len()];
        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    warn!(query = %query, "Sampling cancelled, abandoning in-flight searches");
                    return Err(PointCountError::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };

            match joined {
                None => break,
                Some(Ok(Ok((index, result)))) => {
                    slots[index] = Some(to_sample(&periods[index], &result));
                }
                Some(Ok(Err(err))) => {
                    tasks.abort_all();
                    warn!(error = %err, "Period search failed, aborting sampling");
                    return Err(err);
                }
                Some(Err(join_err)) => {
                    tasks.abort_all();
                    if join_err.is_cancelled() {
                        return Err(PointCountError::Cancelled);
                    }
                    return Err(PointCountError::Internal(format!(
                        "sampling task failed: {}",
                        join_err
                    )));
                }
            }
        }

        report.samples = slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| PointCountError::Internal("a period finished without a sample".to_string()))?;
        Ok(report)
    }
}

fn to_sample(period: &Period, result: &SearchResult) -> TimeSample {
    TimeSample {
        period_start: period.start,
        period_end: period.end,
        total: result.total(),
        issue_count: result.issue_count(),
    }
}
