use crate::error::{PointCountError, PointCountResult};
use crate::model::SamplingFrequency;
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    pub fn length(&self) -> Duration {
        self.end - self.start
    }
}

/// Slices the look-back window ending at `now` into `count` contiguous periods,
/// oldest first.
///
/// The newest period runs from the latest aligned boundary strictly before
/// `now` up to `now`; every earlier period is a full period. Alignment is UTC
/// midnight for daily, `week_start` for weekly and fortnightly, the first of
/// the month for monthly and the first of the quarter for quarterly.
pub fn periods(
    now: DateTime<Utc>,
    frequency: SamplingFrequency,
    count: u32,
    week_start: Weekday,
) -> PointCountResult<Vec<Period>> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let mut boundary = align(now, frequency, week_start)?;
    if boundary == now {
        boundary = step_back(boundary, frequency)?;
    }

    let mut result = Vec::with_capacity(count as usize);
    let mut end = now;
    for _ in 0..count {
        result.push(Period { start: boundary, end });
        end = boundary;
        boundary = step_back(boundary, frequency)?;
    }

    result.reverse();
    Ok(result)
}

fn align(
    now: DateTime<Utc>,
    frequency: SamplingFrequency,
    week_start: Weekday,
) -> PointCountResult<DateTime<Utc>> {
    let today = now.date_naive();
    let date = match frequency {
        SamplingFrequency::Daily => today,
        SamplingFrequency::Weekly | SamplingFrequency::Fortnightly => {
            let days_back = (today.weekday().num_days_from_monday() + 7
                - week_start.num_days_from_monday())
                % 7;
            today - Duration::days(days_back as i64)
        }
        SamplingFrequency::Monthly => first_of_month(today.year(), today.month())?,
        SamplingFrequency::Quarterly => {
            let quarter_month = (today.month() - 1) / 3 * 3 + 1;
            first_of_month(today.year(), quarter_month)?
        }
    };
    Ok(midnight(date))
}

fn step_back(boundary: DateTime<Utc>, frequency: SamplingFrequency) -> PointCountResult<DateTime<Utc>> {
    let previous = match frequency {
        SamplingFrequency::Daily => boundary.checked_sub_signed(Duration::days(1)),
        SamplingFrequency::Weekly => boundary.checked_sub_signed(Duration::days(7)),
        SamplingFrequency::Fortnightly => boundary.checked_sub_signed(Duration::days(14)),
        SamplingFrequency::Monthly => boundary.checked_sub_months(Months::new(1)),
        SamplingFrequency::Quarterly => boundary.checked_sub_months(Months::new(3)),
    };
    previous.ok_or_else(|| out_of_range(boundary))
}

fn first_of_month(year: i32, month: u32) -> PointCountResult<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| PointCountError::Input(format!("invalid calendar month {}-{}", year, month)))
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

fn out_of_range(boundary: DateTime<Utc>) -> PointCountError {
    PointCountError::Input(format!(
        "look-back window reaches before the supported date range at {}",
        boundary
    ))
}
