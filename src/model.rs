use crate::error::{PointCountError, PointCountResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    #[serde(alias = "apiToken", alias = "token")]
    pub api_token: String,
    #[serde(alias = "accountName", alias = "account")]
    pub account_name: String,
}

impl Credentials {
    pub fn new(
        user: impl Into<String>,
        api_token: impl Into<String>,
        account_name: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            api_token: api_token.into(),
            account_name: account_name.into(),
        }
    }
}

// The token must never reach a log line.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("api_token", &"<redacted>")
            .field("account_name", &self.account_name)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Number,
    String,
    User,
    Date,
    DateTime,
    Array,
    Option,
    Other(String),
}

impl FieldType {
    /// Maps a tracker schema type name (e.g. `"number"`, `"user"`) onto a field type.
    pub fn from_schema(schema_type: &str) -> Self {
        match schema_type {
            "number" => FieldType::Number,
            "string" => FieldType::String,
            "user" => FieldType::User,
            "date" => FieldType::Date,
            "datetime" => FieldType::DateTime,
            "array" => FieldType::Array,
            "option" => FieldType::Option,
            other => FieldType::Other(other.to_string()),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Number)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Number => "number",
            FieldType::String => "string",
            FieldType::User => "user",
            FieldType::Date => "date",
            FieldType::DateTime => "datetime",
            FieldType::Array => "array",
            FieldType::Option => "option",
            FieldType::Other(other) => other.as_str(),
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub id: String,
    pub name: String,
    pub declared_type: FieldType,
}

impl FieldDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, declared_type: FieldType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            declared_type,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.declared_type.is_numeric()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingFrequency {
    Daily,
    Weekly,
    Fortnightly,
    Monthly,
    Quarterly,
}

impl SamplingFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            SamplingFrequency::Daily => "daily",
            SamplingFrequency::Weekly => "weekly",
            SamplingFrequency::Fortnightly => "fortnightly",
            SamplingFrequency::Monthly => "monthly",
            SamplingFrequency::Quarterly => "quarterly",
        }
    }
}

impl fmt::Display for SamplingFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SamplingFrequency {
    type Err = PointCountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(SamplingFrequency::Daily),
            "weekly" | "week" => Ok(SamplingFrequency::Weekly),
            "fortnightly" | "biweekly" => Ok(SamplingFrequency::Fortnightly),
            "monthly" | "month" => Ok(SamplingFrequency::Monthly),
            "quarterly" | "quarter" => Ok(SamplingFrequency::Quarterly),
            other => Err(PointCountError::Input(format!(
                "unknown sampling frequency '{}'",
                other
            ))),
        }
    }
}

/// Number of consecutive periods to sample, counted back from "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct PeriodCount(u32);

impl PeriodCount {
    pub fn new(count: i64, max: u32) -> PointCountResult<Self> {
        if count < 0 {
            return Err(PointCountError::Input(format!(
                "period count must not be negative, got {}",
                count
            )));
        }
        if count > max as i64 {
            return Err(PointCountError::Input(format!(
                "period count {} exceeds the maximum of {}",
                count, max
            )));
        }
        Ok(PeriodCount(count as u32))
    }

    /// Accepts the shapes a request body can carry: integers, or strings holding an integer.
    pub fn from_json(value: &serde_json::Value, max: u32) -> PointCountResult<Self> {
        match value {
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(count) => Self::new(count, max),
                None => Err(PointCountError::Input(format!(
                    "period count must be an integer, got {}",
                    n
                ))),
            },
            serde_json::Value::String(s) => match s.trim().parse::<i64>() {
                Ok(count) => Self::new(count, max),
                Err(_) => Err(PointCountError::Input(format!(
                    "period count must be an integer, got '{}'",
                    s
                ))),
            },
            other => Err(PointCountError::Input(format!(
                "period count must be an integer, got {}",
                other
            ))),
        }
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSample {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total: f64,
    pub issue_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationReport {
    pub query: String,
    pub field: String,
    pub frequency: SamplingFrequency,
    pub generated_at: DateTime<Utc>,
    /// Oldest period first.
    pub samples: Vec<TimeSample>,
}

impl EstimationReport {
    pub fn empty(
        query: impl Into<String>,
        field: impl Into<String>,
        frequency: SamplingFrequency,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            query: query.into(),
            field: field.into(),
            frequency,
            generated_at,
            samples: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&TimeSample> {
        self.samples.last()
    }

    pub fn totals(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.total).collect()
    }
}
