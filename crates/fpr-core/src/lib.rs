//! Core domain model for the forecast projection reconciler.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "fpr-core";

/// One producer/orchard/fruit combination read from the source database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// `PRODUCER-ORCHARDID`, e.g. `P1-7`.
    pub producer_orchard_code: String,
    pub fruit_name: String,
}

impl SourceEntry {
    pub fn new(producer_orchard_code: impl Into<String>, fruit_name: impl Into<String>) -> Self {
        Self {
            producer_orchard_code: producer_orchard_code.into(),
            fruit_name: fruit_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedCodeError {
    #[error("producer/orchard code {code:?} must contain exactly one '-' separator, found {separators}")]
    Separator { code: String, separators: usize },
    #[error("producer/orchard code {code:?} has an empty segment")]
    EmptySegment { code: String },
    #[error("orchard id {segment:?} in producer/orchard code {code:?} is not an integer")]
    OrchardId { code: String, segment: String },
}

/// Typed split of a `PRODUCER-ORCHARDID` code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProducerOrchardCode {
    pub producer_code: String,
    pub orchard_id: i32,
}

impl FromStr for ProducerOrchardCode {
    type Err = MalformedCodeError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let separators = code.matches('-').count();
        if separators != 1 {
            return Err(MalformedCodeError::Separator {
                code: code.to_string(),
                separators,
            });
        }

        let (producer, orchard) = code
            .split_once('-')
            .ok_or_else(|| MalformedCodeError::Separator {
                code: code.to_string(),
                separators,
            })?;
        let producer = producer.trim();
        let orchard = orchard.trim();
        if producer.is_empty() || orchard.is_empty() {
            return Err(MalformedCodeError::EmptySegment {
                code: code.to_string(),
            });
        }

        let orchard_id = orchard
            .parse::<i32>()
            .map_err(|_| MalformedCodeError::OrchardId {
                code: code.to_string(),
                segment: orchard.to_string(),
            })?;

        Ok(Self {
            producer_code: producer.to_string(),
            orchard_id,
        })
    }
}

impl fmt::Display for ProducerOrchardCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.producer_code, self.orchard_id)
    }
}

/// JSON body posted to the prediction endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub path: String,
    pub season: String,
    pub provider_code: String,
    pub fruit_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastInput {
    pub provider_code: String,
    pub fruit_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastOutput {
    #[serde(rename = "last-date")]
    pub last_date: String,
    #[serde(rename = "future-dates")]
    pub future_dates: Vec<String>,
    #[serde(rename = "human-predictions")]
    pub human_predictions: Vec<Option<f64>>,
    #[serde(rename = "model-predictions")]
    pub model_predictions: Vec<Option<f64>>,
}

/// Parsed response of the prediction service for one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub input: ForecastInput,
    pub output: ForecastOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("forecast arrays differ in length: future-dates={future_dates}, human-predictions={human}, model-predictions={model}")]
pub struct ForecastShapeError {
    pub future_dates: usize,
    pub human: usize,
    pub model: usize,
}

/// One future date with its two estimates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastPoint<'a> {
    pub future_date: &'a str,
    pub human: Option<f64>,
    pub model: Option<f64>,
}

impl ForecastResult {
    pub fn check_shape(&self) -> Result<(), ForecastShapeError> {
        let out = &self.output;
        let k = out.future_dates.len();
        if out.human_predictions.len() != k || out.model_predictions.len() != k {
            return Err(ForecastShapeError {
                future_dates: k,
                human: out.human_predictions.len(),
                model: out.model_predictions.len(),
            });
        }
        Ok(())
    }

    /// Zips the three output arrays. Callers are expected to have run `check_shape`.
    pub fn points(&self) -> impl Iterator<Item = ForecastPoint<'_>> {
        let out = &self.output;
        out.future_dates
            .iter()
            .zip(&out.human_predictions)
            .zip(&out.model_predictions)
            .map(|((date, human), model)| ForecastPoint {
                future_date: date.as_str(),
                human: *human,
                model: *model,
            })
    }
}

/// Uniqueness tuple of a stored projection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectionKey {
    pub date_projection: String,
    pub producer_code: String,
    pub orchard_id: i32,
    /// Always uppercase.
    pub fruit_name: String,
}

impl ProjectionKey {
    pub fn new(code: &ProducerOrchardCode, date_projection: &str, fruit_name: &str) -> Self {
        Self {
            date_projection: date_projection.to_string(),
            producer_code: code.producer_code.clone(),
            orchard_id: code.orchard_id,
            fruit_name: fruit_name.trim().to_uppercase(),
        }
    }
}

impl fmt::Display for ProjectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "date={} producer={} orchard={} fruit={}",
            self.date_projection, self.producer_code, self.orchard_id, self.fruit_name
        )
    }
}

/// Detail row payload; the row id is generated by the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionDetail {
    pub projection_id: i64,
    pub future_date: String,
    pub human_value: Option<f64>,
    pub model_value: Option<f64>,
}

impl ProjectionDetail {
    pub fn from_point(projection_id: i64, point: ForecastPoint<'_>) -> Self {
        Self {
            projection_id,
            future_date: point.future_date.to_string(),
            human_value: point.human,
            model_value: point.model,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The forecast phase failed; nothing was written.
    NotAdded,
    /// The forecast succeeded but the duplicate check or an insert failed.
    DbOperationFailed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::NotAdded => "not added",
            FailureKind::DbOperationFailed => "DB operation failed",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedResponse {
    pub provider_code: String,
    pub message: FailureKind,
    pub error_details: String,
}

/// Final classification of one source entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryOutcome {
    Persisted(ForecastInput),
    Failed(FailedResponse),
}

impl EntryOutcome {
    pub fn failed(provider_code: &str, message: FailureKind, error: impl fmt::Display) -> Self {
        EntryOutcome::Failed(FailedResponse {
            provider_code: provider_code.to_string(),
            message,
            error_details: error.to_string(),
        })
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, EntryOutcome::Persisted(_))
    }
}

/// Per-run summary of outcomes, split into the two buckets the email reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub success_responses: Vec<ForecastInput>,
    pub failed_responses: Vec<FailedResponse>,
}

impl BatchReport {
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = EntryOutcome>) -> Self {
        let mut report = Self::default();
        for outcome in outcomes {
            report.push(outcome);
        }
        report
    }

    pub fn push(&mut self, outcome: EntryOutcome) {
        match outcome {
            EntryOutcome::Persisted(input) => self.success_responses.push(input),
            EntryOutcome::Failed(failed) => self.failed_responses.push(failed),
        }
    }

    pub fn total(&self) -> usize {
        self.success_responses.len() + self.failed_responses.len()
    }
}
