//! Per-entry forecast validation and persistence.

use chrono::{NaiveDate, Utc};
use fpr_adapters::ForecastClient;
use fpr_core::{
    BatchReport, EntryOutcome, FailureKind, ForecastRequest, ForecastResult, ProducerOrchardCode,
    ProjectionDetail, ProjectionKey, SourceEntry,
};
use fpr_storage::{ProjectionStore, StoreError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ForecastSettings;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("projection already exists ({key}, id {existing_id})")]
    DuplicateProjection { key: ProjectionKey, existing_id: i64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Walks the source entries in order, one forecast call and at most one
/// projection write per entry. Individual failures are recorded in the
/// report and never stop the batch.
pub struct ForecastPipeline<'a> {
    forecast: &'a dyn ForecastClient,
    store: &'a dyn ProjectionStore,
    settings: &'a ForecastSettings,
    season: String,
}

impl<'a> ForecastPipeline<'a> {
    pub fn new(
        forecast: &'a dyn ForecastClient,
        store: &'a dyn ProjectionStore,
        settings: &'a ForecastSettings,
    ) -> Self {
        Self {
            forecast,
            store,
            settings,
            season: settings.season_on(Utc::now().date_naive()),
        }
    }

    /// Pins the season label to the date the run started.
    pub fn with_run_date(mut self, run_date: NaiveDate) -> Self {
        self.season = self.settings.season_on(run_date);
        self
    }

    pub fn season(&self) -> &str {
        &self.season
    }

    pub async fn run(&self, entries: &[SourceEntry]) -> BatchReport {
        let total = entries.len();
        let mut report = BatchReport::default();

        for (idx, entry) in entries.iter().enumerate() {
            let outcome = self.process_entry(entry).await;
            match &outcome {
                EntryOutcome::Persisted(input) => info!(
                    provider_code = %input.provider_code,
                    fruit = %input.fruit_name,
                    "projection stored"
                ),
                EntryOutcome::Failed(failed) => warn!(
                    provider_code = %failed.provider_code,
                    message = %failed.message,
                    details = %failed.error_details,
                    "entry failed"
                ),
            }
            info!("processed {} of {}", idx + 1, total);
            report.push(outcome);
        }

        report
    }

    pub async fn process_entry(&self, entry: &SourceEntry) -> EntryOutcome {
        let code = match entry.producer_orchard_code.parse::<ProducerOrchardCode>() {
            Ok(code) => code,
            Err(err) => {
                return EntryOutcome::failed(&entry.producer_orchard_code, FailureKind::NotAdded, err)
            }
        };

        let request = ForecastRequest {
            path: self.settings.path.clone(),
            season: self.season.clone(),
            provider_code: entry.producer_orchard_code.clone(),
            fruit_name: entry.fruit_name.clone(),
        };
        let result = match self.forecast.forecast(&request).await {
            Ok(result) => result,
            Err(err) => {
                return EntryOutcome::failed(&entry.producer_orchard_code, FailureKind::NotAdded, err)
            }
        };
        if let Err(err) = result.check_shape() {
            return EntryOutcome::failed(&entry.producer_orchard_code, FailureKind::NotAdded, err);
        }

        let key = ProjectionKey::new(&code, &result.output.last_date, &entry.fruit_name);
        match self.persist(&key, &result).await {
            Ok(projection_id) => {
                debug!(projection_id, details = result.output.future_dates.len(), "projection written");
                EntryOutcome::Persisted(result.input)
            }
            Err(err) => EntryOutcome::failed(
                &entry.producer_orchard_code,
                FailureKind::DbOperationFailed,
                err,
            ),
        }
    }

    /// Duplicate check, then the parent row, then one detail row per future date.
    pub async fn persist(&self, key: &ProjectionKey, result: &ForecastResult) -> Result<i64, PersistError> {
        if let Some(existing_id) = self.store.find_projection(key).await? {
            return Err(PersistError::DuplicateProjection {
                key: key.clone(),
                existing_id,
            });
        }

        let projection_id = self.store.insert_projection(key).await?;
        for point in result.points() {
            self.store
                .insert_detail(&ProjectionDetail::from_point(projection_id, point))
                .await?;
        }
        Ok(projection_id)
    }
}
