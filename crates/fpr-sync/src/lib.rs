//! Batch orchestration: configuration, the per-entry pipeline, the run state
//! machine and the cron scheduler.

pub mod config;
pub mod pipeline;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use fpr_adapters::{
    ForecastClient, HttpClientConfig, HttpForecastClient, LogNotifier, Notification, NotificationError,
    Notifier, SesConfig, SesNotifier,
};
use fpr_core::BatchReport;
use fpr_report::{failure_body, render_report_html, ReportError};
use fpr_storage::{
    AwsSecretsProvider, ConnectionError, ConnectionProvider, EnvSecretProvider, ProjectionStore,
    SecretConnectionProvider, SecretProvider, SourceError, SourceRepository,
};
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub use config::{
    season_for, BatchConfig, EmailSettings, ForecastSettings, NotifierBackend, SecretsBackend,
};
pub use pipeline::{ForecastPipeline, PersistError};

pub const CRATE_NAME: &str = "fpr-sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    SourceFetch,
    ValidateLoop,
    Report,
    Cleanup,
    Done,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Init => "init",
            RunPhase::SourceFetch => "source_fetch",
            RunPhase::ValidateLoop => "validate_loop",
            RunPhase::Report => "report",
            RunPhase::Cleanup => "cleanup",
            RunPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Errors that end a run. Per-entry failures never surface here.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error(transparent)]
    Notification(#[from] NotificationError),
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entries: usize,
    pub persisted: usize,
    pub failed: usize,
    pub report: BatchReport,
}

/// Connections opened during a run. `close` consumes the value, so each
/// handle is released once.
#[derive(Default)]
struct OpenConnections {
    projections: Option<Box<dyn ProjectionStore>>,
    source: Option<Box<dyn SourceRepository>>,
}

impl OpenConnections {
    async fn close(self) {
        if let Some(store) = self.projections {
            store.close().await;
        }
        if let Some(source) = self.source {
            source.close().await;
        }
    }
}

pub struct BatchRunner {
    settings: ForecastSettings,
    connections: Arc<dyn ConnectionProvider>,
    forecast: Arc<dyn ForecastClient>,
    notifier: Arc<dyn Notifier>,
}

impl BatchRunner {
    pub fn new(
        settings: ForecastSettings,
        connections: Arc<dyn ConnectionProvider>,
        forecast: Arc<dyn ForecastClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            connections,
            forecast,
            notifier,
        }
    }

    pub async fn from_config(config: &BatchConfig) -> Result<Self> {
        let secrets: Arc<dyn SecretProvider> = match config.secrets_backend {
            SecretsBackend::Aws => Arc::new(AwsSecretsProvider::new(&config.aws_region).await),
            SecretsBackend::Env => Arc::new(EnvSecretProvider),
        };
        let connections = SecretConnectionProvider::new(
            secrets,
            config.source_db.clone(),
            config.projection_db.clone(),
            config.scripts.clone(),
            config.pool,
        );

        let forecast = HttpForecastClient::new(
            config.forecast.endpoint.clone(),
            HttpClientConfig {
                timeout: Duration::from_secs(config.forecast.http_timeout_secs),
                user_agent: Some(config.forecast.user_agent.clone()),
            },
        )
        .context("building forecast client")?;

        let notifier: Arc<dyn Notifier> = match config.email.backend {
            NotifierBackend::Ses => Arc::new(
                SesNotifier::new(SesConfig {
                    region: config.aws_region.clone(),
                    from_address: config.email.from_address.clone(),
                    to_addresses: config.email.to_addresses.clone(),
                })
                .await
                .context("configuring SES notifier")?,
            ),
            NotifierBackend::Log => Arc::new(LogNotifier),
        };

        Ok(Self::new(
            config.forecast.clone(),
            Arc::new(connections),
            Arc::new(forecast),
            notifier,
        ))
    }

    /// One batch run: fetch, validate, report, and release both connections
    /// whichever way the run ends.
    pub async fn run_once(&self) -> Result<RunSummary, RunError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        async move {
            info!(phase = %RunPhase::Init, "batch run starting");
            let mut connections = OpenConnections::default();

            let outcome = match self.execute(&mut connections, started_at.date_naive()).await {
                Ok(report) => self.deliver_report(&report).await.map(|()| report),
                Err(err) => Err(err),
            };
            let outcome = match outcome {
                Ok(report) => Ok(report),
                Err(err) => Err(self.deliver_failure(err).await),
            };

            info!(phase = %RunPhase::Cleanup, "closing database connections");
            connections.close().await;

            let report = outcome?;
            let summary = RunSummary {
                run_id,
                started_at,
                finished_at: Utc::now(),
                entries: report.total(),
                persisted: report.success_responses.len(),
                failed: report.failed_responses.len(),
                report,
            };
            info!(
                phase = %RunPhase::Done,
                entries = summary.entries,
                persisted = summary.persisted,
                failed = summary.failed,
                "batch run complete"
            );
            Ok(summary)
        }
        .instrument(info_span!("batch_run", %run_id))
        .await
    }

    async fn execute(
        &self,
        connections: &mut OpenConnections,
        run_date: NaiveDate,
    ) -> Result<BatchReport, RunError> {
        let store = &**connections
            .projections
            .insert(self.connections.open_projection_store().await?);
        let source = &**connections
            .source
            .insert(self.connections.open_source_repository().await?);

        info!(phase = %RunPhase::SourceFetch, "fetching source entries");
        let entries = source.fetch_entries().await?;

        info!(phase = %RunPhase::ValidateLoop, entries = entries.len(), "validating entries");
        let pipeline = ForecastPipeline::new(self.forecast.as_ref(), store, &self.settings)
            .with_run_date(run_date);
        info!(season = %pipeline.season(), "forecast season");
        Ok(pipeline.run(&entries).await)
    }

    async fn deliver_report(&self, report: &BatchReport) -> Result<(), RunError> {
        info!(
            phase = %RunPhase::Report,
            persisted = report.success_responses.len(),
            failed = report.failed_responses.len(),
            "sending report"
        );
        let html = render_report_html(report, Utc::now().year())?;
        self.notifier.send(&Notification::report(html)).await?;
        Ok(())
    }

    /// Sends the plain failure notice. Returns the error the run ends with.
    async fn deliver_failure(&self, err: RunError) -> RunError {
        error!(phase = %RunPhase::Report, error = %err, "batch run failed");
        let notification = Notification::failure(failure_body(&err.to_string()));
        match self.notifier.send(&notification).await {
            Ok(()) => err,
            Err(notify_err) => {
                error!(error = %notify_err, "failure notification could not be sent");
                RunError::Notification(notify_err)
            }
        }
    }
}

pub async fn run_once_from_env() -> Result<RunSummary> {
    let config = BatchConfig::from_env()?;
    let runner = BatchRunner::from_config(&config).await?;
    Ok(runner.run_once().await?)
}

pub async fn build_scheduler(runner: Arc<BatchRunner>, cron: &str) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let runner = runner.clone();
        Box::pin(async move {
            match runner.run_once().await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    persisted = summary.persisted,
                    failed = summary.failed,
                    "scheduled run complete"
                ),
                Err(err) => error!(error = %err, "scheduled run failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

/// Runs the batch on `FPR_SCHEDULE_CRON` until Ctrl-C.
pub async fn run_scheduled_from_env() -> Result<()> {
    let config = BatchConfig::from_env()?;
    let runner = Arc::new(BatchRunner::from_config(&config).await?);
    let mut sched = build_scheduler(runner, &config.schedule_cron).await?;
    sched.start().await.context("starting scheduler")?;
    info!(cron = %config.schedule_cron, "scheduler started");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down scheduler");
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}
