//! In-memory stand-ins for the databases, the prediction service and the mailer.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fpr_adapters::{ForecastClient, ForecastRequestError, Notification, NotificationError, Notifier};
use fpr_core::{
    ForecastInput, ForecastOutput, ForecastRequest, ForecastResult, ProjectionDetail, ProjectionKey,
    SourceEntry,
};
use fpr_storage::{
    ConnectionError, ConnectionProvider, ProjectionStore, SecretError, SourceError, SourceRepository,
    StoreError,
};
use fpr_sync::ForecastSettings;

pub fn settings() -> ForecastSettings {
    ForecastSettings {
        endpoint: "http://forecast.test/predict".into(),
        path: "s3://bucket/curve.csv".into(),
        season: Some("2023-2024".into()),
        http_timeout_secs: 5,
        user_agent: "fpr-test".into(),
    }
}

pub fn entry(code: &str, fruit: &str) -> SourceEntry {
    SourceEntry::new(code, fruit)
}

/// Forecast with `k` future dates starting one week after `last_date`.
pub fn forecast(code: &str, fruit: &str, last_date: &str, k: usize) -> ForecastResult {
    ForecastResult {
        input: ForecastInput {
            provider_code: code.into(),
            fruit_name: fruit.into(),
        },
        output: ForecastOutput {
            last_date: last_date.into(),
            future_dates: (1..=k).map(|w| format!("{last_date}+{w}w")).collect(),
            human_predictions: (0..k).map(|i| Some(10.0 + i as f64)).collect(),
            model_predictions: (0..k).map(|i| Some(9.5 + i as f64)).collect(),
        },
    }
}

#[derive(Debug, Clone)]
pub struct StoredProjection {
    pub id: i64,
    pub key: ProjectionKey,
}

#[derive(Debug, Default)]
pub struct DbState {
    pub projections: Vec<StoredProjection>,
    pub details: Vec<ProjectionDetail>,
    pub next_id: i64,
}

/// Projection database shared across runs so a second run sees the first one's rows.
#[derive(Debug, Default)]
pub struct ProjectionDb {
    pub state: Mutex<DbState>,
    /// Producer codes whose parent insert fails.
    pub failing_producers: Mutex<HashSet<String>>,
    /// When set, parent inserts for other fruits find no `fruits` row.
    pub known_fruits: Mutex<Option<HashSet<String>>>,
    /// Lookups and parent inserts fail once this many projections exist.
    pub outage_after: Mutex<Option<usize>>,
    pub closes: AtomicUsize,
}

impl ProjectionDb {
    pub fn projections(&self) -> Vec<StoredProjection> {
        self.state.lock().unwrap().projections.clone()
    }

    pub fn details(&self) -> Vec<ProjectionDetail> {
        self.state.lock().unwrap().details.clone()
    }

    pub fn fail_inserts_for(&self, producer: &str) {
        self.failing_producers.lock().unwrap().insert(producer.to_string());
    }

    pub fn register_fruits(&self, fruits: &[&str]) {
        *self.known_fruits.lock().unwrap() = Some(fruits.iter().map(|f| f.to_string()).collect());
    }

    pub fn go_down_after(&self, projections: usize) {
        *self.outage_after.lock().unwrap() = Some(projections);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        let limit = *self.outage_after.lock().unwrap();
        match limit {
            Some(n) if self.state.lock().unwrap().projections.len() >= n => Err(StoreError::Lookup(
                sqlx::Error::Protocol("connection reset by test".into()),
            )),
            _ => Ok(()),
        }
    }
}

pub struct FakeProjectionStore {
    pub db: Arc<ProjectionDb>,
}

#[async_trait]
impl ProjectionStore for FakeProjectionStore {
    async fn find_projection(&self, key: &ProjectionKey) -> Result<Option<i64>, StoreError> {
        self.db.check_available()?;
        let state = self.db.state.lock().unwrap();
        Ok(state.projections.iter().find(|p| &p.key == key).map(|p| p.id))
    }

    async fn insert_projection(&self, key: &ProjectionKey) -> Result<i64, StoreError> {
        self.db.check_available()?;
        if let Some(known) = self.db.known_fruits.lock().unwrap().as_ref() {
            if !known.contains(&key.fruit_name) {
                return Err(StoreError::UnknownFruit(key.fruit_name.clone()));
            }
        }
        if self.db.failing_producers.lock().unwrap().contains(&key.producer_code) {
            return Err(StoreError::Insert(sqlx::Error::Protocol(
                "insert rejected by test".into(),
            )));
        }
        let mut state = self.db.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.projections.push(StoredProjection {
            id,
            key: key.clone(),
        });
        Ok(id)
    }

    async fn insert_detail(&self, detail: &ProjectionDetail) -> Result<(), StoreError> {
        self.db.state.lock().unwrap().details.push(detail.clone());
        Ok(())
    }

    async fn close(&self) {
        self.db.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub enum SourceBehavior {
    Entries(Vec<SourceEntry>),
    Empty,
    QueryFails,
}

pub struct FakeSourceRepository {
    behavior: SourceBehavior,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl SourceRepository for FakeSourceRepository {
    async fn fetch_entries(&self) -> Result<Vec<SourceEntry>, SourceError> {
        match &self.behavior {
            SourceBehavior::Entries(entries) if !entries.is_empty() => Ok(entries.clone()),
            SourceBehavior::Entries(_) | SourceBehavior::Empty => Err(SourceError::NoData),
            SourceBehavior::QueryFails => Err(SourceError::Query(sqlx::Error::Protocol(
                "source query rejected by test".into(),
            ))),
        }
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeConnections {
    pub db: Arc<ProjectionDb>,
    pub source: SourceBehavior,
    pub source_closes: Arc<AtomicUsize>,
    pub fail_projection_connect: bool,
    pub fail_source_connect: bool,
}

impl FakeConnections {
    pub fn new(db: Arc<ProjectionDb>, source: SourceBehavior) -> Self {
        Self {
            db,
            source,
            source_closes: Arc::new(AtomicUsize::new(0)),
            fail_projection_connect: false,
            fail_source_connect: false,
        }
    }

    pub fn projection_closes(&self) -> usize {
        self.db.closes.load(Ordering::SeqCst)
    }

    pub fn source_closes(&self) -> usize {
        self.source_closes.load(Ordering::SeqCst)
    }
}

fn refused(db: &str) -> ConnectionError {
    ConnectionError::Secret {
        db: db.to_string(),
        source: SecretError::Empty(format!("{db}_database_credentials")),
    }
}

#[async_trait]
impl ConnectionProvider for FakeConnections {
    async fn open_projection_store(&self) -> Result<Box<dyn ProjectionStore>, ConnectionError> {
        if self.fail_projection_connect {
            return Err(refused("projection"));
        }
        Ok(Box::new(FakeProjectionStore {
            db: self.db.clone(),
        }))
    }

    async fn open_source_repository(&self) -> Result<Box<dyn SourceRepository>, ConnectionError> {
        if self.fail_source_connect {
            return Err(refused("source"));
        }
        Ok(Box::new(FakeSourceRepository {
            behavior: self.source.clone(),
            closes: self.source_closes.clone(),
        }))
    }
}

/// Replies keyed by provider code; unknown codes get an HTTP 500.
#[derive(Default)]
pub struct ScriptedForecast {
    pub replies: HashMap<String, ForecastResult>,
    pub calls: Mutex<Vec<ForecastRequest>>,
}

impl ScriptedForecast {
    pub fn with(mut self, result: ForecastResult) -> Self {
        self.replies.insert(result.input.provider_code.clone(), result);
        self
    }

    pub fn calls(&self) -> Vec<ForecastRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ForecastClient for ScriptedForecast {
    async fn forecast(&self, request: &ForecastRequest) -> Result<ForecastResult, ForecastRequestError> {
        self.calls.lock().unwrap().push(request.clone());
        self.replies
            .get(&request.provider_code)
            .cloned()
            .ok_or_else(|| ForecastRequestError::HttpStatus {
                status: 500,
                body: "model unavailable".into(),
            })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
    pub fail_reports: bool,
    pub fail_everything: bool,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(notification.clone());
        if self.fail_everything || (self.fail_reports && notification.success) {
            return Err(NotificationError::Send("mailer offline".into()));
        }
        Ok(())
    }
}
