//! Database access for the reconciler: secret-backed connections, the source
//! entry query and the projection store.

pub mod credentials;
pub mod secrets;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use fpr_core::{ProjectionDetail, ProjectionKey, SourceEntry};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::{debug, info};

pub use credentials::{CredentialsError, DatabaseCredentials, Dialect};
pub use secrets::{AwsSecretsProvider, EnvSecretProvider, SecretError, SecretProvider};

pub const CRATE_NAME: &str = "fpr-storage";

/// SQL text used by the reconciler. Postgres placeholders (`$1`..).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SqlScripts {
    /// Must return `producer_orchard` and `fruit` text columns.
    pub source_entries: String,
    /// `$1 date_projection, $2 pr_producer, $3 id_orchard, $4 fruit_name` -> `id`
    pub exist_projection: String,
    /// `$1 date, $2 prod, $3 fruit, $4 id_orchard` -> `id`. Must return no
    /// row for a fruit missing from `fruits`.
    pub insert_projection: String,
    /// `$1 id_projection, $2 future_date, $3 human, $4 ia_model`
    pub insert_projection_detail: String,
}

impl Default for SqlScripts {
    fn default() -> Self {
        Self {
            source_entries: r#"
            SELECT DISTINCT
                   prod.card_code || '-' || CAST(orchard.sap_id AS TEXT) AS producer_orchard,
                   CASE
                       WHEN pres.organic = 'Y' THEN UPPER(crop.description || ' ORG')
                       ELSE UPPER(crop.description)
                   END AS fruit
              FROM reception rec
              JOIN producer prod ON prod.id = rec.producer_id
              JOIN orchard ON orchard.producer_id = prod.id
              JOIN presentation pres ON pres.id = rec.presentation_id
              JOIN crop ON crop.id = pres.crop_id
             WHERE EXTRACT(YEAR FROM rec.received_at) = EXTRACT(YEAR FROM CURRENT_DATE)
             ORDER BY producer_orchard, fruit
            "#
            .to_string(),
            exist_projection: r#"
            SELECT p.id
              FROM projection p
              JOIN fruits f ON f.id = p.id_fruit
             WHERE p.date_projection = $1
               AND p.pr_producer = $2
               AND p.id_orchard = $3
               AND f.fruit_name = $4
             LIMIT 1
            "#
            .to_string(),
            insert_projection: r#"
            INSERT INTO projection (date_projection, pr_producer, id_fruit, id_orchard)
            SELECT $1, $2, f.id, $4
              FROM fruits f
             WHERE f.fruit_name = $3
            RETURNING id
            "#
            .to_string(),
            insert_projection_detail: r#"
            INSERT INTO projection_detail (id_projection, future_date, human, ia_model)
            VALUES ($1, $2, $3, $4)
            "#
            .to_string(),
        }
    }
}

impl SqlScripts {
    /// Loads overrides from YAML; keys left out keep their defaults.
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }
}

/// Which secret to resolve for a database, and how to read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTarget {
    pub label: String,
    pub secret_name: String,
    pub dialect: Dialect,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 3,
            acquire_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("resolving secret for {db} database: {source}")]
    Secret {
        db: String,
        #[source]
        source: SecretError,
    },
    #[error("reading credentials for {db} database: {source}")]
    Credentials {
        db: String,
        #[source]
        source: CredentialsError,
    },
    #[error("connecting to {db} database: {source}")]
    Connect {
        db: String,
        #[source]
        source: sqlx::Error,
    },
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no producers with receptions found")]
    NoData,
    #[error("source query failed: {0}")]
    Query(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("projection lookup failed: {0}")]
    Lookup(#[source] sqlx::Error),
    #[error("insert failed: {0}")]
    Insert(#[source] sqlx::Error),
    #[error("insert failed: fruit {0:?} is not registered")]
    UnknownFruit(String),
}

#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Full current list of entries; an empty list is `SourceError::NoData`.
    async fn fetch_entries(&self) -> Result<Vec<SourceEntry>, SourceError>;
    async fn close(&self);
}

#[async_trait]
pub trait ProjectionStore: Send + Sync {
    async fn find_projection(&self, key: &ProjectionKey) -> Result<Option<i64>, StoreError>;
    /// Returns the generated projection id.
    async fn insert_projection(&self, key: &ProjectionKey) -> Result<i64, StoreError>;
    async fn insert_detail(&self, detail: &ProjectionDetail) -> Result<(), StoreError>;
    async fn close(&self);
}

#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn open_projection_store(&self) -> Result<Box<dyn ProjectionStore>, ConnectionError>;
    async fn open_source_repository(&self) -> Result<Box<dyn SourceRepository>, ConnectionError>;
}

pub struct PgSourceRepository {
    pool: PgPool,
    query: String,
}

impl PgSourceRepository {
    pub fn new(pool: PgPool, scripts: &SqlScripts) -> Self {
        Self {
            pool,
            query: scripts.source_entries.clone(),
        }
    }
}

#[async_trait]
impl SourceRepository for PgSourceRepository {
    async fn fetch_entries(&self) -> Result<Vec<SourceEntry>, SourceError> {
        let rows = sqlx::query(&self.query).fetch_all(&self.pool).await?;
        if rows.is_empty() {
            return Err(SourceError::NoData);
        }

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(SourceEntry {
                producer_orchard_code: row.try_get("producer_orchard")?,
                fruit_name: row.try_get("fruit")?,
            });
        }
        info!(entries = out.len(), "fetched source entries");
        Ok(out)
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("source pool closed");
    }
}

pub struct PgProjectionStore {
    pool: PgPool,
    scripts: SqlScripts,
}

impl PgProjectionStore {
    pub fn new(pool: PgPool, scripts: SqlScripts) -> Self {
        Self { pool, scripts }
    }
}

#[async_trait]
impl ProjectionStore for PgProjectionStore {
    async fn find_projection(&self, key: &ProjectionKey) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query(&self.scripts.exist_projection)
            .bind(&key.date_projection)
            .bind(&key.producer_code)
            .bind(key.orchard_id)
            .bind(&key.fruit_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Lookup)?;

        row.map(|r| r.try_get::<i64, _>("id"))
            .transpose()
            .map_err(StoreError::Lookup)
    }

    async fn insert_projection(&self, key: &ProjectionKey) -> Result<i64, StoreError> {
        let row = sqlx::query(&self.scripts.insert_projection)
            .bind(&key.date_projection)
            .bind(&key.producer_code)
            .bind(&key.fruit_name)
            .bind(key.orchard_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => StoreError::UnknownFruit(key.fruit_name.clone()),
                other => StoreError::Insert(other),
            })?;
        row.try_get::<i64, _>("id").map_err(StoreError::Insert)
    }

    async fn insert_detail(&self, detail: &ProjectionDetail) -> Result<(), StoreError> {
        sqlx::query(&self.scripts.insert_projection_detail)
            .bind(detail.projection_id)
            .bind(&detail.future_date)
            .bind(detail.human_value)
            .bind(detail.model_value)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Insert)?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("projection pool closed");
    }
}

/// Opens postgres pools from credentials held in a secret store.
pub struct SecretConnectionProvider {
    secrets: Arc<dyn SecretProvider>,
    source: DatabaseTarget,
    projections: DatabaseTarget,
    scripts: SqlScripts,
    pool: PoolSettings,
}

impl SecretConnectionProvider {
    pub fn new(
        secrets: Arc<dyn SecretProvider>,
        source: DatabaseTarget,
        projections: DatabaseTarget,
        scripts: SqlScripts,
        pool: PoolSettings,
    ) -> Self {
        Self {
            secrets,
            source,
            projections,
            scripts,
            pool,
        }
    }

    async fn connect(&self, target: &DatabaseTarget) -> Result<PgPool, ConnectionError> {
        let secret = self
            .secrets
            .secret_string(&target.secret_name)
            .await
            .map_err(|source| ConnectionError::Secret {
                db: target.label.clone(),
                source,
            })?;
        let credentials = DatabaseCredentials::parse(target.dialect, &secret).map_err(|source| {
            ConnectionError::Credentials {
                db: target.label.clone(),
                source,
            }
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(self.pool.max_connections.max(1))
            .acquire_timeout(self.pool.acquire_timeout)
            .connect_with(credentials.connect_options())
            .await
            .map_err(|source| ConnectionError::Connect {
                db: target.label.clone(),
                source,
            })?;

        info!(
            db = %target.label,
            host = %credentials.host,
            database = %credentials.database,
            "database pool established"
        );
        Ok(pool)
    }
}

#[async_trait]
impl ConnectionProvider for SecretConnectionProvider {
    async fn open_projection_store(&self) -> Result<Box<dyn ProjectionStore>, ConnectionError> {
        let pool = self.connect(&self.projections).await?;
        Ok(Box::new(PgProjectionStore::new(pool, self.scripts.clone())))
    }

    async fn open_source_repository(&self) -> Result<Box<dyn SourceRepository>, ConnectionError> {
        let pool = self.connect(&self.source).await?;
        Ok(Box::new(PgSourceRepository::new(pool, &self.scripts)))
    }
}
