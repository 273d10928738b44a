use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate};
use fpr_storage::{DatabaseTarget, Dialect, PoolSettings, SqlScripts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretsBackend {
    Aws,
    Env,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierBackend {
    Ses,
    Log,
}

/// What every forecast request carries besides the entry itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForecastSettings {
    pub endpoint: String,
    pub path: String,
    /// Fixed season label; `None` derives it from each run's date.
    pub season: Option<String>,
    pub http_timeout_secs: u64,
    pub user_agent: String,
}

impl ForecastSettings {
    pub fn season_on(&self, run_date: NaiveDate) -> String {
        self.season.clone().unwrap_or_else(|| season_for(run_date))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailSettings {
    pub backend: NotifierBackend,
    pub from_address: String,
    pub to_addresses: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub aws_region: String,
    pub secrets_backend: SecretsBackend,
    pub source_db: DatabaseTarget,
    pub projection_db: DatabaseTarget,
    pub pool: PoolSettings,
    pub scripts: SqlScripts,
    pub forecast: ForecastSettings,
    pub email: EmailSettings,
    pub schedule_cron: String,
}

impl BatchConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let number = |key: &str, default: u64| -> Result<u64> {
            match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
                Some(v) => v.parse().with_context(|| format!("{key} must be a number, got {v:?}")),
                None => Ok(default),
            }
        };

        let secrets_backend = match var("FPR_SECRETS_BACKEND", "aws").to_ascii_lowercase().as_str() {
            "aws" => SecretsBackend::Aws,
            "env" => SecretsBackend::Env,
            other => bail!("FPR_SECRETS_BACKEND must be aws or env, got {other:?}"),
        };

        let dialect = |key: &str| -> Result<Dialect> {
            var(key, "relational")
                .parse::<Dialect>()
                .map_err(|err| anyhow::anyhow!("{key}: {err}"))
        };
        let source_db = DatabaseTarget {
            label: "source".to_string(),
            secret_name: var("FPR_SOURCE_SECRET", "fk_database_credentials"),
            dialect: dialect("FPR_SOURCE_DIALECT")?,
        };
        let projection_db = DatabaseTarget {
            label: "projection".to_string(),
            secret_name: var("FPR_PROJECTION_SECRET", "aws_database_credentials"),
            dialect: dialect("FPR_PROJECTION_DIALECT")?,
        };

        let pool = PoolSettings {
            max_connections: u32::try_from(number("FPR_DB_MAX_CONNECTIONS", 3)?)
                .context("FPR_DB_MAX_CONNECTIONS is out of range")?,
            acquire_timeout: Duration::from_secs(number("FPR_DB_TIMEOUT_SECS", 60)?),
        };

        let scripts = match lookup("FPR_SQL_SCRIPTS").filter(|v| !v.trim().is_empty()) {
            Some(path) => SqlScripts::from_yaml_file(&PathBuf::from(path.trim()))?,
            None => SqlScripts::default(),
        };

        let forecast = ForecastSettings {
            endpoint: var("FPR_FORECAST_URL", "http://localhost:3000/forecast"),
            path: var(
                "FPR_FORECAST_PATH",
                "s3://data-forecast-model/csv/proyeccion-vs-real.csv",
            ),
            season: lookup("FPR_SEASON")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            http_timeout_secs: number("FPR_HTTP_TIMEOUT_SECS", 60)?,
            user_agent: var("FPR_USER_AGENT", "fpr-bot/0.1"),
        };

        let backend = match var("FPR_NOTIFIER", "ses").to_ascii_lowercase().as_str() {
            "ses" => NotifierBackend::Ses,
            "log" => NotifierBackend::Log,
            other => bail!("FPR_NOTIFIER must be ses or log, got {other:?}"),
        };
        let to_addresses = var("FPR_EMAIL_TO", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        if backend == NotifierBackend::Ses && to_addresses.is_empty() {
            bail!("FPR_EMAIL_TO must list at least one recipient when FPR_NOTIFIER=ses");
        }
        let email = EmailSettings {
            backend,
            from_address: var("FPR_EMAIL_FROM", "projections@localhost"),
            to_addresses,
        };

        Ok(Self {
            aws_region: var("FPR_AWS_REGION", "us-east-1"),
            secrets_backend,
            source_db,
            projection_db,
            pool,
            scripts,
            forecast,
            email,
            schedule_cron: var("FPR_SCHEDULE_CRON", "0 0 6 * * Mon"),
        })
    }
}

/// Harvest season label for a date; seasons roll over on July 1st.
pub fn season_for(date: NaiveDate) -> String {
    let year = date.year();
    if date.month() >= 7 {
        format!("{}-{}", year, year + 1)
    } else {
        format!("{}-{}", year - 1, year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn season_rolls_over_in_july() {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        assert_eq!(season_for(d(2023, 9, 7)), "2023-2024");
        assert_eq!(season_for(d(2024, 3, 1)), "2023-2024");
        assert_eq!(season_for(d(2024, 7, 1)), "2024-2025");
    }

    #[test]
    fn unset_season_follows_the_run_date() {
        let config = BatchConfig::from_lookup(lookup(&[("FPR_NOTIFIER", "log")])).expect("config");
        let june = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        let july = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        assert_eq!(config.forecast.season_on(june), "2024-2025");
        assert_eq!(config.forecast.season_on(july), "2025-2026");
    }

    #[test]
    fn defaults_apply_for_log_notifier() {
        let config = BatchConfig::from_lookup(lookup(&[("FPR_NOTIFIER", "log")])).expect("config");
        assert_eq!(config.aws_region, "us-east-1");
        assert_eq!(config.secrets_backend, SecretsBackend::Aws);
        assert_eq!(config.source_db.secret_name, "fk_database_credentials");
        assert_eq!(config.projection_db.secret_name, "aws_database_credentials");
        assert_eq!(config.source_db.dialect, Dialect::Relational);
        assert_eq!(config.pool.max_connections, 3);
        assert_eq!(config.forecast.http_timeout_secs, 60);
        assert_eq!(config.forecast.season, None);
        assert_eq!(config.email.backend, NotifierBackend::Log);
        assert!(config.email.to_addresses.is_empty());
        assert_eq!(config.schedule_cron, "0 0 6 * * Mon");
        assert_eq!(config.scripts, SqlScripts::default());
    }

    #[test]
    fn ses_requires_recipients() {
        let err = BatchConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("FPR_EMAIL_TO"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = BatchConfig::from_lookup(lookup(&[
            ("FPR_EMAIL_TO", "ops@example.com, planning@example.com,"),
            ("FPR_SECRETS_BACKEND", "env"),
            ("FPR_SOURCE_DIALECT", "service-name"),
            ("FPR_SEASON", "2024-2025"),
            ("FPR_HTTP_TIMEOUT_SECS", "15"),
        ]))
        .expect("config");
        assert_eq!(
            config.email.to_addresses,
            vec!["ops@example.com".to_string(), "planning@example.com".to_string()]
        );
        assert_eq!(config.secrets_backend, SecretsBackend::Env);
        assert_eq!(config.source_db.dialect, Dialect::ServiceName);
        assert_eq!(config.forecast.season.as_deref(), Some("2024-2025"));
        let july = NaiveDate::from_ymd_opt(2025, 7, 2).unwrap();
        assert_eq!(config.forecast.season_on(july), "2024-2025");
        assert_eq!(config.forecast.http_timeout_secs, 15);
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = BatchConfig::from_lookup(lookup(&[
            ("FPR_NOTIFIER", "log"),
            ("FPR_DB_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("FPR_DB_TIMEOUT_SECS"));
    }
}
