//! Credential blobs stored in the secret store, in the two shapes the
//! databases use.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgConnectOptions;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 5432;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    /// `{ user|username, password, server|url, name_database|database, port? }`
    Relational,
    /// `{ userName, password, host, port, serviceName }`
    ServiceName,
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relational" => Ok(Dialect::Relational),
            "service-name" | "service_name" | "servicename" => Ok(Dialect::ServiceName),
            other => Err(format!("unknown database dialect {other:?}")),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Relational => f.write_str("relational"),
            Dialect::ServiceName => f.write_str("service-name"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("secret is not valid {dialect} credentials JSON: {source}")]
    Json {
        dialect: Dialect,
        #[source]
        source: serde_json::Error,
    },
    #[error("credential field {0} is missing")]
    MissingField(&'static str),
    #[error("invalid port {0:?}")]
    Port(String),
}

#[derive(Deserialize)]
struct RelationalSecret {
    user: Option<String>,
    username: Option<String>,
    password: String,
    server: Option<String>,
    url: Option<String>,
    name_database: Option<String>,
    database: Option<String>,
    port: Option<JsonValue>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceNameSecret {
    user_name: String,
    password: String,
    host: String,
    port: JsonValue,
    service_name: String,
}

/// Connection parameters resolved from a secret.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .finish()
    }
}

impl DatabaseCredentials {
    pub fn parse(dialect: Dialect, secret: &str) -> Result<Self, CredentialsError> {
        match dialect {
            Dialect::Relational => {
                let raw: RelationalSecret = serde_json::from_str(secret)
                    .map_err(|source| CredentialsError::Json { dialect, source })?;
                Self::from_relational(raw)
            }
            Dialect::ServiceName => {
                let raw: ServiceNameSecret = serde_json::from_str(secret)
                    .map_err(|source| CredentialsError::Json { dialect, source })?;
                Ok(Self {
                    username: raw.user_name,
                    password: raw.password,
                    host: raw.host,
                    port: parse_port(&raw.port)?,
                    database: raw.service_name,
                })
            }
        }
    }

    fn from_relational(raw: RelationalSecret) -> Result<Self, CredentialsError> {
        let username =
            first_present(raw.user, raw.username).ok_or(CredentialsError::MissingField("user"))?;
        let server =
            first_present(raw.server, raw.url).ok_or(CredentialsError::MissingField("server"))?;
        let database = first_present(raw.name_database, raw.database)
            .ok_or(CredentialsError::MissingField("name_database"))?;

        let (host, embedded_port) = split_host_port(&server)?;
        let port = match (&raw.port, embedded_port) {
            (Some(value), _) => parse_port(value)?,
            (None, Some(port)) => port,
            (None, None) => DEFAULT_PORT,
        };

        Ok(Self {
            username,
            password: raw.password,
            host,
            port,
            database,
        })
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
            .database(&self.database)
    }
}

fn first_present(primary: Option<String>, fallback: Option<String>) -> Option<String> {
    primary
        .filter(|v| !v.trim().is_empty())
        .or_else(|| fallback.filter(|v| !v.trim().is_empty()))
}

fn split_host_port(server: &str) -> Result<(String, Option<u16>), CredentialsError> {
    let server = server.trim();
    match server.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|_| CredentialsError::Port(port.to_string()))?;
            Ok((host.to_string(), Some(port)))
        }
        _ => Ok((server.to_string(), None)),
    }
}

fn parse_port(value: &JsonValue) -> Result<u16, CredentialsError> {
    match value {
        JsonValue::Number(n) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| CredentialsError::Port(n.to_string())),
        JsonValue::String(s) => s
            .trim()
            .parse::<u16>()
            .map_err(|_| CredentialsError::Port(s.clone())),
        other => Err(CredentialsError::Port(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relational_prefers_primary_keys() {
        let creds = DatabaseCredentials::parse(
            Dialect::Relational,
            r#"{"user":"svc","username":"ignored","password":"pw","server":"db.internal","name_database":"ia_projection"}"#,
        )
        .expect("parse");
        assert_eq!(creds.username, "svc");
        assert_eq!(creds.host, "db.internal");
        assert_eq!(creds.port, DEFAULT_PORT);
        assert_eq!(creds.database, "ia_projection");
    }

    #[test]
    fn relational_falls_back_to_alternate_keys() {
        let creds = DatabaseCredentials::parse(
            Dialect::Relational,
            r#"{"username":"svc","password":"pw","url":"db.internal:6543","database":"trazabilidad"}"#,
        )
        .expect("parse");
        assert_eq!(creds.username, "svc");
        assert_eq!(creds.host, "db.internal");
        assert_eq!(creds.port, 6543);
        assert_eq!(creds.database, "trazabilidad");
    }

    #[test]
    fn relational_missing_server_is_an_error() {
        let err = DatabaseCredentials::parse(
            Dialect::Relational,
            r#"{"user":"svc","password":"pw","database":"x"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CredentialsError::MissingField("server")));
    }

    #[test]
    fn service_name_shape_accepts_string_port() {
        let creds = DatabaseCredentials::parse(
            Dialect::ServiceName,
            r#"{"userName":"famous","password":"pw","host":"10.0.0.4","port":"1521","serviceName":"ORCL"}"#,
        )
        .expect("parse");
        assert_eq!(creds.username, "famous");
        assert_eq!(creds.port, 1521);
        assert_eq!(creds.database, "ORCL");
    }

    #[test]
    fn debug_output_redacts_password() {
        let creds = DatabaseCredentials::parse(
            Dialect::ServiceName,
            r#"{"userName":"famous","password":"hunter2","host":"h","port":1,"serviceName":"s"}"#,
        )
        .expect("parse");
        assert!(!format!("{creds:?}").contains("hunter2"));
    }

    #[test]
    fn dialect_from_str() {
        assert_eq!("Relational".parse::<Dialect>(), Ok(Dialect::Relational));
        assert_eq!("service-name".parse::<Dialect>(), Ok(Dialect::ServiceName));
        assert!("oracle".parse::<Dialect>().is_err());
    }
}
