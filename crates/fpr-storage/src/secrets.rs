//! Named credential lookup.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_secretsmanager::config::Region;
use aws_sdk_secretsmanager::Client;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret {name} lookup failed: {message}")]
    Lookup { name: String, message: String },
    #[error("secret {0} has no string value")]
    Empty(String),
    #[error("environment variable {var} for secret {name} is not set")]
    MissingEnv { name: String, var: String },
}

#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn secret_string(&self, name: &str) -> Result<String, SecretError>;
}

/// AWS Secrets Manager backed lookup.
#[derive(Clone)]
pub struct AwsSecretsProvider {
    client: Client,
}

impl AwsSecretsProvider {
    pub async fn new(region: &str) -> Self {
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: Client::new(&shared_config),
        }
    }
}

#[async_trait]
impl SecretProvider for AwsSecretsProvider {
    async fn secret_string(&self, name: &str) -> Result<String, SecretError> {
        debug!(secret = name, "fetching secret from secrets manager");
        let output = self
            .client
            .get_secret_value()
            .secret_id(name)
            .send()
            .await
            .map_err(|err| SecretError::Lookup {
                name: name.to_string(),
                message: err.to_string(),
            })?;

        output
            .secret_string()
            .map(ToString::to_string)
            .ok_or_else(|| SecretError::Empty(name.to_string()))
    }
}

/// Reads `FPR_SECRET_<NAME>` from the environment; used for local runs.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretProvider;

impl EnvSecretProvider {
    pub fn env_key(name: &str) -> String {
        let suffix = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect::<String>();
        format!("FPR_SECRET_{suffix}")
    }
}

#[async_trait]
impl SecretProvider for EnvSecretProvider {
    async fn secret_string(&self, name: &str) -> Result<String, SecretError> {
        let var = Self::env_key(name);
        std::env::var(&var).map_err(|_| SecretError::MissingEnv {
            name: name.to_string(),
            var,
        })
    }
}
