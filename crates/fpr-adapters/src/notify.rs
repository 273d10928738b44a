//! Report delivery.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sesv2::config::Region;
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};
use aws_sdk_sesv2::Client;
use thiserror::Error;
use tracing::{info, warn};

pub const SUCCESS_SUBJECT: &str = "Forecast projections processed";
pub const FAILURE_SUBJECT: &str = "Forecast projection run failed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationBody {
    Html(String),
    Text(String),
}

impl NotificationBody {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationBody::Html(s) | NotificationBody::Text(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: NotificationBody,
    pub success: bool,
}

impl Notification {
    pub fn report(html: String) -> Self {
        Self {
            subject: SUCCESS_SUBJECT.to_string(),
            body: NotificationBody::Html(html),
            success: true,
        }
    }

    pub fn failure(text: String) -> Self {
        Self {
            subject: FAILURE_SUBJECT.to_string(),
            body: NotificationBody::Text(text),
            success: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification has no recipients")]
    NoRecipients,
    #[error("building email: {0}")]
    Build(String),
    #[error("sending email: {0}")]
    Send(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone)]
pub struct SesConfig {
    pub region: String,
    pub from_address: String,
    pub to_addresses: Vec<String>,
}

/// Sends notifications through Amazon SES.
#[derive(Clone)]
pub struct SesNotifier {
    client: Client,
    from_address: String,
    to_addresses: Vec<String>,
}

impl SesNotifier {
    pub async fn new(config: SesConfig) -> Result<Self, NotificationError> {
        if config.to_addresses.is_empty() {
            return Err(NotificationError::NoRecipients);
        }
        let shared_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;
        Ok(Self {
            client: Client::new(&shared_config),
            from_address: config.from_address,
            to_addresses: config.to_addresses,
        })
    }
}

fn utf8_content(data: &str) -> Result<Content, NotificationError> {
    Content::builder()
        .data(data)
        .charset("UTF-8")
        .build()
        .map_err(|err| NotificationError::Build(err.to_string()))
}

#[async_trait]
impl Notifier for SesNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let body = match &notification.body {
            NotificationBody::Html(html) => Body::builder().html(utf8_content(html)?).build(),
            NotificationBody::Text(text) => Body::builder().text(utf8_content(text)?).build(),
        };
        let message = Message::builder()
            .subject(utf8_content(&notification.subject)?)
            .body(body)
            .build();

        self.client
            .send_email()
            .from_email_address(&self.from_address)
            .destination(
                Destination::builder()
                    .set_to_addresses(Some(self.to_addresses.clone()))
                    .build(),
            )
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .map_err(|err| NotificationError::Send(err.to_string()))?;

        info!(
            recipients = self.to_addresses.len(),
            success = notification.success,
            "notification email sent"
        );
        Ok(())
    }
}

/// Writes notifications to the log instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        if notification.success {
            info!(
                subject = %notification.subject,
                bytes = notification.body.as_str().len(),
                "notification (dry run)"
            );
        } else {
            warn!(
                subject = %notification.subject,
                body = %notification.body.as_str(),
                "failure notification (dry run)"
            );
        }
        Ok(())
    }
}
