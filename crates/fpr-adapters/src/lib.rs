//! Adapters for the services the reconciler talks to: the prediction
//! endpoint and the report mailer.

pub mod forecast;
pub mod notify;

pub use forecast::{
    normalize_nan_tokens, parse_forecast_body, ForecastClient, ForecastRequestError, HttpClientConfig,
    HttpForecastClient,
};
pub use notify::{
    LogNotifier, Notification, NotificationBody, NotificationError, Notifier, SesConfig, SesNotifier,
};

pub const CRATE_NAME: &str = "fpr-adapters";
