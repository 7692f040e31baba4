//! Process configuration, sourced from the environment.

use std::str::FromStr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::ConfigurationError;
use crate::receiver::config::{HandlerFailurePolicy, ReceiverConfig};
use crate::supervisor::SupervisorConfig;

pub const CONNECTION_STRING: &str = "QUEUE_CONNECTION_STRING";
pub const QUEUE_NAME: &str = "QUEUE_NAME";
pub const MAX_RESTARTS: &str = "QUEUE_MAX_RESTARTS";
pub const MAX_MESSAGES: &str = "QUEUE_MAX_MESSAGES";
pub const WAIT_TIME_SECONDS: &str = "QUEUE_WAIT_TIME_SECONDS";
pub const LOCK_DURATION_SECONDS: &str = "QUEUE_LOCK_DURATION_SECONDS";
pub const MAX_DELIVERY_ATTEMPTS: &str = "QUEUE_MAX_DELIVERY_ATTEMPTS";

/// Everything the consumer process needs to start.
///
/// `QUEUE_CONNECTION_STRING` and `QUEUE_NAME` are required and have no
/// defaults. The remaining keys tune the receiver and fall back to
/// [`ReceiverConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub connection_string: String,
    pub queue_name: String,
    pub max_restarts: Option<u32>,
    pub receiver: ReceiverConfig,
    pub max_delivery_attempts: Option<u32>,
}

impl AppConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        dotenvy::dotenv().ok();
        AppConfig::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigurationError> {
        let value = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &str| {
            value(key).ok_or_else(|| ConfigurationError::Missing {
                key: key.to_string(),
            })
        };

        let connection_string = required(CONNECTION_STRING)?;
        let queue_name = required(QUEUE_NAME)?;

        let defaults = ReceiverConfig::default();
        let receiver = ReceiverConfig {
            max_number_of_messages: parse::<i32>(MAX_MESSAGES, value(MAX_MESSAGES))?
                .unwrap_or(defaults.max_number_of_messages),
            wait_time: parse::<u64>(WAIT_TIME_SECONDS, value(WAIT_TIME_SECONDS))?
                .map(Duration::from_secs)
                .unwrap_or(defaults.wait_time),
            lock_duration: parse::<u64>(LOCK_DURATION_SECONDS, value(LOCK_DURATION_SECONDS))?
                .map(Duration::from_secs)
                .or(defaults.lock_duration),
        };
        if !(1..=10).contains(&receiver.max_number_of_messages) {
            return Err(ConfigurationError::Invalid {
                key: MAX_MESSAGES.to_string(),
                message: "must be between 1 and 10".to_string(),
            });
        }

        Ok(AppConfig {
            connection_string,
            queue_name,
            max_restarts: parse(MAX_RESTARTS, value(MAX_RESTARTS))?,
            receiver,
            max_delivery_attempts: parse(MAX_DELIVERY_ATTEMPTS, value(MAX_DELIVERY_ATTEMPTS))?,
        })
    }

    pub fn supervisor_config(&self, cancellation: CancellationToken) -> SupervisorConfig {
        SupervisorConfig {
            max_restarts: self.max_restarts,
            receiver: self.receiver.clone(),
            handler_failure: HandlerFailurePolicy {
                max_delivery_attempts: self.max_delivery_attempts,
            },
            cancellation,
            ..SupervisorConfig::default()
        }
    }
}

fn parse<T>(key: &str, raw: Option<String>) -> Result<Option<T>, ConfigurationError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|raw| {
        raw.parse::<T>().map_err(|e| ConfigurationError::Invalid {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        })
    })
    .transpose()
}
