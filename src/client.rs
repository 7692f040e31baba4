use aws_config::Region;
use aws_sdk_sqs::config::{BehaviorVersion, SharedCredentialsProvider};

use crate::errors::ConfigurationError;

/// Parsed SQS connection string.
///
/// The string is a `;`-separated list of `Key=Value` pairs. Every key is
/// optional and matched case-insensitively:
///
/// - `Region` - the AWS region (e.g., "us-east-1")
/// - `Endpoint` - endpoint override, e.g. a LocalStack URL
/// - `AccessKeyId` / `SecretAccessKey` - explicit credentials, given together
/// - `DeadLetterQueue` - name of the queue that receives dead-lettered messages
///
/// Anything left unset falls back to the AWS environment
/// (`AWS_REGION`, `AWS_ACCESS_KEY_ID`, `AWS_PROFILE`, ...).
///
/// # Example
///
/// ```rust
/// use rs_queue_supervisor::client::SqsConnectionString;
///
/// let parsed = SqsConnectionString::parse("Region=eu-west-1;DeadLetterQueue=orders-dlq").unwrap();
/// assert_eq!(parsed.region.as_deref(), Some("eu-west-1"));
/// assert_eq!(parsed.dead_letter_queue.as_deref(), Some("orders-dlq"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqsConnectionString {
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub dead_letter_queue: Option<String>,
}

const CONNECTION_STRING_KEY: &str = "QUEUE_CONNECTION_STRING";

impl SqsConnectionString {
    pub fn parse(connection_string: &str) -> Result<Self, ConfigurationError> {
        let mut parsed = SqsConnectionString::default();

        for pair in connection_string.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(invalid(format!("expected Key=Value, got '{pair}'")));
            };
            let value = value.trim();
            if value.is_empty() {
                return Err(invalid(format!("empty value for '{}'", key.trim())));
            }

            let slot = match key.trim().to_ascii_lowercase().as_str() {
                "region" => &mut parsed.region,
                "endpoint" => &mut parsed.endpoint,
                "accesskeyid" => &mut parsed.access_key_id,
                "secretaccesskey" => &mut parsed.secret_access_key,
                "deadletterqueue" => &mut parsed.dead_letter_queue,
                other => return Err(invalid(format!("unknown key '{other}'"))),
            };
            *slot = Some(value.to_string());
        }

        if parsed.access_key_id.is_some() != parsed.secret_access_key.is_some() {
            return Err(invalid(
                "AccessKeyId and SecretAccessKey must be given together".to_string(),
            ));
        }

        Ok(parsed)
    }

    fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(id), Some(secret)) => Some((id.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

fn invalid(message: String) -> ConfigurationError {
    ConfigurationError::Invalid {
        key: CONNECTION_STRING_KEY.to_string(),
        message,
    }
}

/// Creates an AWS SQS client using credentials and configuration from the environment.
///
/// This function loads AWS configuration from environment variables such as:
/// - `AWS_ACCESS_KEY_ID`
/// - `AWS_SECRET_ACCESS_KEY`
/// - `AWS_REGION`
/// - `AWS_PROFILE`
pub async fn create_sqs_client_from_env() -> aws_sdk_sqs::Client {
    let config = aws_config::load_from_env().await;
    aws_sdk_sqs::Client::new(&config)
}

/// Creates an AWS SQS client with explicitly provided credentials and region.
///
/// # Arguments
///
/// * `access_key_id` - The AWS access key ID
/// * `secret_access_key` - The AWS secret access key
/// * `region` - The AWS region (e.g., "us-east-1", "eu-west-1")
/// * `endpoint` - Optional endpoint override
pub fn create_sqs_client_with_credentials(
    access_key_id: &str,
    secret_access_key: &str,
    region: &str,
    endpoint: Option<&str>,
) -> aws_sdk_sqs::Client {
    let credentials =
        aws_sdk_sqs::config::Credentials::new(access_key_id, secret_access_key, None, None, "connection-string");

    let shared_credentials = SharedCredentialsProvider::new(credentials);

    let mut builder = aws_sdk_sqs::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .credentials_provider(shared_credentials);
    if let Some(endpoint) = endpoint {
        builder = builder.endpoint_url(endpoint);
    }

    aws_sdk_sqs::Client::from_conf(builder.build())
}

/// Creates an AWS SQS client for a parsed connection string.
///
/// Explicit credentials need a region, either in the connection string or in
/// `AWS_REGION`.
pub async fn create_sqs_client(
    connection: &SqsConnectionString,
) -> Result<aws_sdk_sqs::Client, ConfigurationError> {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &connection.region {
        loader = loader.region(Region::new(region.clone()));
    }
    let sdk_config = loader.load().await;

    if let Some((id, secret)) = connection.credentials() {
        let region = sdk_config
            .region()
            .map(|r| r.to_string())
            .ok_or_else(|| invalid("a Region is required with explicit credentials".to_string()))?;
        return Ok(create_sqs_client_with_credentials(
            id,
            secret,
            &region,
            connection.endpoint.as_deref(),
        ));
    }

    let mut builder = aws_sdk_sqs::config::Builder::from(&sdk_config);
    if let Some(endpoint) = &connection.endpoint {
        builder = builder.endpoint_url(endpoint);
    }
    Ok(aws_sdk_sqs::Client::from_conf(builder.build()))
}
