use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Serialize;
use tracing::{debug, instrument};

use super::{Event, EventSink, SinkError};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5600;
pub const DEFAULT_TESTING_PORT: u16 = 5666;

/// Upper bound for a single request, an unresponsive server must not hold up delivery forever.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub fn default_port(testing: bool) -> u16 {
    if testing {
        DEFAULT_TESTING_PORT
    } else {
        DEFAULT_PORT
    }
}

/// Buckets are owned by a client on a specific machine.
pub fn bucket_id(client_name: &str, hostname: &str) -> String {
    format!("{client_name}_{hostname}")
}

#[derive(Serialize)]
struct CreateBucket<'a> {
    client: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    hostname: &'a str,
}

/// REST client of aw-server.
pub struct AwClient {
    http: reqwest::Client,
    base_url: String,
    client_name: String,
    hostname: String,
}

impl AwClient {
    pub fn new(host: &str, port: u16, client_name: &str) -> Result<Self> {
        let hostname = sysinfo::System::host_name().unwrap_or_else(|| "unknown".into());
        Self::with_hostname(host, port, client_name, &hostname)
    }

    pub fn with_hostname(host: &str, port: u16, client_name: &str, hostname: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build http client")?;
        Ok(Self {
            http,
            base_url: format!("http://{host}:{port}/api/0"),
            client_name: client_name.into(),
            hostname: hostname.into(),
        })
    }

    pub fn bucket_id(&self) -> String {
        bucket_id(&self.client_name, &self.hostname)
    }

    fn bucket_url(&self, bucket_id: &str) -> String {
        format!("{}/buckets/{bucket_id}", self.base_url)
    }

    fn heartbeat_url(&self, bucket_id: &str) -> String {
        format!("{}/heartbeat", self.bucket_url(bucket_id))
    }
}

/// Client errors (4xx) become [SinkError::Rejected], everything else stays retryable.
fn check_status(status: StatusCode, what: &'static str, body: String) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    if status.is_client_error() {
        return Err(SinkError::Rejected {
            what,
            status: status.as_u16(),
            body,
        }
        .into());
    }
    Err(anyhow!("{what} failed with {status}: {body}"))
}

async fn ensure_success(response: Response, what: &'static str) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    check_status(status, what, body)
}

#[async_trait]
impl EventSink for AwClient {
    #[instrument(skip(self))]
    async fn create_bucket(&self, bucket_id: &str, event_type: &str) -> Result<()> {
        let response = self
            .http
            .post(self.bucket_url(bucket_id))
            .json(&CreateBucket {
                client: &self.client_name,
                event_type,
                hostname: &self.hostname,
            })
            .send()
            .await
            .context("Failed to reach aw-server")?;

        // The server answers 304 for a bucket that already exists.
        if response.status() == StatusCode::NOT_MODIFIED {
            debug!("Bucket {bucket_id} already exists");
            return Ok(());
        }
        ensure_success(response, "Creating bucket").await
    }

    #[instrument(skip(self, event), fields(timestamp = %event.timestamp))]
    async fn heartbeat(&self, bucket_id: &str, event: &Event, pulsetime: Duration) -> Result<()> {
        let response = self
            .http
            .post(self.heartbeat_url(bucket_id))
            .query(&[("pulsetime", pulsetime.as_secs_f64())])
            .json(event)
            .send()
            .await
            .context("Failed to reach aw-server")?;
        ensure_success(response, "Heartbeat").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_is_named_after_client_and_host() {
        let client = AwClient::with_hostname("127.0.0.1", 5600, "aw-watcher-lock", "desk").unwrap();
        assert_eq!(client.bucket_id(), "aw-watcher-lock_desk");
    }

    #[test]
    fn builds_rest_urls() {
        let client = AwClient::with_hostname("localhost", 5666, "aw-watcher-lock", "desk").unwrap();
        assert_eq!(
            client.bucket_url("aw-watcher-lock_desk"),
            "http://localhost:5666/api/0/buckets/aw-watcher-lock_desk"
        );
        assert_eq!(
            client.heartbeat_url("aw-watcher-lock_desk"),
            "http://localhost:5666/api/0/buckets/aw-watcher-lock_desk/heartbeat"
        );
    }

    #[test]
    fn testing_uses_separate_server() {
        assert_eq!(default_port(false), 5600);
        assert_eq!(default_port(true), 5666);
    }

    #[test]
    fn client_errors_are_permanent() {
        let rejected = check_status(StatusCode::BAD_REQUEST, "Heartbeat", "Invalid event".into())
            .unwrap_err();
        assert_eq!(
            rejected.downcast_ref::<SinkError>(),
            Some(&SinkError::Rejected {
                what: "Heartbeat",
                status: 400,
                body: "Invalid event".into(),
            })
        );

        let unavailable =
            check_status(StatusCode::SERVICE_UNAVAILABLE, "Heartbeat", String::new()).unwrap_err();
        assert!(unavailable.downcast_ref::<SinkError>().is_none());
        assert!(check_status(StatusCode::OK, "Heartbeat", String::new()).is_ok());
    }

    #[test]
    fn create_bucket_body() {
        let body = serde_json::to_value(CreateBucket {
            client: "aw-watcher-lock",
            event_type: "afkstatus",
            hostname: "desk",
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"client": "aw-watcher-lock", "type": "afkstatus", "hostname": "desk"})
        );
    }
}
