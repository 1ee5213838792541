//! REST Application Gateway Adapter
//!
//! Creates and deletes SAN applications through the
//! `application/applications` REST collection, and reads the LUN paths an
//! application provisioned from its component backing storage.

use crate::controlplane::backends::{build_http_client, ConnectionConfig};
use crate::domain::ports::{ApplicationBody, ApplicationGateway, BackingStorage};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

const APPLICATIONS_ENDPOINT: &str = "application/applications";
const JOBS_ENDPOINT: &str = "cluster/jobs";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the REST adapter
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Connection settings
    pub connection: ConnectionConfig,
    /// API root path
    pub api_root: String,
    /// Seconds the controller may hold a request before answering with a job
    pub return_timeout_secs: u64,
    /// Interval between job status polls
    pub job_poll_interval: Duration,
    /// Give up waiting for a job after this many polls
    pub job_max_polls: u32,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            api_root: "/api".to_string(),
            return_timeout_secs: 30,
            job_poll_interval: Duration::from_secs(2),
            job_max_polls: 60,
        }
    }
}

// =============================================================================
// REST Application Client
// =============================================================================

/// REST client bound to one application in one vserver
pub struct RestApplicationClient {
    config: RestConfig,
    http: reqwest::Client,
    vserver: String,
    name: String,
    /// UUID once looked up
    uuid: Mutex<Option<String>>,
}

impl RestApplicationClient {
    /// Create a new REST application client
    pub fn new(config: RestConfig, vserver: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let http = build_http_client(&config.connection)?;
        Ok(Self {
            config,
            http,
            vserver: vserver.into(),
            name: name.into(),
            uuid: Mutex::new(None),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}{}/{}",
            self.config.connection.base_url(),
            self.config.api_root,
            endpoint
        )
    }

    /// Issue one request and return the decoded JSON body (`Null` when empty)
    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value> {
        debug!("REST request: {} {}", method, endpoint);

        let mut request = self
            .http
            .request(method.clone(), self.url(endpoint))
            .basic_auth(
                &self.config.connection.username,
                Some(&self.config.connection.password),
            )
            .query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(rest_failure(&method, endpoint, status, &text));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| Error::RestResponseParse(format!("{} {}: {}", method, endpoint, e)))
    }

    /// Follow an asynchronous job to completion, if the response started one
    async fn wait_for_job(&self, response: &Value) -> Result<()> {
        let job_uuid = match response
            .get("job")
            .and_then(|job| job.get("uuid"))
            .and_then(Value::as_str)
        {
            Some(uuid) => uuid.to_string(),
            None => return Ok(()),
        };

        let endpoint = format!("{}/{}", JOBS_ENDPOINT, job_uuid);
        for _ in 0..self.config.job_max_polls {
            let job = self
                .send(Method::GET, &endpoint, &[("fields", "state,message".to_string())], None)
                .await?;
            match job.get("state").and_then(Value::as_str) {
                Some("success") => return Ok(()),
                Some("failure") => {
                    return Err(Error::Rest {
                        method: "GET".into(),
                        endpoint,
                        status: 200,
                        code: job.get("code").map(|c| match c.as_str() {
                            Some(code) => code.to_string(),
                            None => c.to_string(),
                        }),
                        message: job
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("job failed")
                            .to_string(),
                    });
                }
                _ => tokio::time::sleep(self.config.job_poll_interval).await,
            }
        }

        Err(Error::Rest {
            method: "GET".into(),
            endpoint,
            status: 200,
            code: None,
            message: format!(
                "job did not complete after {} polls",
                self.config.job_max_polls
            ),
        })
    }

    /// Cached UUID, looking it up when needed
    async fn require_uuid(&self) -> Result<Option<String>> {
        let cached = self.uuid.lock().clone();
        if cached.is_some() {
            return Ok(cached);
        }
        self.application_uuid().await
    }

    fn single_record<'a>(&self, response: &'a Value, what: &str) -> Result<Option<&'a Value>> {
        let records = response
            .get("records")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        match records {
            [] => Ok(None),
            [record] => Ok(Some(record)),
            _ => Err(Error::RestResponseParse(format!(
                "expected at most one {} for application {}, found {}",
                what,
                self.name,
                records.len()
            ))),
        }
    }
}

/// Error for a non-2xx answer; bodies that are not the JSON error envelope
/// (proxy pages, plain text) are carried as the message verbatim
fn rest_failure(method: &Method, endpoint: &str, status: StatusCode, body: &str) -> Error {
    let envelope = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| json.get("error").cloned());
    let field = |name: &str| {
        envelope
            .as_ref()
            .and_then(|e| e.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let message = field("message").unwrap_or_else(|| {
        let raw = body.trim();
        if raw.is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            raw.to_string()
        }
    });

    Error::Rest {
        method: method.to_string(),
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        code: field("code"),
        message,
    }
}

#[async_trait]
impl ApplicationGateway for RestApplicationClient {
    fn application_name(&self) -> &str {
        &self.name
    }

    fn vserver(&self) -> &str {
        &self.vserver
    }

    async fn application_uuid(&self) -> Result<Option<String>> {
        let query = [
            ("name", self.name.clone()),
            ("svm.name", self.vserver.clone()),
            ("fields", "uuid".to_string()),
        ];
        let response = self
            .send(Method::GET, APPLICATIONS_ENDPOINT, &query, None)
            .await?;

        let uuid = match self.single_record(&response, "application")? {
            Some(record) => Some(
                record
                    .get("uuid")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        Error::RestResponseParse(format!("application {} has no uuid", self.name))
                    })?
                    .to_string(),
            ),
            None => None,
        };

        *self.uuid.lock() = uuid.clone();
        Ok(uuid)
    }

    async fn application_details(&self) -> Result<Option<Value>> {
        let Some(uuid) = self.require_uuid().await? else {
            return Ok(None);
        };
        let endpoint = format!("{}/{}", APPLICATIONS_ENDPOINT, uuid);
        let details = self.send(Method::GET, &endpoint, &[], None).await?;
        Ok(Some(details))
    }

    async fn backing_storage(&self) -> Result<Option<BackingStorage>> {
        let Some(uuid) = self.require_uuid().await? else {
            return Ok(None);
        };

        let components_endpoint = format!("{}/{}/components", APPLICATIONS_ENDPOINT, uuid);
        let components = self
            .send(Method::GET, &components_endpoint, &[], None)
            .await?;
        let component_uuid = match self.single_record(&components, "component")? {
            Some(record) => record
                .get("uuid")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    Error::RestResponseParse(format!(
                        "component of application {} has no uuid",
                        self.name
                    ))
                })?
                .to_string(),
            None => return Ok(None),
        };

        let endpoint = format!("{}/{}", components_endpoint, component_uuid);
        let component = self.send(Method::GET, &endpoint, &[], None).await?;
        let backing = match component.get("backing_storage") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => BackingStorage::default(),
        };
        Ok(Some(backing))
    }

    async fn create_application(&self, body: &ApplicationBody) -> Result<()> {
        info!("Creating SAN application: {} in {}", self.name, self.vserver);

        let query = [("return_timeout", self.config.return_timeout_secs.to_string())];
        let response = self
            .send(
                Method::POST,
                APPLICATIONS_ENDPOINT,
                &query,
                Some(serde_json::to_value(body)?),
            )
            .await?;
        self.wait_for_job(&response).await
    }

    async fn delete_application(&self) -> Result<()> {
        let Some(uuid) = self.require_uuid().await? else {
            return Err(Error::Rest {
                method: "DELETE".into(),
                endpoint: APPLICATIONS_ENDPOINT.into(),
                status: 404,
                code: None,
                message: format!("application {} not found", self.name),
            });
        };

        info!("Deleting SAN application: {} ({})", self.name, uuid);

        let endpoint = format!("{}/{}", APPLICATIONS_ENDPOINT, uuid);
        let query = [("return_timeout", self.config.return_timeout_secs.to_string())];
        let response = self.send(Method::DELETE, &endpoint, &query, None).await?;
        self.wait_for_job(&response).await?;

        *self.uuid.lock() = None;
        Ok(())
    }
}
