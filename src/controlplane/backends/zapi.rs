//! ZAPI Management Gateway Adapter
//!
//! Issues legacy management commands as XML documents POSTed to the
//! controller's admin servlet.

use crate::controlplane::backends::zapi_codec::{decode_response, encode_request};
use crate::controlplane::backends::{build_http_client, ConnectionConfig};
use crate::domain::element::{zapi_bool, ZapiElement};
use crate::domain::ports::{AuditEvent, AuditSink, ManagementGateway, ManagementGatewayRef};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

/// Servlet path of the ZAPI endpoint
pub const ZAPI_SERVLET_PATH: &str = "/servlets/netapp.servlets.admin.XMLrequest_filer";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the ZAPI adapter
#[derive(Debug, Clone)]
pub struct ZapiConfig {
    /// Connection settings
    pub connection: ConnectionConfig,
    /// ONTAPI version announced in every request
    pub ontapi_version: String,
    /// Vserver commands are tunneled to
    pub vserver: Option<String>,
}

impl Default for ZapiConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            ontapi_version: "1.110".to_string(),
            vserver: None,
        }
    }
}

// =============================================================================
// ZAPI Client
// =============================================================================

/// HTTP client for the ZAPI protocol
pub struct ZapiClient {
    config: ZapiConfig,
    http: reqwest::Client,
    url: String,
}

impl ZapiClient {
    /// Create a new ZAPI client
    pub fn new(config: ZapiConfig) -> Result<Self> {
        let http = build_http_client(&config.connection)?;
        let url = format!("{}{}", config.connection.base_url(), ZAPI_SERVLET_PATH);
        Ok(Self { config, http, url })
    }
}

#[async_trait]
impl ManagementGateway for ZapiClient {
    async fn invoke(&self, request: ZapiElement) -> Result<ZapiElement> {
        let command = request.name().to_string();
        let body = encode_request(
            &request,
            &self.config.ontapi_version,
            self.config.vserver.as_deref(),
        )?;

        debug!("ZAPI request: {} ({} bytes)", command, body.len());

        let response = self
            .http
            .post(&self.url)
            .basic_auth(
                &self.config.connection.username,
                Some(&self.config.connection.password),
            )
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::Zapi {
                command,
                code: status.as_u16().to_string(),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected HTTP status")
                    .to_string(),
            });
        }

        decode_response(&command, &text)
    }

    fn gateway_name(&self) -> &str {
        "zapi"
    }
}

// =============================================================================
// EMS Audit Sink
// =============================================================================

/// Emits audit events as EMS autosupport log entries
pub struct ZapiAuditSink {
    gateway: ManagementGatewayRef,
    computer_name: String,
}

impl ZapiAuditSink {
    pub fn new(gateway: ManagementGatewayRef, computer_name: impl Into<String>) -> Self {
        Self {
            gateway,
            computer_name: computer_name.into(),
        }
    }
}

#[async_trait]
impl AuditSink for ZapiAuditSink {
    async fn emit(&self, event: &AuditEvent) -> Result<()> {
        let request = ZapiElement::new("ems-autosupport-log")
            .child_value("computer-name", &self.computer_name)
            .child_value("event-id", "12345")
            .child_value("event-source", &event.source)
            .child_value("app-version", &event.version)
            .child_value("category", "provisioning")
            .child_value("event-description", &event.description)
            .child_value("log-level", "6")
            .child_value("auto-support", zapi_bool(false));

        self.gateway.invoke(request).await?;
        Ok(())
    }
}
