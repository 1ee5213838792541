//! Storage Controller Gateway Adapters
//!
//! Provides adapters for the two controller protocols:
//! - ZAPI: legacy XML management interface
//! - REST: application/applications templates
//! - Memory: in-process controller used for simulation and tests

pub mod memory;
pub mod rest_application;
pub mod zapi;
pub mod zapi_codec;

pub use memory::*;
pub use rest_application::*;
pub use zapi::*;

use crate::domain::ports::{ApplicationGatewayRef, ManagementGatewayRef};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Connection Configuration
// =============================================================================

/// How to reach the storage controller
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Controller hostname or address
    pub hostname: String,
    /// Port override; defaults to 443/80
    pub port: Option<u16>,
    /// Use HTTPS
    pub https: bool,
    /// Verify the controller certificate
    pub validate_certs: bool,
    pub username: String,
    pub password: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: None,
            https: true,
            validate_certs: true,
            username: "admin".to_string(),
            password: String::new(),
            timeout_secs: 60,
        }
    }
}

impl ConnectionConfig {
    /// `scheme://host:port`
    pub fn base_url(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        let port = self.port.unwrap_or(if self.https { 443 } else { 80 });
        format!("{}://{}:{}", scheme, self.hostname, port)
    }
}

/// Build the HTTP client shared by both protocol adapters
pub fn build_http_client(config: &ConnectionConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(!config.validate_certs)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

// =============================================================================
// Gateway Factory
// =============================================================================

/// Factory for creating gateway adapters
pub struct GatewayFactory;

impl GatewayFactory {
    /// ZAPI gateway tunneled to `vserver`
    pub fn management(
        connection: &ConnectionConfig,
        vserver: &str,
        ontapi_version: &str,
    ) -> Result<ManagementGatewayRef> {
        let config = ZapiConfig {
            connection: connection.clone(),
            ontapi_version: ontapi_version.to_string(),
            vserver: Some(vserver.to_string()),
        };
        Ok(Arc::new(ZapiClient::new(config)?))
    }

    /// REST application gateway for `application` in `vserver`
    pub fn application(
        connection: &ConnectionConfig,
        vserver: &str,
        application: &str,
    ) -> Result<ApplicationGatewayRef> {
        let config = RestConfig {
            connection: connection.clone(),
            ..Default::default()
        };
        Ok(Arc::new(RestApplicationClient::new(config, vserver, application)?))
    }
}
