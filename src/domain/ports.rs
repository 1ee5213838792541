//! Domain Ports - Core trait definitions for the LUN reconciler
//!
//! These traits define the boundaries between the reconciliation engine and
//! the storage controller. Adapters implement these traits to provide
//! concrete functionality.

use crate::domain::element::ZapiElement;
use crate::domain::model::{ProtectionSpec, TieringControl, TieringPolicy, MAX_APPLICATION_LUN_COUNT};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Legacy Management Gateway Port
// =============================================================================

/// Port for the legacy (ZAPI) management protocol
#[async_trait]
pub trait ManagementGateway: Send + Sync {
    /// Issue one command and return its `results` element.
    ///
    /// A failed command is returned as [`Error::Zapi`] carrying the
    /// controller errno and reason.
    async fn invoke(&self, request: ZapiElement) -> Result<ZapiElement>;

    /// Get gateway name
    fn gateway_name(&self) -> &str;
}

// =============================================================================
// REST Application Gateway Port
// =============================================================================

/// Application template kinds the gateway can build bodies for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    San,
}

impl std::fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateKind::San => write!(f, "san"),
        }
    }
}

/// `{"name": ...}` reference used throughout the REST schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRef {
    pub name: String,
}

impl NamedRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// QoS block of an application component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentQos {
    pub policy: NamedRef,
}

/// Tiering block of an application component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentTiering {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control: Option<TieringControl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<TieringPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_stores: Option<Vec<NamedRef>>,
}

/// One application component: a set of LUNs provisioned together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanComponent {
    pub name: String,
    pub total_size: u64,
    pub lun_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub igroup_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_service: Option<NamedRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qos: Option<ComponentQos>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tiering: Option<ComponentTiering>,
}

/// Body of the `san` template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanApplication {
    pub application_components: Vec<SanComponent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protection_type: Option<ProtectionSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_type: Option<String>,
}

/// Full `POST /application/applications` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationBody {
    pub name: String,
    pub svm: NamedRef,
    pub smart_container: bool,
    pub template: NamedRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub san: Option<SanApplication>,
}

/// LUN entry of an application component's backing storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackingLun {
    pub path: String,
    #[serde(default)]
    pub uuid: Option<String>,
}

/// Backing storage of an application component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackingStorage {
    #[serde(default)]
    pub luns: Vec<BackingLun>,
}

/// Port for the REST application/applications interface.
///
/// A gateway is bound to one application name within one vserver.
#[async_trait]
pub trait ApplicationGateway: Send + Sync {
    /// Application name this gateway manages
    fn application_name(&self) -> &str;

    /// Vserver the application lives in
    fn vserver(&self) -> &str;

    /// UUID of the application, `None` when it does not exist
    async fn application_uuid(&self) -> Result<Option<String>>;

    /// Raw application record, `None` when it does not exist.
    ///
    /// Diagnostics only; reconciliation decides from [`Self::backing_storage`].
    async fn application_details(&self) -> Result<Option<serde_json::Value>>;

    /// Backing storage of the application component, `None` when the
    /// application does not exist
    async fn backing_storage(&self) -> Result<Option<BackingStorage>>;

    /// Create the application
    async fn create_application(&self, body: &ApplicationBody) -> Result<()>;

    /// Delete the application and everything it provisioned
    async fn delete_application(&self) -> Result<()>;

    /// Wrap a template body into a create request for this application
    fn build_body(&self, template: TemplateKind, san: SanApplication) -> Result<ApplicationBody> {
        application_body(self.application_name(), self.vserver(), template, san)
    }
}

/// Validate a template body and wrap it into an application create request
pub fn application_body(
    name: &str,
    vserver: &str,
    template: TemplateKind,
    san: SanApplication,
) -> Result<ApplicationBody> {
    if san.application_components.len() != 1 {
        return Err(Error::Validation(format!(
            "Error: a {} application requires exactly one component, got {}",
            template,
            san.application_components.len()
        )));
    }
    for component in &san.application_components {
        if component.lun_count == 0 || component.lun_count > MAX_APPLICATION_LUN_COUNT {
            return Err(Error::Validation(format!(
                "Error: lun_count must be between 1 and {}, got {}",
                MAX_APPLICATION_LUN_COUNT, component.lun_count
            )));
        }
    }

    Ok(ApplicationBody {
        name: name.to_string(),
        svm: NamedRef::new(vserver),
        smart_container: true,
        template: NamedRef::new(template.to_string()),
        san: Some(san),
    })
}

// =============================================================================
// Audit Sink Port
// =============================================================================

/// Event emitted once per invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Emitting component
    pub source: String,
    /// Emitting component version
    pub version: String,
    /// Free-form description
    pub description: String,
}

/// Port for audit event emission; callers ignore failures
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, event: &AuditEvent) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ManagementGatewayRef = Arc<dyn ManagementGateway>;
pub type ApplicationGatewayRef = Arc<dyn ApplicationGateway>;
pub type AuditSinkRef = Arc<dyn AuditSink>;
