//! Action Executor
//!
//! Runs a [`Decision`] against the gateways, strictly in plan order. The
//! first failure aborts the plan; nothing already applied is rolled back.

use crate::controlplane::decision::{Action, Decision};
use crate::domain::element::{zapi_bool, ZapiElement};
use crate::domain::model::{AttributeKind, AttributeValue, DesiredState, StorageService};
use crate::domain::ports::{
    ApplicationGatewayRef, ComponentQos, ComponentTiering, ManagementGatewayRef, NamedRef,
    SanApplication, SanComponent, TemplateKind,
};
use crate::error::{Error, Result};
use tracing::{debug, info, warn};

/// Result of a resize call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    Resized,
    /// The new size rounds to the size the LUN already has
    Unchanged,
}

/// What execution actually did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub changed: bool,
    pub resize: Option<ResizeOutcome>,
}

/// Executes reconciliation plans
pub struct ActionExecutor {
    management: ManagementGatewayRef,
    application: Option<ApplicationGatewayRef>,
}

impl ActionExecutor {
    pub fn new(management: ManagementGatewayRef, application: Option<ApplicationGatewayRef>) -> Self {
        Self {
            management,
            application,
        }
    }

    /// Execute every action of `decision` in order
    pub async fn execute(&self, desired: &DesiredState, decision: &Decision) -> Result<ExecutionReport> {
        validate_plan(decision)?;

        let mut resize = None;
        let mut applied = false;
        for action in &decision.actions {
            info!("Executing: {}", action);
            match action {
                Action::CreateStandalone { path, size } => {
                    self.create_lun(desired, path, *size).await?
                }
                Action::CreateApplication { size, .. } => {
                    self.create_application(desired, *size).await?
                }
                Action::DeleteStandalone { path } => self.delete_lun(desired, path).await?,
                Action::DeleteApplication { name, .. } => self.delete_application(name).await?,
                Action::Rename { from_path, to_path } => self.rename_lun(from_path, to_path).await?,
                Action::Resize { path, size } => {
                    resize = Some(self.resize_lun(desired, path, *size).await?);
                    continue;
                }
                Action::Modify { path, changes } => self.modify_lun(path, changes).await?,
            }
            applied = true;
        }

        Ok(ExecutionReport {
            changed: applied || resize == Some(ResizeOutcome::Resized),
            resize,
        })
    }

    // =========================================================================
    // LUN Operations
    // =========================================================================

    async fn create_lun(&self, desired: &DesiredState, path: &str, size: u64) -> Result<()> {
        let mut request = ZapiElement::new("lun-create-by-size")
            .child_value("path", path)
            .child_value("size", size)
            .child_value("space-reservation-enabled", zapi_bool(desired.space_reserve))
            .child_value("space-allocation-enabled", zapi_bool(desired.space_allocation))
            .child_value("use-exact-size", zapi_bool(desired.use_exact_size));
        if let Some(os_type) = &desired.os_type {
            request.add_child_value("ostype", os_type);
        }
        if let Some(qos) = &desired.qos_policy_group {
            request.add_child_value("qos-policy-group", qos);
        }

        self.management
            .invoke(request)
            .await
            .map_err(|e| e.during("provisioning lun", format!("{} of size {}", path, size)))?;
        Ok(())
    }

    async fn delete_lun(&self, desired: &DesiredState, path: &str) -> Result<()> {
        let request = ZapiElement::new("lun-destroy")
            .child_value("path", path)
            .child_value("force", zapi_bool(desired.force_remove))
            .child_value("destroy-fenced-lun", zapi_bool(desired.force_remove_fenced));

        self.management
            .invoke(request)
            .await
            .map_err(|e| e.during("deleting lun", path))?;
        Ok(())
    }

    async fn rename_lun(&self, from_path: &str, to_path: &str) -> Result<()> {
        let request = ZapiElement::new("lun-move")
            .child_value("path", from_path)
            .child_value("new-path", to_path);

        self.management
            .invoke(request)
            .await
            .map_err(|e| e.during("renaming lun", from_path))?;
        Ok(())
    }

    /// Resize, treating "size unchanged" as a benign no-op
    async fn resize_lun(&self, desired: &DesiredState, path: &str, size: u64) -> Result<ResizeOutcome> {
        let request = ZapiElement::new("lun-resize")
            .child_value("path", path)
            .child_value("size", size)
            .child_value("force", zapi_bool(desired.force_resize));

        match self.management.invoke(request).await {
            Ok(_) => Ok(ResizeOutcome::Resized),
            Err(e) if e.is_size_unchanged() => {
                debug!("Resize of {} had no effect: {}", path, e);
                Ok(ResizeOutcome::Unchanged)
            }
            Err(e) => Err(e.during("resizing lun", path)),
        }
    }

    /// One set call per attribute
    async fn modify_lun(&self, path: &str, changes: &[(AttributeKind, AttributeValue)]) -> Result<()> {
        for (kind, value) in changes {
            let descriptor = kind.descriptor().ok_or_else(|| unsupported(*kind, value))?;
            let encoded = match value {
                AttributeValue::Flag(flag) if descriptor.inverted => zapi_bool(!flag).to_string(),
                AttributeValue::Flag(flag) => zapi_bool(*flag).to_string(),
                other => other.to_string(),
            };

            let request = ZapiElement::new(descriptor.command)
                .child_value("path", path)
                .child_value(descriptor.value_element, encoded);
            self.management
                .invoke(request)
                .await
                .map_err(|e| e.during(format!("setting {} for lun", kind), path))?;
        }
        Ok(())
    }

    // =========================================================================
    // Application Operations
    // =========================================================================

    fn application_gateway(&self) -> Result<&ApplicationGatewayRef> {
        self.application.as_ref().ok_or_else(|| {
            Error::Configuration("an application gateway is required for application-owned LUNs".into())
        })
    }

    async fn create_application(&self, desired: &DesiredState, size: u64) -> Result<()> {
        let gateway = self.application_gateway()?;
        let san = san_template(desired, size)?;
        let body = gateway.build_body(TemplateKind::San, san)?;

        gateway
            .create_application(&body)
            .await
            .map_err(|e| e.during("creating san application", gateway.application_name()))
    }

    async fn delete_application(&self, name: &str) -> Result<()> {
        self.application_gateway()?
            .delete_application()
            .await
            .map_err(|e| e.during("deleting san application", name))
    }
}

/// Reject a plan that cannot be fully executed, before the first remote call
fn validate_plan(decision: &Decision) -> Result<()> {
    for action in &decision.actions {
        if let Action::Modify { changes, .. } = action {
            if let Some((kind, value)) = changes.iter().find(|(kind, _)| kind.descriptor().is_none()) {
                return Err(unsupported(*kind, value));
            }
        }
    }
    Ok(())
}

fn unsupported(kind: AttributeKind, value: &AttributeValue) -> Error {
    Error::UnsupportedAttribute {
        attribute: kind.name().to_string(),
        value: value.to_string(),
    }
}

/// `san` template body for a new application with one component
pub fn san_template(desired: &DesiredState, size: u64) -> Result<SanApplication> {
    let spec = desired
        .application()
        .ok_or_else(|| Error::Internal("san template requested for a standalone LUN".into()))?;

    let tiering = spec.tiering.as_ref().map(|tiering| ComponentTiering {
        control: tiering.control,
        policy: tiering.policy,
        object_stores: tiering
            .object_stores
            .as_ref()
            .map(|stores| stores.iter().map(NamedRef::new).collect()),
    });
    if tiering.is_some() {
        debug!("Applying tiering options to application {}", spec.name);
    }

    let component = SanComponent {
        name: desired.name.clone(),
        total_size: size,
        lun_count: spec.lun_count.unwrap_or(1),
        igroup_name: spec.igroup_name.clone(),
        storage_service: spec
            .storage_service
            .map(|service| NamedRef::new(service_name(service))),
        os_type: desired.os_type.clone(),
        qos: desired.qos_policy_group.as_ref().map(|policy| ComponentQos {
            policy: NamedRef::new(policy),
        }),
        tiering,
    };

    let protection_type = spec
        .protection_type
        .clone()
        .filter(|protection| protection.local_policy.is_some());
    if spec.protection_type.is_some() && protection_type.is_none() {
        warn!("Ignoring empty protection_type for application {}", spec.name);
    }

    Ok(SanApplication {
        application_components: vec![component],
        protection_type,
        os_type: desired.os_type.clone(),
    })
}

fn service_name(service: StorageService) -> &'static str {
    match service {
        StorageService::Value => "value",
        StorageService::Performance => "performance",
        StorageService::Extreme => "extreme",
    }
}
