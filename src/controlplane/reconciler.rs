//! Reconciler - one invocation end to end
//!
//! `Start → Discover → Decide → {NoOp | Execute} → End`. Nothing is carried
//! between invocations; every run starts from a fresh discovery.

use crate::controlplane::backends::{ConnectionConfig, GatewayFactory, ZapiAuditSink};
use crate::controlplane::decision::{decide, AttributeChanges, Decision};
use crate::controlplane::discovery::{DiscoveryConfig, StateDiscovery};
use crate::controlplane::executor::ActionExecutor;
use crate::domain::model::DesiredState;
use crate::domain::ports::{
    ApplicationGatewayRef, AuditEvent, AuditSinkRef, ManagementGatewayRef,
};
use crate::error::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the reconciler
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Decide without executing
    pub check_mode: bool,
    /// Upper bound on the audit event call
    pub audit_timeout: Duration,
    /// Event source reported in the audit event
    pub audit_source: String,
    /// Discovery settings
    pub discovery: DiscoveryConfig,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            check_mode: false,
            audit_timeout: Duration::from_secs(5),
            audit_source: "lun_reconciler".to_string(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Result document returned to the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renamed: Option<bool>,
    /// Attribute diff, even where it was not applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modify: Option<AttributeChanges>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Planned actions, in execution order
    pub actions: Vec<String>,
    pub check_mode: bool,
}

impl ReconcileOutcome {
    fn from_decision(decision: Decision, changed: bool, check_mode: bool) -> Self {
        Self {
            changed,
            actions: decision
                .action_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            renamed: decision.renamed,
            modify: decision.modify,
            warnings: decision.warnings,
            check_mode,
        }
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Drives discovery, decision and execution for one desired LUN
pub struct Reconciler {
    config: ReconcilerConfig,
    discovery: StateDiscovery,
    executor: ActionExecutor,
    audit: Option<AuditSinkRef>,
}

impl Reconciler {
    /// Create a reconciler over already-built gateways
    pub fn new(
        config: ReconcilerConfig,
        management: ManagementGatewayRef,
        application: Option<ApplicationGatewayRef>,
        audit: Option<AuditSinkRef>,
    ) -> Self {
        let discovery = StateDiscovery::new(management.clone(), application.clone())
            .with_config(config.discovery.clone());
        let executor = ActionExecutor::new(management, application);
        Self {
            config,
            discovery,
            executor,
            audit,
        }
    }

    /// Build the ZAPI and REST gateways for `desired` and wire them up
    pub fn connect(
        config: ReconcilerConfig,
        connection: &ConnectionConfig,
        ontapi_version: &str,
        desired: &DesiredState,
    ) -> Result<Self> {
        let management = GatewayFactory::management(connection, &desired.vserver, ontapi_version)?;
        let application = match desired.application() {
            Some(spec) => Some(GatewayFactory::application(
                connection,
                &desired.vserver,
                &spec.name,
            )?),
            None => None,
        };
        let audit: AuditSinkRef = Arc::new(ZapiAuditSink::new(management.clone(), crate::NAME));
        Ok(Self::new(config, management, application, Some(audit)))
    }

    /// Converge the controller on `desired`
    pub async fn reconcile(&self, desired: &DesiredState) -> Result<ReconcileOutcome> {
        info!(
            "Reconciling LUN {} in vserver {} (state: {})",
            desired.name, desired.vserver, desired.state
        );
        self.emit_audit(desired).await;

        let discovered = self.discovery.resolve(desired).await?;
        debug!("Discovered: {:?}", discovered);

        let decision = decide(desired, &discovered)?;
        for warning in &decision.warnings {
            warn!("{}", warning);
        }

        if decision.is_noop() {
            info!("LUN {} is up to date", desired.name);
            return Ok(ReconcileOutcome::from_decision(decision, false, self.config.check_mode));
        }

        if self.config.check_mode {
            info!("Check mode: would run {:?}", decision.action_names());
            let changed = decision.changed();
            return Ok(ReconcileOutcome::from_decision(decision, changed, true));
        }

        let report = self.executor.execute(desired, &decision).await?;
        info!("LUN {} reconciled (changed: {})", desired.name, report.changed);
        Ok(ReconcileOutcome::from_decision(decision, report.changed, false))
    }

    /// Emit the invocation audit event; failures never abort
    async fn emit_audit(&self, desired: &DesiredState) {
        let Some(sink) = &self.audit else {
            return;
        };
        let event = AuditEvent {
            source: self.config.audit_source.clone(),
            version: crate::VERSION.to_string(),
            description: format!("reconcile lun {} ({})", desired.name, desired.state),
        };

        match tokio::time::timeout(self.config.audit_timeout, sink.emit(&event)).await {
            Ok(Ok(())) => debug!("Audit event emitted"),
            Ok(Err(e)) => warn!("Audit event failed: {}", e),
            Err(_) => warn!(
                "Audit event timed out after {:?}",
                self.config.audit_timeout
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::{InMemoryController, SimulatedLun};
    use crate::domain::model::{ApplicationSpec, LunState, OwnershipMode};
    use crate::domain::ports::AuditSink;
    use async_trait::async_trait;

    const GIB: u64 = 1 << 30;

    fn desired(name: &str) -> DesiredState {
        DesiredState::new(
            name,
            "vs1",
            OwnershipMode::Standalone {
                flexvol_name: "V1".into(),
            },
        )
    }

    fn reconciler(controller: &InMemoryController, config: ReconcilerConfig) -> Reconciler {
        let management: ManagementGatewayRef = Arc::new(controller.clone());
        let audit: AuditSinkRef = Arc::new(ZapiAuditSink::new(management.clone(), "test-host"));
        Reconciler::new(config, management, None, Some(audit))
    }

    #[tokio::test]
    async fn test_create_scenario() {
        let controller = InMemoryController::new("vs1");
        let mut want = desired("L1");
        want.size = Some(5 * GIB);

        let outcome = reconciler(&controller, ReconcilerConfig::default())
            .reconcile(&want)
            .await
            .unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.actions, vec!["create"]);
        assert_eq!(controller.lun("/vol/V1/L1").unwrap().size, 5_368_709_120);
        assert_eq!(controller.commands()[0], "ems-autosupport-log");
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let controller = InMemoryController::new("vs1");
        let mut want = desired("L1");
        want.size = Some(GIB);
        want.space_reserve = false;
        want.qos_policy_group = Some("gold".into());
        let reconciler = reconciler(&controller, ReconcilerConfig::default());

        assert!(reconciler.reconcile(&want).await.unwrap().changed);
        controller.clear_commands();

        let outcome = reconciler.reconcile(&want).await.unwrap();
        assert!(!outcome.changed);
        assert!(outcome.actions.is_empty());
        assert!(controller.mutating_commands().is_empty());
    }

    #[tokio::test]
    async fn test_resize_only_scenario() {
        let controller = InMemoryController::new("vs1");
        controller.insert_lun(SimulatedLun::new("/vol/V1/L1", 3 * GIB));
        let mut want = desired("L1");
        want.size = Some(5 * GIB);

        let outcome = reconciler(&controller, ReconcilerConfig::default())
            .reconcile(&want)
            .await
            .unwrap();

        assert!(outcome.changed);
        assert!(outcome.modify.unwrap().contains_key(&crate::domain::model::AttributeKind::Size));
        assert_eq!(controller.mutating_commands(), vec!["lun-resize"]);
        assert_eq!(controller.lun("/vol/V1/L1").unwrap().size, 5 * GIB);
    }

    #[tokio::test]
    async fn test_resize_rounding_only_is_unchanged() {
        let controller = InMemoryController::new("vs1").with_size_granularity(1 << 20);
        controller.insert_lun(SimulatedLun::new("/vol/V1/L1", 8 << 20));
        let mut want = desired("L1");
        want.size = Some((8 << 20) - 4096);

        let outcome = reconciler(&controller, ReconcilerConfig::default())
            .reconcile(&want)
            .await
            .unwrap();

        assert!(!outcome.changed);
        assert_eq!(outcome.actions, vec!["resize"]);
    }

    #[tokio::test]
    async fn test_absent_absent_scenario() {
        let controller = InMemoryController::new("vs1");
        let mut want = desired("L1");
        want.state = LunState::Absent;

        let outcome = reconciler(&controller, ReconcilerConfig::default())
            .reconcile(&want)
            .await
            .unwrap();

        assert!(!outcome.changed);
        assert!(controller.mutating_commands().is_empty());
    }

    #[tokio::test]
    async fn test_rename_then_modify() {
        let controller = InMemoryController::new("vs1");
        controller.insert_lun(SimulatedLun::new("/vol/V1/old", GIB));
        let mut want = desired("new");
        want.from_name = Some("old".into());
        want.qos_policy_group = Some("gold".into());

        let outcome = reconciler(&controller, ReconcilerConfig::default())
            .reconcile(&want)
            .await
            .unwrap();

        assert!(outcome.changed);
        assert_eq!(outcome.renamed, Some(true));
        assert_eq!(
            controller.mutating_commands(),
            vec!["lun-move", "lun-set-qos-policy-group"]
        );
        assert_eq!(
            controller.lun("/vol/V1/new").unwrap().qos_policy_group.as_deref(),
            Some("gold")
        );
    }

    #[tokio::test]
    async fn test_missing_rename_source_issues_no_mutation() {
        let controller = InMemoryController::new("vs1");
        controller.insert_lun(SimulatedLun::new("/vol/V1/old", GIB));
        let mut want = desired("new");
        want.from_name = Some("missing".into());

        let err = reconciler(&controller, ReconcilerConfig::default())
            .reconcile(&want)
            .await
            .unwrap_err();

        assert!(err.is_validation());
        assert!(controller.mutating_commands().is_empty());
    }

    #[tokio::test]
    async fn test_check_mode_does_not_execute() {
        let controller = InMemoryController::new("vs1");
        let mut want = desired("L1");
        want.size = Some(GIB);
        let config = ReconcilerConfig {
            check_mode: true,
            ..Default::default()
        };

        let outcome = reconciler(&controller, config).reconcile(&want).await.unwrap();

        assert!(outcome.changed);
        assert!(outcome.check_mode);
        assert!(controller.lun_paths().is_empty());
        assert!(controller.mutating_commands().is_empty());
    }

    #[tokio::test]
    async fn test_audit_failure_is_ignored() {
        let controller = InMemoryController::new("vs1");
        controller.fail_command("ems-autosupport-log", "13001", "ems down");
        let mut want = desired("L1");
        want.size = Some(GIB);

        let outcome = reconciler(&controller, ReconcilerConfig::default())
            .reconcile(&want)
            .await
            .unwrap();
        assert!(outcome.changed);
    }

    struct StalledSink;

    #[async_trait]
    impl AuditSink for StalledSink {
        async fn emit(&self, _event: &AuditEvent) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_audit_timeout_does_not_block() {
        let controller = InMemoryController::new("vs1");
        let config = ReconcilerConfig {
            audit_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let reconciler = Reconciler::new(
            config,
            Arc::new(controller.clone()),
            None,
            Some(Arc::new(StalledSink)),
        );
        let mut want = desired("L1");
        want.state = LunState::Absent;

        let outcome = reconciler.reconcile(&want).await.unwrap();
        assert!(!outcome.changed);
    }

    #[tokio::test]
    async fn test_application_lifecycle() {
        let controller = InMemoryController::new("vs1");
        let mut want = DesiredState::new(
            "L1",
            "vs1",
            OwnershipMode::Application(ApplicationSpec {
                name: "app1".into(),
                igroup_name: None,
                lun_count: Some(2),
                storage_service: None,
                protection_type: None,
                tiering: None,
            }),
        );
        want.size = Some(4 * GIB);
        let reconciler = Reconciler::new(
            ReconcilerConfig::default(),
            Arc::new(controller.clone()),
            Some(Arc::new(controller.application("app1"))),
            None,
        );

        let created = reconciler.reconcile(&want).await.unwrap();
        assert!(created.changed);
        assert_eq!(controller.lun_paths().len(), 2);

        let again = reconciler.reconcile(&want).await.unwrap();
        assert!(!again.changed);
        assert_eq!(again.warnings.len(), 1);

        want.state = LunState::Absent;
        let deleted = reconciler.reconcile(&want).await.unwrap();
        assert!(deleted.changed);
        assert!(controller.lun_paths().is_empty());
    }

    #[tokio::test]
    async fn test_application_member_rename() {
        let controller = InMemoryController::new("vs1");
        controller.insert_application(
            "app1",
            vec![
                SimulatedLun::new("/vol/app1/x_1", 2 * GIB),
                SimulatedLun::new("/vol/app1/x_2", 2 * GIB),
            ],
        );
        let mut want = DesiredState::new(
            "y",
            "vs1",
            OwnershipMode::Application(ApplicationSpec {
                name: "app1".into(),
                igroup_name: None,
                lun_count: Some(2),
                storage_service: None,
                protection_type: None,
                tiering: None,
            }),
        );
        want.from_name = Some("x_1".into());
        want.size = Some(2 * GIB);
        let reconciler = Reconciler::new(
            ReconcilerConfig::default(),
            Arc::new(controller.clone()),
            Some(Arc::new(controller.application("app1"))),
            None,
        );

        let outcome = reconciler.reconcile(&want).await.unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.renamed, Some(true));
        assert_eq!(outcome.actions, vec!["rename"]);
        assert_eq!(controller.mutating_commands(), vec!["lun-move"]);
        assert!(controller.lun("/vol/app1/x_1").is_none());
        assert!(controller.lun("/vol/app1/y").is_some());

        controller.clear_commands();
        let again = reconciler.reconcile(&want).await.unwrap();
        assert!(!again.changed);
        assert!(controller.mutating_commands().is_empty());
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = ReconcileOutcome {
            changed: true,
            renamed: Some(true),
            actions: vec!["rename".into()],
            ..Default::default()
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["changed"], true);
        assert_eq!(json["renamed"], true);
        assert!(json.get("modify").is_none());
        assert!(json.get("warnings").is_none());
    }
}
