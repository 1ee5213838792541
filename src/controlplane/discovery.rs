//! State Discovery
//!
//! Resolves the current remote state for one desired LUN: the owning
//! application (if any), the LUN at the desired identity and, when a rename
//! is declared, the LUN at the previous identity.

use crate::domain::element::ZapiElement;
use crate::domain::model::{
    final_segment, volume_lun_path, ApplicationRecord, Attachment, CurrentRecord, DesiredState,
    OwnershipMode,
};
use crate::domain::ports::{ApplicationGatewayRef, ManagementGatewayRef};
use crate::error::{Error, Result};
use tracing::debug;

/// Configuration for discovery queries
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Page size requested from `lun-get-iter`
    pub max_records: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { max_records: 100 }
    }
}

/// Everything discovery learned about the remote state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovered {
    /// Owning application, when application-scoped and it exists
    pub application: Option<ApplicationRecord>,
    /// LUN at the desired identity
    pub current: Option<CurrentRecord>,
    /// LUN at `from_name`, only looked up when `current` is absent
    pub from_current: Option<CurrentRecord>,
}

/// Queries the controller for the state `decide` needs
pub struct StateDiscovery {
    management: ManagementGatewayRef,
    application: Option<ApplicationGatewayRef>,
    config: DiscoveryConfig,
}

impl StateDiscovery {
    pub fn new(management: ManagementGatewayRef, application: Option<ApplicationGatewayRef>) -> Self {
        Self {
            management,
            application,
            config: DiscoveryConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DiscoveryConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolve the current state for `desired`
    pub async fn resolve(&self, desired: &DesiredState) -> Result<Discovered> {
        match &desired.ownership {
            OwnershipMode::Standalone { flexvol_name } => {
                self.resolve_in_volume(desired, flexvol_name).await
            }
            OwnershipMode::Application(_) => self.resolve_in_application(desired).await,
        }
    }

    async fn resolve_in_volume(&self, desired: &DesiredState, volume: &str) -> Result<Discovered> {
        let luns = self.list_volume(&desired.vserver, volume).await?;
        debug!("Volume {} holds {} LUNs", volume, luns.len());

        let mut discovered = Discovered {
            current: self.matching_record(&luns, volume, &desired.name).await?,
            ..Default::default()
        };
        if discovered.current.is_none() {
            if let Some(from_name) = &desired.from_name {
                discovered.from_current = self.matching_record(&luns, volume, from_name).await?;
            }
        }
        Ok(discovered)
    }

    async fn resolve_in_application(&self, desired: &DesiredState) -> Result<Discovered> {
        let gateway = self.application.as_ref().ok_or_else(|| {
            Error::Configuration("an application gateway is required for application-owned LUNs".into())
        })?;

        let uuid = match gateway.application_uuid().await? {
            Some(uuid) => uuid,
            None => {
                debug!("Application {} does not exist", gateway.application_name());
                return Ok(Discovered::default());
            }
        };

        let mut record = ApplicationRecord {
            uuid,
            lun_paths: Vec::new(),
        };
        let mut discovered = Discovered::default();

        if desired.is_present() {
            if let Some(backing) = gateway.backing_storage().await? {
                record.lun_paths = backing.luns.into_iter().map(|lun| lun.path).collect();
            }
            debug!(
                "Application {} backs {} LUNs",
                gateway.application_name(),
                record.lun_paths.len()
            );

            if let Some(path) = record.lun_path_for(&desired.name) {
                discovered.current = self.lookup_path(&desired.vserver, path).await?;
            }
            if discovered.current.is_none() {
                if let Some(path) = desired
                    .from_name
                    .as_deref()
                    .and_then(|from| record.lun_path_for(from))
                {
                    discovered.from_current = self.lookup_path(&desired.vserver, path).await?;
                }
            }
        }

        discovered.application = Some(record);
        Ok(discovered)
    }

    /// First LUN whose path is `name`, `/vol/<volume>/<name>`, or ends in `name`
    async fn matching_record(
        &self,
        luns: &[ZapiElement],
        volume: &str,
        name: &str,
    ) -> Result<Option<CurrentRecord>> {
        let full_path = volume_lun_path(volume, name);
        for info in luns {
            let Some(path) = info.child_content("path") else {
                continue;
            };
            if path == name || path == full_path || final_segment(path) == name {
                return self.to_record(info).await.map(Some);
            }
        }
        Ok(None)
    }

    /// Every LUN of `volume`, following `next-tag` until exhausted
    async fn list_volume(&self, vserver: &str, volume: &str) -> Result<Vec<ZapiElement>> {
        let query = ZapiElement::new("lun-info")
            .child_value("vserver", vserver)
            .child_value("volume", volume);

        let mut luns = Vec::new();
        let mut tag: Option<String> = None;
        loop {
            let mut request = ZapiElement::new("lun-get-iter")
                .child_value("max-records", self.config.max_records)
                .child_element(ZapiElement::new("query").child_element(query.clone()));
            if let Some(tag) = &tag {
                request.add_child_value("tag", tag);
            }

            let results = self.management.invoke(request).await?;
            if let Some(list) = results.child("attributes-list") {
                luns.extend(list.children().iter().cloned());
            }
            match results.child_content("next-tag") {
                Some(next) if !next.is_empty() => tag = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(luns)
    }

    /// Look up a single LUN by exact path
    async fn lookup_path(&self, vserver: &str, path: &str) -> Result<Option<CurrentRecord>> {
        let query = ZapiElement::new("lun-info")
            .child_value("vserver", vserver)
            .child_value("path", path);
        let request = ZapiElement::new("lun-get-iter")
            .child_element(ZapiElement::new("query").child_element(query));

        let results = self.management.invoke(request).await?;
        let info = results
            .child("attributes-list")
            .and_then(|list| list.children().first());
        match info {
            Some(info) => self.to_record(info).await.map(Some),
            None => Ok(None),
        }
    }

    async fn to_record(&self, info: &ZapiElement) -> Result<CurrentRecord> {
        let path = info
            .child_content("path")
            .ok_or_else(|| Error::ZapiParse("lun-info without path".into()))?
            .to_string();
        let size = info
            .child_u64("size")
            .ok_or_else(|| Error::ZapiParse(format!("lun-info for {} without size", path)))?;

        let attachment = if info.child_bool("mapped") == Some(true) {
            self.attachment(&path).await?
        } else {
            None
        };

        Ok(CurrentRecord {
            name: Some(
                info.child_content("name")
                    .unwrap_or_else(|| final_segment(&path))
                    .to_string(),
            ),
            size,
            space_reserve: info.child_bool("is-space-reservation-enabled"),
            space_allocation: info.child_bool("is-space-alloc-enabled"),
            os_type: info.child_content("multiprotocol-type").map(str::to_string),
            qos_policy_group: info.child_content("qos-policy-group").map(str::to_string),
            attachment,
            path,
        })
    }

    /// Initiator group mapping; the last group listed wins
    async fn attachment(&self, path: &str) -> Result<Option<Attachment>> {
        let request = ZapiElement::new("lun-map-list-info").child_value("path", path);
        let results = self.management.invoke(request).await?;

        let attachment = results
            .child("initiator-groups")
            .and_then(|groups| {
                groups
                    .children()
                    .iter()
                    .filter(|g| g.name() == "initiator-group-info")
                    .last()
            })
            .and_then(|group| {
                let igroup = group.child_content("initiator-group-name")?;
                Some(Attachment {
                    igroup: igroup.to_string(),
                    lun_id: group.child_u64("lun-id").and_then(|id| u32::try_from(id).ok()),
                })
            });
        Ok(attachment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::{InMemoryController, SimulatedLun};
    use crate::controlplane::decision::diff_attributes;
    use crate::domain::model::{ApplicationSpec, AttributeKind};
    use std::sync::Arc;

    fn standalone(name: &str) -> DesiredState {
        DesiredState::new(
            name,
            "vs1",
            OwnershipMode::Standalone {
                flexvol_name: "v1".into(),
            },
        )
    }

    fn discovery(controller: &InMemoryController) -> StateDiscovery {
        StateDiscovery::new(Arc::new(controller.clone()), None)
    }

    #[tokio::test]
    async fn test_scan_follows_pagination() {
        let controller = InMemoryController::new("vs1").with_page_size(2);
        for name in ["a", "b", "c", "d", "target"] {
            controller.insert_lun(SimulatedLun::new(format!("/vol/v1/{}", name), 4096));
        }

        let found = discovery(&controller).resolve(&standalone("target")).await.unwrap();

        assert_eq!(found.current.unwrap().path, "/vol/v1/target");
        let scans = controller
            .commands()
            .into_iter()
            .filter(|c| c == "lun-get-iter")
            .count();
        assert_eq!(scans, 3);
    }

    #[tokio::test]
    async fn test_scan_matches_explicit_path() {
        let controller = InMemoryController::new("vs1");
        controller.insert_lun(SimulatedLun::new("/vol/v1/l1", 4096));

        let found = discovery(&controller).resolve(&standalone("/vol/v1/l1")).await.unwrap();
        assert!(found.current.is_some());
    }

    #[tokio::test]
    async fn test_absent_lun_resolves_rename_source() {
        let controller = InMemoryController::new("vs1");
        controller.insert_lun(SimulatedLun::new("/vol/v1/old", 4096));

        let mut desired = standalone("new");
        desired.from_name = Some("old".into());
        let found = discovery(&controller).resolve(&desired).await.unwrap();

        assert!(found.current.is_none());
        assert_eq!(found.from_current.unwrap().path, "/vol/v1/old");
    }

    #[tokio::test]
    async fn test_attachment_only_queried_when_mapped() {
        let controller = InMemoryController::new("vs1");
        controller.insert_lun(SimulatedLun::new("/vol/v1/l1", 4096).mapped_to("ig1", 3));
        controller.insert_lun(SimulatedLun::new("/vol/v1/l2", 4096));

        let found = discovery(&controller).resolve(&standalone("l1")).await.unwrap();
        let attachment = found.current.unwrap().attachment.unwrap();
        assert_eq!(attachment.igroup, "ig1");
        assert_eq!(attachment.lun_id, Some(3));

        controller.clear_commands();
        let found = discovery(&controller).resolve(&standalone("l2")).await.unwrap();
        assert!(!found.current.unwrap().is_attached());
        assert!(!controller.commands().contains(&"lun-map-list-info".to_string()));
    }

    #[tokio::test]
    async fn test_record_reports_controller_attributes() {
        let controller = InMemoryController::new("vs1");
        controller.insert_lun(
            SimulatedLun::new("/vol/v1/l1", 4096)
                .with_os_type("windows")
                .with_qos("gold"),
        );

        let mut desired = standalone("l1");
        desired.size = Some(4096);
        desired.os_type = Some("windows".into());
        desired.qos_policy_group = Some("gold".into());
        let current = discovery(&controller)
            .resolve(&desired)
            .await
            .unwrap()
            .current
            .unwrap();

        assert_eq!(current.os_type.as_deref(), Some("windows"));
        assert_eq!(current.qos_policy_group.as_deref(), Some("gold"));
        assert_eq!(current.space_reserve, Some(true));
        assert!(diff_attributes(&desired, &current).is_empty());

        desired.qos_policy_group = Some("silver".into());
        let changes = diff_attributes(&desired, &current);
        assert_eq!(changes.keys().collect::<Vec<_>>(), vec![&AttributeKind::QosPolicyGroup]);
    }

    #[tokio::test]
    async fn test_application_members_resolved_by_suffix() {
        let controller = InMemoryController::new("vs1");
        controller.insert_application(
            "app1",
            vec![
                SimulatedLun::new("/vol/app1/lun_1", 4096),
                SimulatedLun::new("/vol/app1/lun_2", 4096),
            ],
        );

        let desired = DesiredState::new(
            "lun_2",
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
        let discovery = StateDiscovery::new(
            Arc::new(controller.clone()),
            Some(Arc::new(controller.application("app1"))),
        );
        let found = discovery.resolve(&desired).await.unwrap();

        assert_eq!(found.application.unwrap().lun_paths.len(), 2);
        assert_eq!(found.current.unwrap().path, "/vol/app1/lun_2");
    }

    #[tokio::test]
    async fn test_missing_application_has_no_current() {
        let controller = InMemoryController::new("vs1");
        controller.insert_lun(SimulatedLun::new("/vol/other/l1", 4096));

        let desired = DesiredState::new(
            "l1",
            "vs1",
            OwnershipMode::Application(ApplicationSpec {
                name: "app1".into(),
                igroup_name: None,
                lun_count: None,
                storage_service: None,
                protection_type: None,
                tiering: None,
            }),
        );
        let discovery = StateDiscovery::new(
            Arc::new(controller.clone()),
            Some(Arc::new(controller.application("app1"))),
        );
        let found = discovery.resolve(&desired).await.unwrap();

        assert_eq!(found, Discovered::default());
        assert!(!controller.commands().contains(&"lun-get-iter".to_string()));
    }

    #[tokio::test]
    async fn test_gateway_error_is_fatal() {
        let controller = InMemoryController::new("vs1");
        controller.fail_command("lun-get-iter", "13001", "busy");

        let err = discovery(&controller).resolve(&standalone("l1")).await.unwrap_err();
        assert_eq!(err.remote_code(), Some("13001"));
    }
}
