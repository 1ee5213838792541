//! Diff & Decision Engine
//!
//! `decide` is a pure function of the desired state and what discovery
//! found. It produces an ordered plan of actions; the executor runs it.

use crate::controlplane::discovery::Discovered;
use crate::domain::model::{
    final_segment, replace_final_segment, AttributeKind, AttributeValue, CurrentRecord,
    DesiredState, LunState, OwnershipMode,
};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::Serialize;

/// Warning for a LUN-level create beneath an existing application
pub const WARN_ADD_TO_APPLICATION: &str =
    "Adding a LUN by name to a SAN application is not supported.";
/// Warning for a LUN-level delete beneath an existing application
pub const WARN_REMOVE_FROM_APPLICATION: &str =
    "Removing a LUN by name from a SAN application is not supported.";

/// Attribute diff, in [`AttributeKind::ALL`] order
pub type AttributeChanges = IndexMap<AttributeKind, AttributeValue>;

// =============================================================================
// Actions
// =============================================================================

/// One step of a reconciliation plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Create a LUN directly in a FlexVol
    CreateStandalone { path: String, size: u64 },
    /// Create the SAN application, which provisions its LUNs
    CreateApplication { name: String, size: u64 },
    DeleteStandalone { path: String },
    DeleteApplication { name: String, uuid: String },
    /// Move a LUN to a new path within its volume
    Rename { from_path: String, to_path: String },
    Resize { path: String, size: u64 },
    /// Set attributes one call at a time
    Modify {
        path: String,
        changes: Vec<(AttributeKind, AttributeValue)>,
    },
}

impl Action {
    /// Short name reported back to the host
    pub fn name(&self) -> &'static str {
        match self {
            Action::CreateStandalone { .. } => "create",
            Action::CreateApplication { .. } => "create_application",
            Action::DeleteStandalone { .. } => "delete",
            Action::DeleteApplication { .. } => "delete_application",
            Action::Rename { .. } => "rename",
            Action::Resize { .. } => "resize",
            Action::Modify { .. } => "modify",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::CreateStandalone { path, size } => write!(f, "create {} ({} bytes)", path, size),
            Action::CreateApplication { name, size } => {
                write!(f, "create application {} ({} bytes)", name, size)
            }
            Action::DeleteStandalone { path } => write!(f, "delete {}", path),
            Action::DeleteApplication { name, .. } => write!(f, "delete application {}", name),
            Action::Rename { from_path, to_path } => write!(f, "rename {} to {}", from_path, to_path),
            Action::Resize { path, size } => write!(f, "resize {} to {} bytes", path, size),
            Action::Modify { path, changes } => {
                let names: Vec<&str> = changes.iter().map(|(kind, _)| kind.name()).collect();
                write!(f, "modify {} ({})", path, names.join(", "))
            }
        }
    }
}

// =============================================================================
// Decision
// =============================================================================

/// Plan produced by [`decide`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Decision {
    /// Ordered actions; empty means no-op
    pub actions: Vec<Action>,
    /// Set when the plan renames the LUN
    pub renamed: Option<bool>,
    /// Attribute diff, reported even when it is not applied
    pub modify: Option<AttributeChanges>,
    pub warnings: Vec<String>,
}

impl Decision {
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }

    /// Whether the plan claims a change before execution
    pub fn changed(&self) -> bool {
        !self.actions.is_empty()
    }

    pub fn action_names(&self) -> Vec<&'static str> {
        self.actions.iter().map(Action::name).collect()
    }
}

/// Decide what to do to converge `discovered` on `desired`
pub fn decide(desired: &DesiredState, discovered: &Discovered) -> Result<Decision> {
    let mut decision = Decision::default();

    if let OwnershipMode::Application(spec) = &desired.ownership {
        match (desired.state, &discovered.application) {
            (LunState::Present, None) => {
                let size = require_size(desired)?;
                decision.actions.push(Action::CreateApplication {
                    name: spec.name.clone(),
                    size,
                });
                return Ok(decision);
            }
            (LunState::Absent, Some(app)) => {
                decision.actions.push(Action::DeleteApplication {
                    name: spec.name.clone(),
                    uuid: app.uuid.clone(),
                });
                return Ok(decision);
            }
            (LunState::Absent, None) => return Ok(decision),
            (LunState::Present, Some(_)) => {}
        }
    }

    decide_lun(desired, discovered, &mut decision)?;
    Ok(decision)
}

/// LUN-level rules, beneath an existing application or in a FlexVol
fn decide_lun(desired: &DesiredState, discovered: &Discovered, decision: &mut Decision) -> Result<()> {
    let owned = desired.ownership.is_application();
    let (current, rename_to) = resolve_rename(desired, discovered)?;

    match (current, desired.state) {
        (None, LunState::Absent) => {}
        (None, LunState::Present) => {
            let size = require_size(desired)?;
            match desired.standalone_path() {
                Some(path) if !owned => {
                    decision.actions.push(Action::CreateStandalone { path, size });
                }
                _ => decision.warnings.push(WARN_ADD_TO_APPLICATION.to_string()),
            }
        }
        (Some(current), LunState::Absent) => {
            if owned {
                decision.warnings.push(WARN_REMOVE_FROM_APPLICATION.to_string());
            } else {
                decision.actions.push(Action::DeleteStandalone {
                    path: current.path.clone(),
                });
            }
        }
        (Some(current), LunState::Present) => {
            let path = match rename_to {
                Some(to_path) => {
                    decision.actions.push(Action::Rename {
                        from_path: current.path.clone(),
                        to_path: to_path.clone(),
                    });
                    decision.renamed = Some(true);
                    to_path
                }
                None => current.path.clone(),
            };

            let changes = diff_attributes(desired, current);
            if !changes.is_empty() {
                if owned {
                    let names: Vec<&str> = changes.keys().map(|k| k.name()).collect();
                    decision.warnings.push(format!(
                        "Modifying {} of a LUN owned by a SAN application is not supported.",
                        names.join(", ")
                    ));
                } else {
                    plan_updates(&path, &changes, decision);
                }
            }
            decision.modify = Some(changes);
        }
    }
    Ok(())
}

/// Pick the record to reconcile and, for a rename, its destination path.
///
/// | current | from_name | from_current | result                  |
/// |---------|-----------|--------------|-------------------------|
/// | some    | any       | any          | current, no rename      |
/// | none    | some      | some         | from_current, rename    |
/// | none    | some      | none         | rename source missing   |
/// | none    | none      | any          | none                    |
///
/// Renames are only considered when the LUN should be present.
fn resolve_rename<'a>(
    desired: &DesiredState,
    discovered: &'a Discovered,
) -> Result<(Option<&'a CurrentRecord>, Option<String>)> {
    if let Some(current) = &discovered.current {
        return Ok((Some(current), None));
    }
    let from_name = match (&desired.from_name, desired.state) {
        (Some(from_name), LunState::Present) => from_name,
        _ => return Ok((None, None)),
    };
    let source = discovered
        .from_current
        .as_ref()
        .ok_or_else(|| Error::RenameSourceMissing {
            name: from_name.clone(),
        })?;

    if final_segment(&source.path) != final_segment(from_name) {
        return Err(Error::RenamePathMismatch {
            name: from_name.clone(),
            path: source.path.clone(),
        });
    }
    let to_path = replace_final_segment(&source.path, final_segment(&desired.name));
    Ok((Some(source), Some(to_path)))
}

fn require_size(desired: &DesiredState) -> Result<u64> {
    desired.size.ok_or_else(|| Error::MissingParameter {
        parameter: "size".into(),
        action: "create".into(),
    })
}

/// Attributes whose desired value differs from what the controller reports.
///
/// Flags the controller did not report are treated as unknown and skipped.
pub fn diff_attributes(desired: &DesiredState, current: &CurrentRecord) -> AttributeChanges {
    let mut changes = AttributeChanges::new();
    for kind in AttributeKind::ALL {
        let change = match kind {
            AttributeKind::Size => desired
                .size
                .filter(|size| *size != current.size)
                .map(AttributeValue::Bytes),
            AttributeKind::SpaceReserve => current
                .space_reserve
                .filter(|flag| *flag != desired.space_reserve)
                .map(|_| AttributeValue::Flag(desired.space_reserve)),
            AttributeKind::SpaceAllocation => current
                .space_allocation
                .filter(|flag| *flag != desired.space_allocation)
                .map(|_| AttributeValue::Flag(desired.space_allocation)),
            AttributeKind::OsType => text_change(&desired.os_type, &current.os_type),
            AttributeKind::QosPolicyGroup => {
                text_change(&desired.qos_policy_group, &current.qos_policy_group)
            }
        };
        if let Some(value) = change {
            changes.insert(kind, value);
        }
    }
    changes
}

fn text_change(desired: &Option<String>, current: &Option<String>) -> Option<AttributeValue> {
    match desired {
        Some(value) if current.as_ref() != Some(value) => Some(AttributeValue::Text(value.clone())),
        _ => None,
    }
}

/// Resize first, then the remaining attributes as one Modify
fn plan_updates(path: &str, changes: &AttributeChanges, decision: &mut Decision) {
    if let Some(AttributeValue::Bytes(size)) = changes.get(&AttributeKind::Size) {
        decision.actions.push(Action::Resize {
            path: path.to_string(),
            size: *size,
        });
    }
    let rest: Vec<(AttributeKind, AttributeValue)> = changes
        .iter()
        .filter(|(kind, _)| **kind != AttributeKind::Size)
        .map(|(kind, value)| (*kind, value.clone()))
        .collect();
    if !rest.is_empty() {
        decision.actions.push(Action::Modify {
            path: path.to_string(),
            changes: rest,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{ApplicationRecord, ApplicationSpec};
    use assert_matches::assert_matches;

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

    fn app_desired(name: &str) -> DesiredState {
        DesiredState::new(
            name,
            "vs1",
            OwnershipMode::Application(ApplicationSpec {
                name: "app1".into(),
                igroup_name: None,
                lun_count: None,
                storage_service: None,
                protection_type: None,
                tiering: None,
            }),
        )
    }

    fn record(path: &str, size: u64) -> CurrentRecord {
        CurrentRecord {
            path: path.into(),
            name: Some(final_segment(path).into()),
            size,
            space_reserve: Some(true),
            space_allocation: Some(false),
            os_type: Some("linux".into()),
            qos_policy_group: None,
            attachment: None,
        }
    }

    fn found(current: Option<CurrentRecord>) -> Discovered {
        Discovered {
            current,
            ..Default::default()
        }
    }

    #[test]
    fn test_create_standalone() {
        let mut want = desired("L1");
        want.size = Some(5 * GIB);

        let decision = decide(&want, &Discovered::default()).unwrap();
        assert_eq!(
            decision.actions,
            vec![Action::CreateStandalone {
                path: "/vol/V1/L1".into(),
                size: 5_368_709_120,
            }]
        );
        assert!(decision.changed());
    }

    #[test]
    fn test_create_requires_size() {
        let err = decide(&desired("L1"), &Discovered::default()).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "size is a required parameter for create.");
    }

    #[test]
    fn test_absent_and_absent_is_noop() {
        let mut want = desired("L1");
        want.state = LunState::Absent;

        let decision = decide(&want, &Discovered::default()).unwrap();
        assert!(decision.is_noop());
        assert!(!decision.changed());
    }

    #[test]
    fn test_delete_uses_discovered_path() {
        let mut want = desired("L1");
        want.state = LunState::Absent;

        let decision = decide(&want, &found(Some(record("/vol/V1/L1", GIB)))).unwrap();
        assert_eq!(
            decision.actions,
            vec![Action::DeleteStandalone {
                path: "/vol/V1/L1".into()
            }]
        );
    }

    #[test]
    fn test_resize_only() {
        let mut want = desired("L1");
        want.size = Some(5 * GIB);

        let decision = decide(&want, &found(Some(record("/vol/V1/L1", 3 * GIB)))).unwrap();
        assert_eq!(
            decision.actions,
            vec![Action::Resize {
                path: "/vol/V1/L1".into(),
                size: 5 * GIB
            }]
        );
        let modify = decision.modify.unwrap();
        assert_eq!(modify.get(&AttributeKind::Size), Some(&AttributeValue::Bytes(5 * GIB)));
        assert_eq!(modify.len(), 1);
    }

    #[test]
    fn test_matching_state_is_noop() {
        let mut want = desired("L1");
        want.size = Some(GIB);
        want.os_type = Some("linux".into());

        let decision = decide(&want, &found(Some(record("/vol/V1/L1", GIB)))).unwrap();
        assert!(decision.is_noop());
        assert_eq!(decision.modify, Some(AttributeChanges::new()));
    }

    #[test]
    fn test_modify_attributes_in_table_order() {
        let mut want = desired("L1");
        want.size = Some(2 * GIB);
        want.qos_policy_group = Some("gold".into());
        want.space_reserve = false;

        let decision = decide(&want, &found(Some(record("/vol/V1/L1", GIB)))).unwrap();
        assert_eq!(decision.action_names(), vec!["resize", "modify"]);
        assert_matches!(&decision.actions[1], Action::Modify { changes, .. } => {
            assert_eq!(changes, &vec![
                (AttributeKind::SpaceReserve, AttributeValue::Flag(false)),
                (AttributeKind::QosPolicyGroup, AttributeValue::Text("gold".into())),
            ]);
        });
    }

    #[test]
    fn test_unknown_flags_are_skipped() {
        let mut want = desired("L1");
        want.space_allocation = true;
        let mut current = record("/vol/V1/L1", GIB);
        current.space_allocation = None;

        let decision = decide(&want, &found(Some(current))).unwrap();
        assert!(decision.is_noop());
    }

    #[test]
    fn test_rename_reclassifies_create() {
        let mut want = desired("L2");
        want.from_name = Some("L1".into());
        let discovered = Discovered {
            from_current: Some(record("/vol/V1/L1", GIB)),
            ..Default::default()
        };

        let decision = decide(&want, &discovered).unwrap();
        assert_eq!(
            decision.actions,
            vec![Action::Rename {
                from_path: "/vol/V1/L1".into(),
                to_path: "/vol/V1/L2".into(),
            }]
        );
        assert_eq!(decision.renamed, Some(true));
    }

    #[test]
    fn test_rename_then_resize_target_new_path() {
        let mut want = desired("L2");
        want.from_name = Some("L1".into());
        want.size = Some(2 * GIB);
        let discovered = Discovered {
            from_current: Some(record("/vol/V1/L1", GIB)),
            ..Default::default()
        };

        let decision = decide(&want, &discovered).unwrap();
        assert_eq!(decision.action_names(), vec!["rename", "resize"]);
        assert_matches!(&decision.actions[1], Action::Resize { path, .. } if path == "/vol/V1/L2");
    }

    #[test]
    fn test_rename_source_missing() {
        let mut want = desired("L2");
        want.from_name = Some("L1".into());

        let err = decide(&want, &Discovered::default()).unwrap_err();
        assert_matches!(err, Error::RenameSourceMissing { ref name } if name == "L1");
    }

    #[test]
    fn test_rename_path_mismatch() {
        let mut want = desired("L2");
        want.from_name = Some("L1".into());
        let discovered = Discovered {
            from_current: Some(record("/vol/V1/L1_old", GIB)),
            ..Default::default()
        };

        let err = decide(&want, &discovered).unwrap_err();
        assert_matches!(err, Error::RenamePathMismatch { .. });
        assert!(err.is_validation());
    }

    #[test]
    fn test_existing_destination_skips_rename() {
        let mut want = desired("L2");
        want.from_name = Some("L1".into());
        let discovered = Discovered {
            current: Some(record("/vol/V1/L2", GIB)),
            from_current: Some(record("/vol/V1/L1", GIB)),
            ..Default::default()
        };

        let decision = decide(&want, &discovered).unwrap();
        assert!(decision.is_noop());
        assert_eq!(decision.renamed, None);
    }

    #[test]
    fn test_application_create_and_delete() {
        let mut want = app_desired("L1");
        assert!(decide(&want, &Discovered::default()).unwrap_err().is_validation());

        want.size = Some(GIB);
        let decision = decide(&want, &Discovered::default()).unwrap();
        assert_eq!(decision.action_names(), vec!["create_application"]);

        want.state = LunState::Absent;
        let discovered = Discovered {
            application: Some(ApplicationRecord {
                uuid: "u1".into(),
                lun_paths: vec![],
            }),
            ..Default::default()
        };
        let decision = decide(&want, &discovered).unwrap();
        assert_eq!(
            decision.actions,
            vec![Action::DeleteApplication {
                name: "app1".into(),
                uuid: "u1".into()
            }]
        );
    }

    #[test]
    fn test_application_member_changes_downgraded() {
        let mut want = app_desired("L1_1");
        want.size = Some(2 * GIB);
        let discovered = Discovered {
            application: Some(ApplicationRecord {
                uuid: "u1".into(),
                lun_paths: vec!["/vol/app1/L1_1".into()],
            }),
            current: Some(record("/vol/app1/L1_1", GIB)),
            from_current: None,
        };

        let decision = decide(&want, &discovered).unwrap();
        assert!(decision.is_noop());
        assert_eq!(decision.warnings.len(), 1);
        assert!(decision.modify.unwrap().contains_key(&AttributeKind::Size));
    }

    #[test]
    fn test_application_lun_create_downgraded() {
        let mut want = app_desired("extra");
        want.size = Some(GIB);
        let discovered = Discovered {
            application: Some(ApplicationRecord {
                uuid: "u1".into(),
                lun_paths: vec!["/vol/app1/L1_1".into()],
            }),
            ..Default::default()
        };

        let decision = decide(&want, &discovered).unwrap();
        assert!(decision.is_noop());
        assert_eq!(decision.warnings, vec![WARN_ADD_TO_APPLICATION.to_string()]);
    }
}
