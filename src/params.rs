//! Host Parameters
//!
//! The parameter document supplied by the orchestration host, as YAML or
//! JSON, and its normalization into a [`DesiredState`]. Size units are
//! applied here, once.

use crate::domain::model::{
    ApplicationSpec, DesiredState, LunState, OwnershipMode, ProtectionSpec, SizeUnit,
    StorageService, TieringSpec, MAX_APPLICATION_LUN_COUNT,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

// =============================================================================
// Parameter Document
// =============================================================================

/// Desired state for one LUN, as supplied by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LunParams {
    /// Whether the LUN should exist
    #[serde(default)]
    pub state: LunState,

    /// LUN name, or a full `/vol/...` path
    pub name: String,

    /// Existing LUN to rename to `name`
    #[serde(default)]
    pub from_name: Option<String>,

    /// FlexVol holding a standalone LUN
    #[serde(default)]
    pub flexvol_name: Option<String>,

    pub vserver: String,

    /// Size, in `size_unit`
    #[serde(default)]
    pub size: Option<u64>,

    #[serde(default)]
    pub size_unit: SizeUnit,

    #[serde(default = "default_true")]
    pub space_reserve: bool,

    #[serde(default)]
    pub space_allocation: bool,

    #[serde(default = "default_true")]
    pub use_exact_size: bool,

    #[serde(default, alias = "ostype")]
    pub os_type: Option<String>,

    #[serde(default)]
    pub qos_policy_group: Option<String>,

    #[serde(default)]
    pub force_resize: bool,

    #[serde(default)]
    pub force_remove: bool,

    #[serde(default)]
    pub force_remove_fenced: bool,

    /// Provision through a SAN application instead of a FlexVol
    #[serde(default)]
    pub san_application_template: Option<SanApplicationTemplate>,
}

/// `san_application_template` block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SanApplicationTemplate {
    /// Application name
    pub name: String,

    /// When false the template is ignored and the LUN is standalone
    #[serde(default = "default_true")]
    pub use_san_application: bool,

    #[serde(default)]
    pub igroup_name: Option<String>,

    #[serde(default)]
    pub lun_count: Option<u32>,

    #[serde(default)]
    pub storage_service: Option<StorageService>,

    #[serde(default)]
    pub protection_type: Option<ProtectionSpec>,

    #[serde(default)]
    pub tiering: Option<TieringSpec>,
}

fn default_true() -> bool {
    true
}

impl LunParams {
    /// Parse a YAML (or JSON) parameter document
    pub fn from_yaml_str(document: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(document)?)
    }

    /// Load a parameter document from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading parameters from {}", path.display());
        let document = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&document)
    }

    /// Validate and normalize into a [`DesiredState`]
    pub fn into_desired(self) -> Result<DesiredState> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("name must not be empty".into()));
        }
        if self.vserver.trim().is_empty() {
            return Err(Error::Validation("vserver must not be empty".into()));
        }

        let ownership = self.ownership()?;
        let size = self
            .size
            .map(|size| self.size_unit.normalize(size))
            .transpose()?;

        Ok(DesiredState {
            state: self.state,
            name: self.name,
            from_name: self.from_name,
            vserver: self.vserver,
            ownership,
            size,
            space_reserve: self.space_reserve,
            space_allocation: self.space_allocation,
            use_exact_size: self.use_exact_size,
            os_type: self.os_type,
            qos_policy_group: self.qos_policy_group,
            force_resize: self.force_resize,
            force_remove: self.force_remove,
            force_remove_fenced: self.force_remove_fenced,
        })
    }

    /// Exactly one of a FlexVol or an enabled application template
    fn ownership(&self) -> Result<OwnershipMode> {
        let template = self
            .san_application_template
            .as_ref()
            .filter(|template| template.use_san_application);

        match (&self.flexvol_name, template) {
            (Some(_), Some(_)) => Err(Error::Validation(
                "flexvol_name and san_application_template are mutually exclusive".into(),
            )),
            (None, None) => Err(Error::Validation(
                "one of flexvol_name or san_application_template is required".into(),
            )),
            (Some(flexvol_name), None) => Ok(OwnershipMode::Standalone {
                flexvol_name: flexvol_name.clone(),
            }),
            (None, Some(template)) => {
                if let Some(count) = template.lun_count {
                    if count == 0 || count > MAX_APPLICATION_LUN_COUNT {
                        return Err(Error::Validation(format!(
                            "lun_count must be between 1 and {}, got {}",
                            MAX_APPLICATION_LUN_COUNT, count
                        )));
                    }
                }
                Ok(OwnershipMode::Application(ApplicationSpec {
                    name: template.name.clone(),
                    igroup_name: template.igroup_name.clone(),
                    lun_count: template.lun_count,
                    storage_service: template.storage_service,
                    protection_type: template.protection_type.clone(),
                    tiering: template.tiering.clone(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_defaults_and_normalization() {
        let params = LunParams::from_yaml_str(
            r#"
name: L1
vserver: vs1
flexvol_name: V1
size: 5
"#,
        )
        .unwrap();
        let desired = params.into_desired().unwrap();

        assert_eq!(desired.state, LunState::Present);
        assert_eq!(desired.size, Some(5_368_709_120));
        assert!(desired.space_reserve);
        assert!(!desired.space_allocation);
        assert!(desired.use_exact_size);
        assert_eq!(desired.standalone_path().as_deref(), Some("/vol/V1/L1"));
    }

    #[test]
    fn test_explicit_units() {
        for (unit, expected) in [("bytes", 512u64), ("b", 512), ("kb", 512 << 10), ("tb", 512 << 40)] {
            let document = format!(
                "{{\"name\": \"L1\", \"vserver\": \"vs1\", \"flexvol_name\": \"V1\", \"size\": 512, \"size_unit\": \"{}\"}}",
                unit
            );
            let desired = LunParams::from_yaml_str(&document).unwrap().into_desired().unwrap();
            assert_eq!(desired.size, Some(expected), "unit {}", unit);
        }
    }

    #[test]
    fn test_overflowing_size_rejected() {
        let params = LunParams::from_yaml_str(
            "{name: L1, vserver: vs1, flexvol_name: V1, size: 1, size_unit: zb}",
        )
        .unwrap();
        assert!(params.into_desired().unwrap_err().is_validation());
    }

    #[test]
    fn test_ownership_exclusivity() {
        let both = LunParams::from_yaml_str(
            r#"
name: L1
vserver: vs1
flexvol_name: V1
san_application_template:
  name: app1
"#,
        )
        .unwrap();
        assert!(both.into_desired().unwrap_err().is_validation());

        let neither = LunParams::from_yaml_str("{name: L1, vserver: vs1}").unwrap();
        assert!(neither.into_desired().unwrap_err().is_validation());
    }

    #[test]
    fn test_disabled_template_is_standalone() {
        let params = LunParams::from_yaml_str(
            r#"
name: L1
vserver: vs1
flexvol_name: V1
san_application_template:
  name: app1
  use_san_application: false
"#,
        )
        .unwrap();
        let desired = params.into_desired().unwrap();
        assert_eq!(desired.flexvol_name(), Some("V1"));
    }

    #[test]
    fn test_application_template() {
        let params = LunParams::from_yaml_str(
            r#"
name: L1
vserver: vs1
size: 10
os_type: linux
san_application_template:
  name: app1
  lun_count: 4
  storage_service: performance
  protection_type:
    local_policy: default
  tiering:
    control: best_effort
    policy: snapshot-only
    object_stores: [store1]
"#,
        )
        .unwrap();
        let desired = params.into_desired().unwrap();

        let spec = desired.application().unwrap();
        assert_eq!(spec.name, "app1");
        assert_eq!(spec.lun_count, Some(4));
        assert_eq!(spec.storage_service, Some(StorageService::Performance));
        assert_eq!(
            spec.tiering.as_ref().unwrap().object_stores,
            Some(vec!["store1".to_string()])
        );
    }

    #[test]
    fn test_lun_count_range() {
        let params = LunParams::from_yaml_str(
            "{name: L1, vserver: vs1, san_application_template: {name: app1, lun_count: 33}}",
        )
        .unwrap();
        assert_matches!(params.into_desired(), Err(Error::Validation(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = LunParams::from_yaml_str("{name: L1, vserver: vs1, flexvol: V1}").unwrap_err();
        assert_matches!(err, Error::YamlParse(_));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"name": "L1", "vserver": "vs1", "flexvol_name": "V1", "state": "absent", "ostype": "windows"}}"#
        )
        .unwrap();

        let params = LunParams::from_file(file.path()).unwrap();
        assert_eq!(params.state, LunState::Absent);
        assert_eq!(params.os_type.as_deref(), Some("windows"));
    }
}
