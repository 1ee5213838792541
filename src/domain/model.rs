//! Domain Model - desired and observed LUN state
//!
//! `DesiredState` is built once per invocation from host parameters and is
//! never mutated afterwards. `CurrentRecord` and `ApplicationRecord` are
//! fetched fresh from the controller on every invocation.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// =============================================================================
// Desired Lifecycle State
// =============================================================================

/// Whether the LUN should exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LunState {
    #[default]
    Present,
    Absent,
}

impl std::fmt::Display for LunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LunState::Present => write!(f, "present"),
            LunState::Absent => write!(f, "absent"),
        }
    }
}

// =============================================================================
// Size Units
// =============================================================================

/// Unit a host-supplied size is expressed in (powers of two)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnit {
    #[serde(alias = "b")]
    Bytes,
    Kb,
    Mb,
    #[default]
    Gb,
    Tb,
    Pb,
    Eb,
    Zb,
    Yb,
}

impl SizeUnit {
    /// All supported units, smallest first
    pub const ALL: [SizeUnit; 9] = [
        SizeUnit::Bytes,
        SizeUnit::Kb,
        SizeUnit::Mb,
        SizeUnit::Gb,
        SizeUnit::Tb,
        SizeUnit::Pb,
        SizeUnit::Eb,
        SizeUnit::Zb,
        SizeUnit::Yb,
    ];

    /// Power of two this unit stands for
    pub fn exponent(self) -> u32 {
        match self {
            SizeUnit::Bytes => 0,
            SizeUnit::Kb => 10,
            SizeUnit::Mb => 20,
            SizeUnit::Gb => 30,
            SizeUnit::Tb => 40,
            SizeUnit::Pb => 50,
            SizeUnit::Eb => 60,
            SizeUnit::Zb => 70,
            SizeUnit::Yb => 80,
        }
    }

    /// Bytes per unit; zb and yb do not fit in 64 bits
    pub fn multiplier(self) -> u128 {
        1u128 << self.exponent()
    }

    /// Convert `size` units into bytes
    pub fn normalize(self, size: u64) -> Result<u64> {
        (size as u128)
            .checked_mul(self.multiplier())
            .and_then(|bytes| u64::try_from(bytes).ok())
            .ok_or_else(|| Error::SizeOverflow {
                size,
                unit: self.to_string(),
            })
    }
}

impl std::fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SizeUnit::Bytes => "bytes",
            SizeUnit::Kb => "kb",
            SizeUnit::Mb => "mb",
            SizeUnit::Gb => "gb",
            SizeUnit::Tb => "tb",
            SizeUnit::Pb => "pb",
            SizeUnit::Eb => "eb",
            SizeUnit::Zb => "zb",
            SizeUnit::Yb => "yb",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for SizeUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "bytes" | "b" => Ok(SizeUnit::Bytes),
            "kb" => Ok(SizeUnit::Kb),
            "mb" => Ok(SizeUnit::Mb),
            "gb" => Ok(SizeUnit::Gb),
            "tb" => Ok(SizeUnit::Tb),
            "pb" => Ok(SizeUnit::Pb),
            "eb" => Ok(SizeUnit::Eb),
            "zb" => Ok(SizeUnit::Zb),
            "yb" => Ok(SizeUnit::Yb),
            other => Err(Error::UnsupportedUnit(other.to_string())),
        }
    }
}

// =============================================================================
// Application Template
// =============================================================================

/// Performance service level of the volume backing an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageService {
    Value,
    Performance,
    Extreme,
}

/// Tiering placement rule for the application container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieringControl {
    Required,
    BestEffort,
    Disallowed,
}

/// Cloud tiering policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TieringPolicy {
    #[serde(rename = "all")]
    All,
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "none")]
    None,
    #[serde(rename = "snapshot-only")]
    SnapshotOnly,
}

/// Tiering options, only used on create
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieringSpec {
    #[serde(default)]
    pub control: Option<TieringControl>,
    #[serde(default)]
    pub policy: Option<TieringPolicy>,
    #[serde(default)]
    pub object_stores: Option<Vec<String>>,
}

/// Snapshot protection for the volume supporting the LUNs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_policy: Option<String>,
}

/// A SAN application grouping that provisions one or more LUNs as a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSpec {
    /// Application name
    pub name: String,
    /// Initiator group the application LUNs are mapped to
    #[serde(default)]
    pub igroup_name: Option<String>,
    /// Number of LUNs in the single application component
    #[serde(default)]
    pub lun_count: Option<u32>,
    /// Performance service level
    #[serde(default)]
    pub storage_service: Option<StorageService>,
    /// Snapshot protection
    #[serde(default)]
    pub protection_type: Option<ProtectionSpec>,
    /// Cloud tiering
    #[serde(default)]
    pub tiering: Option<TieringSpec>,
}

/// Maximum LUNs in one application component
pub const MAX_APPLICATION_LUN_COUNT: u32 = 32;

// =============================================================================
// Ownership
// =============================================================================

/// Who owns the LUN: a plain volume, or an application grouping
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnershipMode {
    /// LUN lives directly in a FlexVol
    Standalone { flexvol_name: String },
    /// LUN is provisioned through a SAN application template
    Application(ApplicationSpec),
}

impl OwnershipMode {
    pub fn is_application(&self) -> bool {
        matches!(self, OwnershipMode::Application(_))
    }
}

// =============================================================================
// Desired State
// =============================================================================

/// Normalized desired state for one LUN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    pub state: LunState,
    /// Short LUN name, or a full path
    pub name: String,
    /// Previous name, when renaming
    pub from_name: Option<String>,
    pub vserver: String,
    pub ownership: OwnershipMode,
    /// Size in bytes
    pub size: Option<u64>,
    pub space_reserve: bool,
    pub space_allocation: bool,
    pub use_exact_size: bool,
    pub os_type: Option<String>,
    pub qos_policy_group: Option<String>,
    pub force_resize: bool,
    pub force_remove: bool,
    pub force_remove_fenced: bool,
}

impl DesiredState {
    /// New present-state LUN with the documented defaults
    pub fn new(name: impl Into<String>, vserver: impl Into<String>, ownership: OwnershipMode) -> Self {
        Self {
            state: LunState::Present,
            name: name.into(),
            from_name: None,
            vserver: vserver.into(),
            ownership,
            size: None,
            space_reserve: true,
            space_allocation: false,
            use_exact_size: true,
            os_type: None,
            qos_policy_group: None,
            force_resize: false,
            force_remove: false,
            force_remove_fenced: false,
        }
    }

    pub fn is_present(&self) -> bool {
        self.state == LunState::Present
    }

    /// FlexVol name, for standalone LUNs
    pub fn flexvol_name(&self) -> Option<&str> {
        match &self.ownership {
            OwnershipMode::Standalone { flexvol_name } => Some(flexvol_name),
            OwnershipMode::Application(_) => None,
        }
    }

    /// Application template, for application-owned LUNs
    pub fn application(&self) -> Option<&ApplicationSpec> {
        match &self.ownership {
            OwnershipMode::Application(spec) => Some(spec),
            OwnershipMode::Standalone { .. } => None,
        }
    }

    /// Path a standalone LUN is created at
    pub fn standalone_path(&self) -> Option<String> {
        self.flexvol_name().map(|vol| volume_lun_path(vol, &self.name))
    }
}

// =============================================================================
// Observed State
// =============================================================================

/// Host mapping of a LUN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Initiator group name
    pub igroup: String,
    /// LUN id as seen by the initiator group
    pub lun_id: Option<u32>,
}

/// A LUN as reported by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentRecord {
    pub path: String,
    pub name: Option<String>,
    /// Size in bytes
    pub size: u64,
    pub space_reserve: Option<bool>,
    pub space_allocation: Option<bool>,
    pub os_type: Option<String>,
    pub qos_policy_group: Option<String>,
    /// Only populated when the LUN is mapped
    pub attachment: Option<Attachment>,
}

impl CurrentRecord {
    pub fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }
}

/// An application grouping as reported by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub uuid: String,
    /// Member LUN paths from the backing storage, in controller order
    pub lun_paths: Vec<String>,
}

impl ApplicationRecord {
    /// First member path ending in `/<name>`
    pub fn lun_path_for(&self, name: &str) -> Option<&str> {
        let suffix = format!("/{}", name);
        self.lun_paths
            .iter()
            .map(String::as_str)
            .find(|path| path.ends_with(&suffix))
    }
}

// =============================================================================
// Attributes
// =============================================================================

/// Mutable LUN attributes tracked by the diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Size,
    SpaceReserve,
    SpaceAllocation,
    OsType,
    QosPolicyGroup,
}

/// How a single attribute is set on the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeDescriptor {
    /// ZAPI command
    pub command: &'static str,
    /// Element carrying the new value
    pub value_element: &'static str,
    /// The element takes the logical negation of the stored flag
    pub inverted: bool,
}

const ATTRIBUTE_TABLE: [(AttributeKind, Option<AttributeDescriptor>); 5] = [
    (AttributeKind::Size, None),
    (
        AttributeKind::SpaceReserve,
        Some(AttributeDescriptor {
            command: "lun-set-space-reservation-info",
            value_element: "enable",
            inverted: true,
        }),
    ),
    (
        AttributeKind::SpaceAllocation,
        Some(AttributeDescriptor {
            command: "lun-set-space-alloc",
            value_element: "enable",
            inverted: true,
        }),
    ),
    (AttributeKind::OsType, None),
    (
        AttributeKind::QosPolicyGroup,
        Some(AttributeDescriptor {
            command: "lun-set-qos-policy-group",
            value_element: "qos-policy-group",
            inverted: false,
        }),
    ),
];

impl AttributeKind {
    /// Diff order
    pub const ALL: [AttributeKind; 5] = [
        AttributeKind::Size,
        AttributeKind::SpaceReserve,
        AttributeKind::SpaceAllocation,
        AttributeKind::OsType,
        AttributeKind::QosPolicyGroup,
    ];

    /// Host-facing parameter name
    pub fn name(self) -> &'static str {
        match self {
            AttributeKind::Size => "size",
            AttributeKind::SpaceReserve => "space_reserve",
            AttributeKind::SpaceAllocation => "space_allocation",
            AttributeKind::OsType => "os_type",
            AttributeKind::QosPolicyGroup => "qos_policy_group",
        }
    }

    /// Single-attribute set call, `None` when there is no in-place setter
    pub fn descriptor(self) -> Option<AttributeDescriptor> {
        ATTRIBUTE_TABLE
            .iter()
            .find(|(kind, _)| *kind == self)
            .and_then(|(_, descriptor)| *descriptor)
    }
}

impl std::fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// New value for a changed attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bytes(u64),
    Flag(bool),
    Text(String),
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::Bytes(v) => write!(f, "{}", v),
            AttributeValue::Flag(v) => write!(f, "{}", v),
            AttributeValue::Text(v) => write!(f, "{}", v),
        }
    }
}

// =============================================================================
// Path Helpers
// =============================================================================

/// `/vol/<volume>/<name>`
pub fn volume_lun_path(volume: &str, name: &str) -> String {
    format!("/vol/{}/{}", volume, name)
}

/// Last `/`-separated segment of a path
pub fn final_segment(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, tail)| tail).unwrap_or(path)
}

/// Replace the last segment of `path` with `name`
pub fn replace_final_segment(path: &str, name: &str) -> String {
    match path.rsplit_once('/') {
        Some((head, _)) => format!("{}/{}", head, name),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_all_units() {
        for unit in SizeUnit::ALL {
            let expected = 7u128 * unit.multiplier();
            match unit.normalize(7) {
                Ok(bytes) => assert_eq!(bytes as u128, expected, "unit {}", unit),
                Err(err) => {
                    assert!(expected > u64::MAX as u128, "unit {} failed: {}", unit, err);
                }
            }
        }
        assert_eq!(SizeUnit::Gb.normalize(5).unwrap(), 5_368_709_120);
        assert_eq!(SizeUnit::Bytes.normalize(512).unwrap(), 512);
    }

    #[test]
    fn test_normalize_overflow() {
        assert!(SizeUnit::Zb.normalize(1).is_err());
        assert!(SizeUnit::Eb.normalize(16).is_err());
        assert_eq!(SizeUnit::Eb.normalize(15).unwrap(), 15 << 60);
    }

    #[test]
    fn test_size_unit_parse() {
        assert_eq!("b".parse::<SizeUnit>().unwrap(), SizeUnit::Bytes);
        assert_eq!("MB".parse::<SizeUnit>().unwrap(), SizeUnit::Mb);
        assert!("kib".parse::<SizeUnit>().is_err());
    }

    #[test]
    fn test_attribute_table() {
        let reserve = AttributeKind::SpaceReserve.descriptor().unwrap();
        assert_eq!(reserve.command, "lun-set-space-reservation-info");
        assert!(reserve.inverted);

        let qos = AttributeKind::QosPolicyGroup.descriptor().unwrap();
        assert_eq!(qos.value_element, "qos-policy-group");
        assert!(!qos.inverted);

        assert!(AttributeKind::OsType.descriptor().is_none());
        assert!(AttributeKind::Size.descriptor().is_none());
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(volume_lun_path("V1", "L1"), "/vol/V1/L1");
        assert_eq!(final_segment("/vol/V1/L1"), "L1");
        assert_eq!(final_segment("L1"), "L1");
        assert_eq!(replace_final_segment("/vol/V1/old", "new"), "/vol/V1/new");
    }

    #[test]
    fn test_application_path_match() {
        let app = ApplicationRecord {
            uuid: "a1".into(),
            lun_paths: vec!["/vol/san_app/lun_1".into(), "/vol/san_app/lun".into()],
        };
        assert_eq!(app.lun_path_for("lun"), Some("/vol/san_app/lun"));
        assert_eq!(app.lun_path_for("lun_1"), Some("/vol/san_app/lun_1"));
        assert_eq!(app.lun_path_for("un"), None);
    }
}
