//! In-Memory Storage Controller
//!
//! Simulates the subset of a storage controller the reconciler talks to:
//! ZAPI LUN commands, EMS logging and SAN applications. Every call is
//! recorded so tests can assert on what was (or was not) issued.

use crate::domain::element::{zapi_bool, ZapiElement};
use crate::domain::ports::{
    ApplicationBody, ApplicationGateway, BackingLun, BackingStorage, ManagementGateway,
};
use crate::error::{Error, Result, ZAPI_ERRNO_LUN_SIZE_UNCHANGED};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Errno for a command the simulator does not implement
pub const ERRNO_NO_SUCH_API: &str = "13005";
/// Errno for an unknown LUN path
pub const ERRNO_NO_SUCH_LUN: &str = "9017";
/// Errno for a path that is already taken
pub const ERRNO_LUN_EXISTS: &str = "9012";
/// Errno for destroying a mapped LUN without force
pub const ERRNO_LUN_MAPPED: &str = "9016";
/// Errno for shrinking a LUN without force
pub const ERRNO_SHRINK_NOT_FORCED: &str = "9041";

// =============================================================================
// Simulated LUN
// =============================================================================

/// A LUN held by the simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedLun {
    pub path: String,
    pub size: u64,
    pub space_reserve: bool,
    pub space_allocation: bool,
    pub os_type: String,
    pub qos_policy_group: Option<String>,
    /// Initiator group and LUN id, when mapped
    pub mapping: Option<(String, u32)>,
}

impl SimulatedLun {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            space_reserve: true,
            space_allocation: false,
            os_type: "linux".to_string(),
            qos_policy_group: None,
            mapping: None,
        }
    }

    pub fn with_qos(mut self, policy: impl Into<String>) -> Self {
        self.qos_policy_group = Some(policy.into());
        self
    }

    pub fn with_os_type(mut self, os_type: impl Into<String>) -> Self {
        self.os_type = os_type.into();
        self
    }

    pub fn mapped_to(mut self, igroup: impl Into<String>, lun_id: u32) -> Self {
        self.mapping = Some((igroup.into(), lun_id));
        self
    }

    /// Volume name from `/vol/<volume>/<lun>`
    pub fn volume(&self) -> &str {
        self.path
            .trim_start_matches("/vol/")
            .split('/')
            .next()
            .unwrap_or_default()
    }

    fn to_zapi(&self, vserver: &str) -> ZapiElement {
        let mut info = ZapiElement::new("lun-info")
            .child_value("path", &self.path)
            .child_value("vserver", vserver)
            .child_value("volume", self.volume())
            .child_value("size", self.size)
            .child_value("is-space-reservation-enabled", zapi_bool(self.space_reserve))
            .child_value("is-space-alloc-enabled", zapi_bool(self.space_allocation))
            .child_value("multiprotocol-type", &self.os_type)
            .child_value("mapped", zapi_bool(self.mapping.is_some()));
        if let Some(qos) = &self.qos_policy_group {
            info.add_child_value("qos-policy-group", qos);
        }
        info
    }
}

#[derive(Debug, Clone)]
struct SimulatedApplication {
    uuid: String,
    name: String,
    lun_paths: Vec<String>,
}

#[derive(Debug)]
struct ControllerState {
    vserver: String,
    luns: BTreeMap<String, SimulatedLun>,
    applications: BTreeMap<String, SimulatedApplication>,
    calls: Vec<String>,
    failures: BTreeMap<String, (String, String)>,
    page_size: usize,
    size_granularity: u64,
    next_id: u64,
}

// =============================================================================
// In-Memory Controller
// =============================================================================

/// Simulated storage controller serving one vserver
#[derive(Debug, Clone)]
pub struct InMemoryController {
    state: Arc<RwLock<ControllerState>>,
}

impl InMemoryController {
    /// Create an empty controller for `vserver`
    pub fn new(vserver: impl Into<String>) -> Self {
        Self {
            state: Arc::new(RwLock::new(ControllerState {
                vserver: vserver.into(),
                luns: BTreeMap::new(),
                applications: BTreeMap::new(),
                calls: Vec::new(),
                failures: BTreeMap::new(),
                page_size: 100,
                size_granularity: 1,
                next_id: 1,
            })),
        }
    }

    /// Records per `lun-get-iter` page
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.state.write().page_size = page_size.max(1);
        self
    }

    /// Sizes are rounded up to a multiple of this many bytes
    pub fn with_size_granularity(self, granularity: u64) -> Self {
        self.state.write().size_granularity = granularity.max(1);
        self
    }

    pub fn insert_lun(&self, lun: SimulatedLun) {
        self.state.write().luns.insert(lun.path.clone(), lun);
    }

    /// Register an existing SAN application owning `lun_paths`
    pub fn insert_application(&self, name: impl Into<String>, luns: Vec<SimulatedLun>) -> String {
        let mut state = self.state.write();
        let uuid = format!("app-{}", state.next_id);
        state.next_id += 1;
        let name = name.into();
        let lun_paths = luns.iter().map(|l| l.path.clone()).collect();
        for lun in luns {
            state.luns.insert(lun.path.clone(), lun);
        }
        state.applications.insert(
            name.clone(),
            SimulatedApplication {
                uuid: uuid.clone(),
                name,
                lun_paths,
            },
        );
        uuid
    }

    /// Make every call to `command` fail with the given errno
    pub fn fail_command(&self, command: &str, code: &str, message: &str) {
        self.state
            .write()
            .failures
            .insert(command.to_string(), (code.to_string(), message.to_string()));
    }

    pub fn lun(&self, path: &str) -> Option<SimulatedLun> {
        self.state.read().luns.get(path).cloned()
    }

    pub fn lun_paths(&self) -> Vec<String> {
        self.state.read().luns.keys().cloned().collect()
    }

    pub fn has_application(&self, name: &str) -> bool {
        self.state.read().applications.contains_key(name)
    }

    /// Commands issued so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.state.read().calls.clone()
    }

    /// Commands issued so far that change controller state
    pub fn mutating_commands(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| is_mutating(c))
            .collect()
    }

    pub fn clear_commands(&self) {
        self.state.write().calls.clear();
    }

    /// REST gateway for one application on this controller
    pub fn application(&self, name: impl Into<String>) -> InMemoryApplicationGateway {
        InMemoryApplicationGateway {
            controller: self.clone(),
            name: name.into(),
            vserver: self.state.read().vserver.clone(),
        }
    }

    fn record_call(&self, call: &str) -> Result<()> {
        let mut state = self.state.write();
        state.calls.push(call.to_string());
        match state.failures.get(call) {
            Some((code, message)) => Err(zapi_error(call, code, message)),
            None => Ok(()),
        }
    }
}

fn is_mutating(call: &str) -> bool {
    !matches!(
        call,
        "lun-get-iter"
            | "lun-map-list-info"
            | "ems-autosupport-log"
            | "rest:application_uuid"
            | "rest:application_details"
            | "rest:backing_storage"
    )
}

fn zapi_error(command: &str, code: &str, message: &str) -> Error {
    Error::Zapi {
        command: command.to_string(),
        code: code.to_string(),
        message: message.to_string(),
    }
}

fn required<'a>(request: &'a ZapiElement, name: &str) -> Result<&'a str> {
    request.child_content(name).ok_or_else(|| {
        zapi_error(
            request.name(),
            "13115",
            &format!("Invalid input: missing {}", name),
        )
    })
}

fn required_u64(request: &ZapiElement, name: &str) -> Result<u64> {
    request.child_u64(name).ok_or_else(|| {
        zapi_error(
            request.name(),
            "13115",
            &format!("Invalid input: {} is not a number", name),
        )
    })
}

fn round_up(size: u64, granularity: u64) -> u64 {
    size.div_ceil(granularity).saturating_mul(granularity)
}

impl ControllerState {
    fn lun_mut(&mut self, command: &str, path: &str) -> Result<&mut SimulatedLun> {
        self.luns
            .get_mut(path)
            .ok_or_else(|| zapi_error(command, ERRNO_NO_SUCH_LUN, &format!("LUN {} does not exist", path)))
    }

    fn lun_get_iter(&self, request: &ZapiElement) -> Result<ZapiElement> {
        let info = request.child("query").and_then(|q| q.child("lun-info"));
        let vserver = info.and_then(|i| i.child_content("vserver"));
        let volume = info.and_then(|i| i.child_content("volume"));
        let path = info.and_then(|i| i.child_content("path"));

        let matching: Vec<&SimulatedLun> = self
            .luns
            .values()
            .filter(|_| vserver.map_or(true, |v| v == self.vserver))
            .filter(|lun| volume.map_or(true, |v| lun.volume() == v))
            .filter(|lun| path.map_or(true, |p| lun.path == p))
            .collect();

        let start = match request.child_content("tag") {
            Some(tag) => tag
                .parse::<usize>()
                .map_err(|_| zapi_error("lun-get-iter", "13115", "Invalid tag"))?,
            None => 0,
        };
        let page: Vec<&SimulatedLun> = matching
            .iter()
            .skip(start)
            .take(self.page_size)
            .copied()
            .collect();

        let mut results = ZapiElement::new("results").child_value("num-records", page.len());
        if !page.is_empty() {
            let mut list = ZapiElement::new("attributes-list");
            for lun in &page {
                list.add_child(lun.to_zapi(&self.vserver));
            }
            results.add_child(list);
        }
        if start + page.len() < matching.len() {
            results.add_child_value("next-tag", start + page.len());
        }
        Ok(results)
    }

    fn lun_map_list_info(&self, request: &ZapiElement) -> Result<ZapiElement> {
        let path = required(request, "path")?;
        let lun = self
            .luns
            .get(path)
            .ok_or_else(|| zapi_error(request.name(), ERRNO_NO_SUCH_LUN, "LUN does not exist"))?;

        let mut groups = ZapiElement::new("initiator-groups");
        if let Some((igroup, lun_id)) = &lun.mapping {
            groups.add_child(
                ZapiElement::new("initiator-group-info")
                    .child_value("initiator-group-name", igroup)
                    .child_value("lun-id", lun_id),
            );
        }
        Ok(ZapiElement::new("results").child_element(groups))
    }

    fn lun_create_by_size(&mut self, request: &ZapiElement) -> Result<ZapiElement> {
        let path = required(request, "path")?.to_string();
        if self.luns.contains_key(&path) {
            return Err(zapi_error(request.name(), ERRNO_LUN_EXISTS, "LUN already exists"));
        }
        let size = round_up(required_u64(request, "size")?, self.size_granularity);

        let mut lun = SimulatedLun::new(path.clone(), size);
        lun.space_reserve = request.child_bool("space-reservation-enabled").unwrap_or(true);
        lun.space_allocation = request.child_bool("space-allocation-enabled").unwrap_or(false);
        if let Some(os_type) = request.child_content("ostype") {
            lun.os_type = os_type.to_string();
        }
        lun.qos_policy_group = request.child_content("qos-policy-group").map(str::to_string);
        self.luns.insert(path, lun);

        Ok(ZapiElement::new("results").child_value("actual-size", size))
    }

    fn lun_destroy(&mut self, request: &ZapiElement) -> Result<ZapiElement> {
        let path = required(request, "path")?.to_string();
        let force = request.child_bool("force").unwrap_or(false);
        let lun = self.lun_mut(request.name(), &path)?;
        if lun.mapping.is_some() && !force {
            return Err(zapi_error(request.name(), ERRNO_LUN_MAPPED, "LUN is mapped and online"));
        }
        self.luns.remove(&path);
        Ok(ZapiElement::new("results"))
    }

    fn lun_resize(&mut self, request: &ZapiElement) -> Result<ZapiElement> {
        let command = request.name().to_string();
        let path = required(request, "path")?.to_string();
        let force = request.child_bool("force").unwrap_or(false);
        let size = round_up(required_u64(request, "size")?, self.size_granularity);
        let lun = self.lun_mut(&command, &path)?;

        if size == lun.size {
            return Err(zapi_error(
                &command,
                ZAPI_ERRNO_LUN_SIZE_UNCHANGED,
                "New LUN size is the same as the old LUN size",
            ));
        }
        if size < lun.size && !force {
            return Err(zapi_error(
                &command,
                ERRNO_SHRINK_NOT_FORCED,
                "Reducing LUN size requires force",
            ));
        }
        lun.size = size;
        Ok(ZapiElement::new("results").child_value("actual-size", size))
    }

    fn lun_move(&mut self, request: &ZapiElement) -> Result<ZapiElement> {
        let path = required(request, "path")?.to_string();
        let new_path = required(request, "new-path")?.to_string();
        if self.luns.contains_key(&new_path) {
            return Err(zapi_error(request.name(), ERRNO_LUN_EXISTS, "Destination LUN already exists"));
        }
        let mut lun = self
            .luns
            .remove(&path)
            .ok_or_else(|| zapi_error(request.name(), ERRNO_NO_SUCH_LUN, "LUN does not exist"))?;
        lun.path = new_path.clone();
        self.luns.insert(new_path.clone(), lun);
        for app in self.applications.values_mut() {
            for member in app.lun_paths.iter_mut().filter(|p| **p == path) {
                *member = new_path.clone();
            }
        }
        Ok(ZapiElement::new("results"))
    }

    /// `enable` carries the negation of the flag the LUN reports
    fn lun_set_flag(&mut self, request: &ZapiElement) -> Result<ZapiElement> {
        let command = request.name().to_string();
        let path = required(request, "path")?.to_string();
        let enable = request
            .child_bool("enable")
            .ok_or_else(|| zapi_error(&command, "13115", "Invalid input: enable"))?;
        let lun = self.lun_mut(&command, &path)?;
        if command == "lun-set-space-alloc" {
            lun.space_allocation = !enable;
        } else {
            lun.space_reserve = !enable;
        }
        Ok(ZapiElement::new("results"))
    }

    fn lun_set_qos(&mut self, request: &ZapiElement) -> Result<ZapiElement> {
        let command = request.name().to_string();
        let path = required(request, "path")?.to_string();
        let policy = request.child_content("qos-policy-group").map(str::to_string);
        let lun = self.lun_mut(&command, &path)?;
        lun.qos_policy_group = policy;
        Ok(ZapiElement::new("results"))
    }
}

#[async_trait]
impl ManagementGateway for InMemoryController {
    async fn invoke(&self, request: ZapiElement) -> Result<ZapiElement> {
        let command = request.name().to_string();
        debug!("Simulated ZAPI: {}", command);
        self.record_call(&command)?;

        let mut state = self.state.write();
        match command.as_str() {
            "lun-get-iter" => state.lun_get_iter(&request),
            "lun-map-list-info" => state.lun_map_list_info(&request),
            "lun-create-by-size" => state.lun_create_by_size(&request),
            "lun-destroy" => state.lun_destroy(&request),
            "lun-resize" => state.lun_resize(&request),
            "lun-move" => state.lun_move(&request),
            "lun-set-space-reservation-info" | "lun-set-space-alloc" => state.lun_set_flag(&request),
            "lun-set-qos-policy-group" => state.lun_set_qos(&request),
            "ems-autosupport-log" => Ok(ZapiElement::new("results")),
            other => Err(zapi_error(other, ERRNO_NO_SUCH_API, &format!("Unable to find API: {}", other))),
        }
    }

    fn gateway_name(&self) -> &str {
        "memory"
    }
}

// =============================================================================
// In-Memory Application Gateway
// =============================================================================

/// REST application gateway backed by an [`InMemoryController`]
#[derive(Debug, Clone)]
pub struct InMemoryApplicationGateway {
    controller: InMemoryController,
    name: String,
    vserver: String,
}

#[async_trait]
impl ApplicationGateway for InMemoryApplicationGateway {
    fn application_name(&self) -> &str {
        &self.name
    }

    fn vserver(&self) -> &str {
        &self.vserver
    }

    async fn application_uuid(&self) -> Result<Option<String>> {
        self.controller.record_call("rest:application_uuid")?;
        let state = self.controller.state.read();
        Ok(state.applications.get(&self.name).map(|a| a.uuid.clone()))
    }

    async fn application_details(&self) -> Result<Option<serde_json::Value>> {
        self.controller.record_call("rest:application_details")?;
        let state = self.controller.state.read();
        Ok(state.applications.get(&self.name).map(|a| {
            json!({
                "uuid": a.uuid,
                "name": a.name,
                "svm": {"name": state.vserver},
                "template": {"name": "san"},
            })
        }))
    }

    async fn backing_storage(&self) -> Result<Option<BackingStorage>> {
        self.controller.record_call("rest:backing_storage")?;
        let state = self.controller.state.read();
        Ok(state.applications.get(&self.name).map(|a| BackingStorage {
            luns: a
                .lun_paths
                .iter()
                .map(|path| BackingLun {
                    path: path.clone(),
                    uuid: None,
                })
                .collect(),
        }))
    }

    async fn create_application(&self, body: &ApplicationBody) -> Result<()> {
        self.controller.record_call("rest:create_application")?;
        let mut state = self.controller.state.write();
        if state.applications.contains_key(&body.name) {
            return Err(Error::Rest {
                method: "POST".into(),
                endpoint: "application/applications".into(),
                status: 409,
                code: Some("917927".into()),
                message: format!("application {} already exists", body.name),
            });
        }

        let mut lun_paths = Vec::new();
        let mut luns = Vec::new();
        for component in body.san.iter().flat_map(|san| san.application_components.iter()) {
            let count = component.lun_count.max(1);
            let each = component.total_size / u64::from(count);
            for index in 1..=count {
                let path = format!("/vol/{}/{}_{}", body.name, component.name, index);
                let mut lun = SimulatedLun::new(path.clone(), each);
                if let Some(os_type) = &component.os_type {
                    lun.os_type = os_type.clone();
                }
                if let Some(qos) = &component.qos {
                    lun.qos_policy_group = Some(qos.policy.name.clone());
                }
                lun_paths.push(path);
                luns.push(lun);
            }
        }

        let uuid = format!("app-{}", state.next_id);
        state.next_id += 1;
        for lun in luns {
            state.luns.insert(lun.path.clone(), lun);
        }
        state.applications.insert(
            body.name.clone(),
            SimulatedApplication {
                uuid,
                name: body.name.clone(),
                lun_paths,
            },
        );
        Ok(())
    }

    async fn delete_application(&self) -> Result<()> {
        self.controller.record_call("rest:delete_application")?;
        let mut state = self.controller.state.write();
        let app = state.applications.remove(&self.name).ok_or_else(|| Error::Rest {
            method: "DELETE".into(),
            endpoint: "application/applications".into(),
            status: 404,
            code: None,
            message: format!("application {} not found", self.name),
        })?;
        for path in app.lun_paths {
            state.luns.remove(&path);
        }
        Ok(())
    }
}
