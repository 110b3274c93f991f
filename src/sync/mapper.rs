//! Tree-to-downstream translation.
//!
//! # Responsibilities
//! - Walk the validated config tree and derive per-endpoint JSON documents
//! - Push device-group, network-slice and UPF documents downstream,
//!   consulting the push cache first
//! - Reconcile deletions synchronously for the Set path
//!
//! # Design Decisions
//! - One engine parameterized by the `SchemaMapper` trait; alternative
//!   downstream schemas plug in at construction time
//! - A model object missing required data is skipped and logged; it never
//!   aborts the rest of the reconciliation
//! - Per-target push failures are isolated and counted; the aggregate
//!   count drives the retry loop

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::imsi::{format_imsi, mask_imsi, merge_ranges, ImsiRange};
use crate::observability::metrics;
use crate::sync::cache::PushCache;
use crate::sync::pusher::{PushError, Pusher};
use crate::tree::Path;

/// Largest subscriber range a single device group may expand.
const MAX_RANGE_SIZE: u64 = 100_000;

/// Unreconcilable overall input; aborts the attempt without retry.
#[derive(Debug, Error)]
#[error("fatal synchronization error: {0}")]
pub struct FatalSyncError(pub String);

/// A model object is missing data required for translation.
#[derive(Debug, Error)]
#[error("{object} is missing required field '{field}'")]
pub struct ValidationError {
    object: String,
    field: String,
}

/// One supported model advertised by Capabilities.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: &'static str,
    pub organization: &'static str,
    pub version: &'static str,
}

/// Maps the config tree into downstream pushes.
#[async_trait]
pub trait SchemaMapper: Send + Sync {
    /// Models this mapper understands.
    fn models(&self) -> Vec<ModelInfo>;

    /// Translate and push the whole tree. Returns the number of failed
    /// pushes; a fatal error means the input cannot be reconciled at all.
    async fn reconcile(
        &self,
        tree: &Value,
        cache: &PushCache,
        pusher: &dyn Pusher,
    ) -> Result<usize, FatalSyncError>;

    /// Reconcile the deletion of the entity a path addressed. Runs on the
    /// caller's task so the Set RPC observes the result.
    async fn reconcile_delete(
        &self,
        path: &Path,
        cache: &PushCache,
        pusher: &dyn Pusher,
    ) -> Result<(), PushError>;
}

/// Mapper for the bundled core-network schema.
pub struct CoreMapper {
    core_endpoint: String,
    upf_endpoint: String,
}

impl CoreMapper {
    pub fn new(core_endpoint: &str, upf_endpoint: &str) -> Self {
        Self {
            core_endpoint: core_endpoint.trim_end_matches('/').to_string(),
            upf_endpoint: upf_endpoint.trim_end_matches('/').to_string(),
        }
    }

    async fn push_cached(
        &self,
        cache: &PushCache,
        pusher: &dyn Pusher,
        kind: &str,
        id: &str,
        endpoint: &str,
        payload: Value,
    ) -> usize {
        if cache.check(kind, id, &payload) {
            tracing::debug!(kind = kind, id = id, "content unchanged, skipping push");
            return 0;
        }
        match pusher.push_update(endpoint, &payload).await {
            Ok(()) => {
                cache.update(kind, id, payload);
                metrics::record_push(kind, true);
                tracing::info!(kind = kind, id = id, endpoint = endpoint, "pushed");
                0
            }
            Err(err) => {
                metrics::record_push(kind, false);
                tracing::warn!(kind = kind, id = id, error = %err, "push failed");
                1
            }
        }
    }

    async fn reconcile_site(
        &self,
        site: &Value,
        cache: &PushCache,
        pusher: &dyn Pusher,
    ) -> usize {
        let site_id = match required_str(site, "site", "site-id") {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(error = %err, "skipping site");
                return 0;
            }
        };

        let mut failures = 0;
        for group in list(site, "device-group") {
            match self.device_group_payload(site, site_id, group) {
                Ok((id, payload)) => {
                    let endpoint = format!("{}/v1/device-group/{}", self.core_endpoint, id);
                    failures += self
                        .push_cached(cache, pusher, "device-group", &id, &endpoint, payload)
                        .await;
                }
                Err(err) => {
                    tracing::warn!(site = site_id, error = %err, "skipping device group");
                }
            }
        }

        for slice in list(site, "slice") {
            match self.slice_payloads(site, site_id, slice) {
                Ok((id, slice_payload, upf_payload)) => {
                    let endpoint = format!("{}/v1/network-slice/{}", self.core_endpoint, id);
                    failures += self
                        .push_cached(cache, pusher, "network-slice", &id, &endpoint, slice_payload)
                        .await;
                    let upf_endpoint = format!("{}/v1/config/network-slices", self.upf_endpoint);
                    failures += self
                        .push_cached(cache, pusher, "upf-slice", &id, &upf_endpoint, upf_payload)
                        .await;
                }
                Err(err) => {
                    tracing::warn!(site = site_id, error = %err, "skipping slice");
                }
            }
        }
        failures
    }

    /// Derive the device-group document: masked IMSI list plus IP-domain
    /// and QoS settings.
    fn device_group_payload(
        &self,
        site: &Value,
        site_id: &str,
        group: &Value,
    ) -> Result<(String, Value), ValidationError> {
        let group_id = required_str(group, "device-group", "device-group-id")?.to_string();
        let imsis = expand_imsis(site, group, &group_id)?;

        let domain_id = required_str(group, &format!("device-group {group_id}"), "ip-domain-id")?;
        let domain = list(site, "ip-domain")
            .into_iter()
            .find(|d| d.get("ip-domain-id").and_then(Value::as_str) == Some(domain_id))
            .ok_or_else(|| ValidationError {
                object: format!("device-group {group_id}"),
                field: "ip-domain-id".to_string(),
            })?;
        let subnet = required_str(domain, &format!("ip-domain {domain_id}"), "subnet")?;

        let mut expanded = Map::new();
        expanded.insert("ue-ip-pool".to_string(), json!(subnet));
        for field in ["dns-primary", "dns-secondary", "mtu", "dnn"] {
            if let Some(v) = domain.get(field) {
                expanded.insert(field.to_string(), v.clone());
            }
        }

        let mut payload = json!({
            "site-info": site_id,
            "imsis": imsis,
            "ip-domain-name": domain_id,
            "ip-domain-expanded": Value::Object(expanded),
        });
        if let Some(device) = group.get("device") {
            payload["device"] = device.clone();
        }
        if let Some(class) = group.get("traffic-class") {
            payload["traffic-class"] = class.clone();
        }
        Ok((group_id, payload))
    }

    /// Derive the network-slice and UPF documents for one slice.
    fn slice_payloads(
        &self,
        site: &Value,
        site_id: &str,
        slice: &Value,
    ) -> Result<(String, Value, Value), ValidationError> {
        let slice_id = required_str(slice, "slice", "slice-id")?.to_string();
        let object = format!("slice {slice_id}");
        let sst = required_u64(slice, &object, "sst")?;
        let sd = required_str(slice, &object, "sd")?;

        let groups: Vec<Value> = list_of_strings(slice, "device-group");

        let mut site_info = json!({"site-name": site_id});
        if let Some(def) = site.get("imsi-definition") {
            let mcc = def.get("mcc").cloned().unwrap_or(Value::Null);
            let mnc = def.get("mnc").cloned().unwrap_or(Value::Null);
            site_info["plmn"] = json!({"mcc": mcc, "mnc": mnc});
        }
        if let Some(upf_id) = slice.get("upf-id").and_then(Value::as_str) {
            if let Some(upf) = list(site, "upf")
                .into_iter()
                .find(|u| u.get("upf-id").and_then(Value::as_str) == Some(upf_id))
            {
                site_info["upf"] = json!({
                    "upf-name": upf.get("address").cloned().unwrap_or(Value::Null),
                    "upf-port": upf.get("port").cloned().unwrap_or(Value::Null),
                });
            }
        }

        let mut slice_payload = json!({
            "slice-id": {"sst": sst, "sd": sd},
            "site-device-group": groups,
            "site-info": site_info,
        });
        if let Some(mbr) = slice.get("mbr") {
            slice_payload["slice-qos"] = mbr.clone();
        }

        let upf_payload = json!({
            "slice-name": slice_id,
            "slice-id": {"sst": sst, "sd": sd},
            "site-device-group": slice_payload["site-device-group"].clone(),
            "slice-qos": slice_payload.get("slice-qos").cloned().unwrap_or(Value::Null),
        });

        Ok((slice_id, slice_payload, upf_payload))
    }
}

#[async_trait]
impl SchemaMapper for CoreMapper {
    fn models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo {
                name: "site",
                organization: "mobile-core",
                version: "1.0.0",
            },
            ModelInfo {
                name: "device-group",
                organization: "mobile-core",
                version: "1.0.0",
            },
            ModelInfo {
                name: "network-slice",
                organization: "mobile-core",
                version: "1.0.0",
            },
            ModelInfo {
                name: "upf",
                organization: "mobile-core",
                version: "1.0.0",
            },
        ]
    }

    async fn reconcile(
        &self,
        tree: &Value,
        cache: &PushCache,
        pusher: &dyn Pusher,
    ) -> Result<usize, FatalSyncError> {
        let root = tree
            .as_object()
            .ok_or_else(|| FatalSyncError("config tree root is not an object".to_string()))?;
        let sites = match root.get("site") {
            None => return Ok(0),
            Some(v) => v
                .as_array()
                .ok_or_else(|| FatalSyncError("'site' is not a list".to_string()))?,
        };

        let mut failures = 0;
        for site in sites {
            failures += self.reconcile_site(site, cache, pusher).await;
        }
        Ok(failures)
    }

    async fn reconcile_delete(
        &self,
        path: &Path,
        cache: &PushCache,
        pusher: &dyn Pusher,
    ) -> Result<(), PushError> {
        let Some((kind, id)) = deleted_entity(path) else {
            tracing::debug!(path = %path, "deleted path maps to no downstream entity");
            return Ok(());
        };
        let endpoint = match kind {
            "device-group" => format!("{}/v1/device-group/{}", self.core_endpoint, id),
            _ => format!("{}/v1/network-slice/{}", self.core_endpoint, id),
        };
        match pusher.push_delete(&endpoint).await {
            Ok(()) => {}
            // Already absent downstream counts as satisfied.
            Err(err) if err.is_not_found() => {
                tracing::debug!(endpoint = %endpoint, "delete target already absent");
            }
            Err(err) => {
                metrics::record_push(kind, false);
                return Err(err);
            }
        }
        cache.remove(kind, &id);
        metrics::record_push(kind, true);
        tracing::info!(kind = kind, id = %id, "deleted downstream");
        Ok(())
    }
}

/// Expand a device group's ranges into masked, zero-padded IMSI strings.
fn expand_imsis(
    site: &Value,
    group: &Value,
    group_id: &str,
) -> Result<Vec<String>, ValidationError> {
    let object = format!("device-group {group_id}");
    let def = group
        .get("imsis")
        .and_then(Value::as_array)
        .ok_or_else(|| ValidationError {
            object: object.clone(),
            field: "imsis".to_string(),
        })?;

    let site_object = "site imsi-definition";
    let definition = site.get("imsi-definition").ok_or_else(|| ValidationError {
        object: site_object.to_string(),
        field: "imsi-definition".to_string(),
    })?;
    let format = required_str(definition, site_object, "format")?;
    let mcc = required_u64(definition, site_object, "mcc")?;
    let mnc = required_u64(definition, site_object, "mnc")?;
    let enterprise = required_u64(definition, site_object, "enterprise")?;

    let mut ranges = Vec::new();
    for entry in def {
        let name = required_str(entry, &object, "name")?;
        let from = required_u64(entry, &object, "imsi-range-from")?;
        let to = entry
            .get("imsi-range-to")
            .and_then(value_as_u64)
            .unwrap_or(from);
        if to < from || to - from >= MAX_RANGE_SIZE {
            tracing::warn!(group = group_id, range = name, from, to, "unusable imsi range");
            continue;
        }
        ranges.push(ImsiRange::new(name, from, to));
    }

    let (merged, absorbed) = merge_ranges(&ranges);
    if !absorbed.is_empty() {
        tracing::debug!(group = group_id, absorbed = ?absorbed, "coalesced adjacent imsi ranges");
    }

    let mut imsis = Vec::new();
    for range in &merged {
        for sub in range.from..=range.to {
            let full =
                format_imsi(format, mcc, mnc, enterprise, sub).map_err(|err| {
                    tracing::warn!(group = group_id, error = %err, "imsi assembly failed");
                    ValidationError {
                        object: object.clone(),
                        field: "imsis".to_string(),
                    }
                })?;
            tracing::trace!(group = group_id, imsi = full, "assembled imsi");
            let masked = mask_imsi(format, sub).map_err(|_| ValidationError {
                object: object.clone(),
                field: "imsis".to_string(),
            })?;
            imsis.push(format!("{:015}", masked));
        }
    }
    Ok(imsis)
}

/// Which downstream entity a deleted path addressed, if any.
///
/// Only a path ENDING at a keyed entity removes it downstream. A deleted
/// sub-field (e.g. a slice's mbr) leaves the entity in place; its new
/// shape reaches downstream through the Apply the caller enqueues.
fn deleted_entity(path: &Path) -> Option<(&'static str, String)> {
    let last = path.elems.last()?;
    match last.name.as_str() {
        "device-group" => last
            .keys
            .get("device-group-id")
            .map(|id| ("device-group", id.clone())),
        "slice" | "vcs" => last
            .keys
            .get("slice-id")
            .or_else(|| last.keys.get("vcs-id"))
            .map(|id| ("network-slice", id.clone())),
        _ => None,
    }
}

fn list<'a>(obj: &'a Value, field: &str) -> Vec<&'a Value> {
    obj.get(field)
        .and_then(Value::as_array)
        .map(|a| a.iter().collect())
        .unwrap_or_default()
}

fn list_of_strings(obj: &Value, field: &str) -> Vec<Value> {
    obj.get(field)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn required_str<'a>(obj: &'a Value, object: &str, field: &str) -> Result<&'a str, ValidationError> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ValidationError {
            object: object.to_string(),
            field: field.to_string(),
        })
}

/// Accepts both JSON numbers and numeric strings.
fn value_as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn required_u64(obj: &Value, object: &str, field: &str) -> Result<u64, ValidationError> {
    obj.get(field)
        .and_then(value_as_u64)
        .ok_or_else(|| ValidationError {
            object: object.to_string(),
            field: field.to_string(),
        })
}
