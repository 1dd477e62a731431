//! Typed request bodies for the compute operations.
//!
//! Module callers pass snake_case keyword arguments; these builders filter
//! the keyword bundle down to the fields a given model accepts, validate
//! the types, and emit the camelCase ARM wire shape. A type mismatch
//! surfaces as [`CloudError::Serialization`] so the caller can report the
//! model as unbuildable rather than sending a bad request.

use crate::error::{CloudError, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Keyword arguments consumed by the availability set model. Everything
/// else in the bundle (credentials, connection settings) is ignored.
pub const AVAILABILITY_SET_FIELDS: &[&str] = &[
    "location",
    "tags",
    "sku",
    "platform_update_domain_count",
    "platform_fault_domain_count",
    "virtual_machines",
    "proximity_placement_group",
];

/// A reference to another ARM resource by id.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SubResource {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Sku {
    pub name: Option<String>,
    pub tier: Option<String>,
    pub capacity: Option<i64>,
}

/// Accepts either a bare sku name or the full object form.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SkuSpec {
    Name(String),
    Full(Sku),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct AvailabilitySetSpec {
    location: Option<String>,
    tags: Option<HashMap<String, String>>,
    sku: Option<SkuSpec>,
    platform_update_domain_count: Option<i64>,
    platform_fault_domain_count: Option<i64>,
    virtual_machines: Option<Vec<SubResource>>,
    proximity_placement_group: Option<SubResource>,
}

/// Build the PUT body for an availability set from a keyword bundle.
pub fn availability_set_body(kwargs: &HashMap<String, Value>) -> Result<Value> {
    let mut filtered = Map::new();
    for key in AVAILABILITY_SET_FIELDS {
        if let Some(value) = kwargs.get(*key) {
            filtered.insert((*key).to_string(), value.clone());
        }
    }

    let spec: AvailabilitySetSpec = serde_json::from_value(Value::Object(filtered))
        .map_err(|e| CloudError::Serialization(e.to_string()))?;

    let mut body = Map::new();
    if let Some(location) = spec.location {
        body.insert("location".to_string(), json!(location));
    }
    if let Some(tags) = spec.tags {
        body.insert("tags".to_string(), json!(tags));
    }
    if let Some(sku) = spec.sku {
        let sku = match sku {
            SkuSpec::Name(name) => json!({ "name": name }),
            SkuSpec::Full(full) => {
                let mut obj = Map::new();
                if let Some(name) = full.name {
                    obj.insert("name".to_string(), json!(name));
                }
                if let Some(tier) = full.tier {
                    obj.insert("tier".to_string(), json!(tier));
                }
                if let Some(capacity) = full.capacity {
                    obj.insert("capacity".to_string(), json!(capacity));
                }
                Value::Object(obj)
            }
        };
        body.insert("sku".to_string(), sku);
    }

    let mut properties = Map::new();
    if let Some(count) = spec.platform_update_domain_count {
        properties.insert("platformUpdateDomainCount".to_string(), json!(count));
    }
    if let Some(count) = spec.platform_fault_domain_count {
        properties.insert("platformFaultDomainCount".to_string(), json!(count));
    }
    if let Some(vms) = spec.virtual_machines {
        let refs: Vec<Value> = vms.into_iter().map(|vm| json!({ "id": vm.id })).collect();
        properties.insert("virtualMachines".to_string(), Value::Array(refs));
    }
    if let Some(group) = spec.proximity_placement_group {
        properties.insert("proximityPlacementGroup".to_string(), json!({ "id": group.id }));
    }
    if !properties.is_empty() {
        body.insert("properties".to_string(), Value::Object(properties));
    }

    Ok(Value::Object(body))
}

/// Parameters for capturing a generalized virtual machine as a template.
#[derive(Debug, Clone)]
pub struct VirtualMachineCaptureParameters {
    pub vhd_prefix: String,
    pub destination_container_name: String,
    pub overwrite_vhds: bool,
}

impl VirtualMachineCaptureParameters {
    pub fn into_body(self) -> Value {
        json!({
            "vhdPrefix": self.vhd_prefix,
            "destinationContainerName": self.destination_container_name,
            "overwriteVhds": self.overwrite_vhds,
        })
    }
}
