//! Compute module functions: availability sets and virtual machine
//! lifecycle.
//!
//! Every function folds cloud failures into its result. Object-returning
//! functions answer `{"error": ...}` on failure, the boolean ones answer
//! `false`, and `availability_set_create_or_update` answers `false` when
//! the location cannot be determined from the resource group.

use crate::azurerm::client::{ComputeApi, ResourceApi};
use crate::azurerm::{self, models};
use crate::error::CloudError;
use crate::modules::{resource, ModuleParams, ParamExt};
use serde_json::{json, Map, Value};

/// Log a cloud failure and fold it into an `error` result.
fn cloud_error(client: &str, err: &CloudError, kwargs: &ModuleParams) -> Value {
    let message = err.to_string();
    azurerm::log_cloud_error(client, &message, kwargs);
    json!({ "error": message })
}

/// Re-key a listing by resource name.
fn keyed_by_name(items: Vec<Value>) -> Value {
    let mut result = Map::new();
    for item in items {
        let name = item
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(name) = name {
            result.insert(name, item);
        }
    }
    Value::Object(result)
}

/// Create or update an availability set.
///
/// When `location` is absent from the keyword bundle it is taken from the
/// resource group; a failed group lookup short-circuits to `false`. A
/// `virtual_machines` list of names is resolved to id references, with
/// unresolvable names dropped.
pub async fn availability_set_create_or_update(
    compute: &dyn ComputeApi,
    resource: &dyn ResourceApi,
    name: &str,
    resource_group: &str,
    kwargs: &ModuleParams,
) -> Value {
    let mut kwargs = kwargs.clone();

    if kwargs.get_string("location").is_none() {
        let group = resource::resource_group_get(resource, resource_group, &kwargs).await;
        match group.get("location").and_then(Value::as_str) {
            Some(location) => {
                let location = location.to_string();
                kwargs.insert("location".to_string(), Value::String(location));
            }
            None => {
                tracing::error!("Unable to determine location from resource group specified.");
                return Value::Bool(false);
            }
        }
    }

    if let Some(vm_names) = kwargs.get_vec_string("virtual_machines") {
        let mut refs = Vec::new();
        for vm_name in vm_names {
            let vm = virtual_machine_get(compute, &vm_name, resource_group, &kwargs).await;
            if let Some(id) = vm.get("id").and_then(Value::as_str) {
                refs.push(json!({ "id": id }));
            }
        }
        kwargs.insert("virtual_machines".to_string(), Value::Array(refs));
    }

    let body = match models::availability_set_body(&kwargs) {
        Ok(body) => body,
        Err(err) => {
            return json!({
                "error": format!("The object model could not be built. ({err})")
            })
        }
    };

    match compute
        .availability_set_create_or_update(resource_group, name, body)
        .await
    {
        Ok(result) => result,
        Err(CloudError::Serialization(detail)) => json!({
            "error": format!("The object model could not be parsed. ({detail})")
        }),
        Err(err) => cloud_error("compute", &err, &kwargs),
    }
}

/// Delete an availability set. Answers `true` on success.
pub async fn availability_set_delete(
    compute: &dyn ComputeApi,
    name: &str,
    resource_group: &str,
    kwargs: &ModuleParams,
) -> bool {
    match compute.availability_set_delete(resource_group, name).await {
        Ok(()) => true,
        Err(err) => {
            azurerm::log_cloud_error("compute", &err.to_string(), kwargs);
            false
        }
    }
}

/// Get a dictionary representing an availability set.
pub async fn availability_set_get(
    compute: &dyn ComputeApi,
    name: &str,
    resource_group: &str,
    kwargs: &ModuleParams,
) -> Value {
    match compute.availability_set_get(resource_group, name).await {
        Ok(result) => result,
        Err(err) => cloud_error("compute", &err, kwargs),
    }
}

/// List all availability sets within a resource group, keyed by name.
pub async fn availability_sets_list(
    compute: &dyn ComputeApi,
    resource_group: &str,
    kwargs: &ModuleParams,
) -> Value {
    match compute.availability_sets_list(resource_group).await {
        Ok(sets) => keyed_by_name(sets),
        Err(err) => cloud_error("compute", &err, kwargs),
    }
}

/// List the VM sizes usable within an availability set, keyed by size
/// name.
pub async fn availability_sets_list_available_sizes(
    compute: &dyn ComputeApi,
    name: &str,
    resource_group: &str,
    kwargs: &ModuleParams,
) -> Value {
    match compute
        .availability_sets_list_available_sizes(resource_group, name)
        .await
    {
        Ok(sizes) => keyed_by_name(sizes),
        Err(err) => cloud_error("compute", &err, kwargs),
    }
}

/// Capture a generalized VM as a reusable image template.
pub async fn virtual_machine_capture(
    compute: &dyn ComputeApi,
    name: &str,
    destination_name: &str,
    resource_group: &str,
    prefix: &str,
    overwrite: bool,
    kwargs: &ModuleParams,
) -> Value {
    let parameters = models::VirtualMachineCaptureParameters {
        vhd_prefix: prefix.to_string(),
        destination_container_name: destination_name.to_string(),
        overwrite_vhds: overwrite,
    };
    match compute
        .virtual_machine_capture(resource_group, name, parameters.into_body())
        .await
    {
        Ok(result) => result,
        Err(err) => cloud_error("compute", &err, kwargs),
    }
}

/// Get a dictionary representing a virtual machine. An `expand` keyword
/// (for example `instanceView`) is forwarded to the query.
pub async fn virtual_machine_get(
    compute: &dyn ComputeApi,
    name: &str,
    resource_group: &str,
    kwargs: &ModuleParams,
) -> Value {
    let expand = kwargs.get_string("expand");
    match compute
        .virtual_machine_get(resource_group, name, expand)
        .await
    {
        Ok(result) => result,
        Err(err) => cloud_error("compute", &err, kwargs),
    }
}

/// Convert a VM with blob-based disks to managed disks. The VM must be
/// deallocated first.
pub async fn virtual_machine_convert_to_managed_disks(
    compute: &dyn ComputeApi,
    name: &str,
    resource_group: &str,
    kwargs: &ModuleParams,
) -> Value {
    match compute
        .virtual_machine_convert_to_managed_disks(resource_group, name)
        .await
    {
        Ok(result) => result,
        Err(err) => cloud_error("compute", &err, kwargs),
    }
}

/// Power off and release the compute resources of a virtual machine.
pub async fn virtual_machine_deallocate(
    compute: &dyn ComputeApi,
    name: &str,
    resource_group: &str,
    kwargs: &ModuleParams,
) -> Value {
    match compute.virtual_machine_deallocate(resource_group, name).await {
        Ok(result) => result,
        Err(err) => cloud_error("compute", &err, kwargs),
    }
}

/// Mark a virtual machine as generalized. Answers `true` on success.
pub async fn virtual_machine_generalize(
    compute: &dyn ComputeApi,
    name: &str,
    resource_group: &str,
    kwargs: &ModuleParams,
) -> bool {
    match compute.virtual_machine_generalize(resource_group, name).await {
        Ok(()) => true,
        Err(err) => {
            azurerm::log_cloud_error("compute", &err.to_string(), kwargs);
            false
        }
    }
}

/// Power off (stop) a virtual machine without releasing its resources.
pub async fn virtual_machine_power_off(
    compute: &dyn ComputeApi,
    name: &str,
    resource_group: &str,
    kwargs: &ModuleParams,
) -> Value {
    match compute.virtual_machine_power_off(resource_group, name).await {
        Ok(result) => result,
        Err(err) => cloud_error("compute", &err, kwargs),
    }
}

/// Redeploy a virtual machine onto a new host node.
pub async fn virtual_machine_redeploy(
    compute: &dyn ComputeApi,
    name: &str,
    resource_group: &str,
    kwargs: &ModuleParams,
) -> Value {
    match compute.virtual_machine_redeploy(resource_group, name).await {
        Ok(result) => result,
        Err(err) => cloud_error("compute", &err, kwargs),
    }
}

/// Restart a virtual machine.
pub async fn virtual_machine_restart(
    compute: &dyn ComputeApi,
    name: &str,
    resource_group: &str,
    kwargs: &ModuleParams,
) -> Value {
    match compute.virtual_machine_restart(resource_group, name).await {
        Ok(result) => result,
        Err(err) => cloud_error("compute", &err, kwargs),
    }
}

/// Start a stopped or deallocated virtual machine.
pub async fn virtual_machine_start(
    compute: &dyn ComputeApi,
    name: &str,
    resource_group: &str,
    kwargs: &ModuleParams,
) -> Value {
    match compute.virtual_machine_start(resource_group, name).await {
        Ok(result) => result,
        Err(err) => cloud_error("compute", &err, kwargs),
    }
}

/// List all virtual machines within a resource group, keyed by name.
pub async fn virtual_machines_list(
    compute: &dyn ComputeApi,
    resource_group: &str,
    kwargs: &ModuleParams,
) -> Value {
    match compute.virtual_machines_list(resource_group).await {
        Ok(vms) => keyed_by_name(vms),
        Err(err) => cloud_error("compute", &err, kwargs),
    }
}

/// List all virtual machines within the subscription, keyed by name.
pub async fn virtual_machines_list_all(compute: &dyn ComputeApi, kwargs: &ModuleParams) -> Value {
    match compute.virtual_machines_list_all().await {
        Ok(vms) => keyed_by_name(vms),
        Err(err) => cloud_error("compute", &err, kwargs),
    }
}

/// List the sizes a virtual machine can be resized to, keyed by size
/// name.
pub async fn virtual_machines_list_available_sizes(
    compute: &dyn ComputeApi,
    name: &str,
    resource_group: &str,
    kwargs: &ModuleParams,
) -> Value {
    match compute
        .virtual_machines_list_available_sizes(resource_group, name)
        .await
    {
        Ok(sizes) => keyed_by_name(sizes),
        Err(err) => cloud_error("compute", &err, kwargs),
    }
}
