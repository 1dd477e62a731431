//! Module functions for Azure Resource Manager compute.
//!
//! Each function mirrors the calling convention of a configuration
//! management execution module: positional resource names, a keyword
//! bundle carrying both operation options and provider credentials, and a
//! JSON result. Failures are folded into the result as an `error` key (or
//! `false` for the boolean operations) rather than propagated, so a host
//! driving many invocations never has to unwind.

pub mod compute;
pub mod resource;

use crate::azurerm::{self, AzureRmCredentials};
use crate::error::{CloudError, Result};
use serde_json::Value;
use std::collections::HashMap;

/// Keyword bundle passed to every module function.
pub type ModuleParams = HashMap<String, Value>;

/// Every callable function, for dispatch and help output.
pub const FUNCTIONS: &[&str] = &[
    "availability_set_create_or_update",
    "availability_set_delete",
    "availability_set_get",
    "availability_sets_list",
    "availability_sets_list_available_sizes",
    "resource_group_get",
    "virtual_machine_capture",
    "virtual_machine_convert_to_managed_disks",
    "virtual_machine_deallocate",
    "virtual_machine_generalize",
    "virtual_machine_get",
    "virtual_machine_power_off",
    "virtual_machine_redeploy",
    "virtual_machine_restart",
    "virtual_machine_start",
    "virtual_machines_list",
    "virtual_machines_list_all",
    "virtual_machines_list_available_sizes",
];

/// Helper trait for extracting keyword arguments
pub trait ParamExt {
    fn get_string(&self, key: &str) -> Option<String>;
    fn get_bool_or(&self, key: &str, default: bool) -> bool;
    fn get_vec_string(&self, key: &str) -> Option<Vec<String>>;
}

impl ParamExt for ModuleParams {
    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(v) => Some(v.to_string().trim_matches('"').to_string()),
        }
    }

    fn get_bool_or(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => true,
                "false" | "no" | "0" | "off" => false,
                _ => default,
            },
            _ => default,
        }
    }

    fn get_vec_string(&self, key: &str) -> Option<Vec<String>> {
        match self.get(key) {
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        v => v.to_string().trim_matches('"').to_string(),
                    })
                    .collect(),
            ),
            Some(Value::String(s)) => {
                Some(s.split(',').map(|part| part.trim().to_string()).collect())
            }
            _ => None,
        }
    }
}

fn positional<'a>(function: &str, args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index).map(String::as_str).ok_or_else(|| {
        CloudError::Invocation(format!("{function} requires a <{name}> argument"))
    })
}

/// Dispatch one function call: resolve credentials from the keyword
/// bundle, build the client(s) the function needs, and run it.
///
/// Credential or invocation problems surface as `Err`; cloud-side
/// failures are already folded into the returned value by the function
/// itself.
pub async fn run(function: &str, args: &[String], kwargs: &ModuleParams) -> Result<Value> {
    let credentials = AzureRmCredentials::from_params(kwargs).await?;
    let pos = |index: usize, name: &str| positional(function, args, index, name);

    match function {
        "availability_set_create_or_update" => {
            let compute_client = azurerm::get_client("compute", &credentials)?;
            let resource_client = azurerm::get_client("resource", &credentials)?;
            Ok(compute::availability_set_create_or_update(
                &compute_client,
                &resource_client,
                pos(0, "name")?,
                pos(1, "resource_group")?,
                kwargs,
            )
            .await)
        }
        "availability_set_delete" => {
            let client = azurerm::get_client("compute", &credentials)?;
            Ok(Value::Bool(
                compute::availability_set_delete(
                    &client,
                    pos(0, "name")?,
                    pos(1, "resource_group")?,
                    kwargs,
                )
                .await,
            ))
        }
        "availability_set_get" => {
            let client = azurerm::get_client("compute", &credentials)?;
            Ok(compute::availability_set_get(
                &client,
                pos(0, "name")?,
                pos(1, "resource_group")?,
                kwargs,
            )
            .await)
        }
        "availability_sets_list" => {
            let client = azurerm::get_client("compute", &credentials)?;
            Ok(compute::availability_sets_list(&client, pos(0, "resource_group")?, kwargs).await)
        }
        "availability_sets_list_available_sizes" => {
            let client = azurerm::get_client("compute", &credentials)?;
            Ok(compute::availability_sets_list_available_sizes(
                &client,
                pos(0, "name")?,
                pos(1, "resource_group")?,
                kwargs,
            )
            .await)
        }
        "resource_group_get" => {
            let client = azurerm::get_client("resource", &credentials)?;
            Ok(resource::resource_group_get(&client, pos(0, "name")?, kwargs).await)
        }
        "virtual_machine_capture" => {
            let client = azurerm::get_client("compute", &credentials)?;
            let prefix = kwargs
                .get_string("prefix")
                .unwrap_or_else(|| "capture-".to_string());
            let overwrite = kwargs.get_bool_or("overwrite", false);
            Ok(compute::virtual_machine_capture(
                &client,
                pos(0, "name")?,
                pos(1, "destination_name")?,
                pos(2, "resource_group")?,
                &prefix,
                overwrite,
                kwargs,
            )
            .await)
        }
        "virtual_machine_convert_to_managed_disks" => {
            let client = azurerm::get_client("compute", &credentials)?;
            Ok(compute::virtual_machine_convert_to_managed_disks(
                &client,
                pos(0, "name")?,
                pos(1, "resource_group")?,
                kwargs,
            )
            .await)
        }
        "virtual_machine_deallocate" => {
            let client = azurerm::get_client("compute", &credentials)?;
            Ok(compute::virtual_machine_deallocate(
                &client,
                pos(0, "name")?,
                pos(1, "resource_group")?,
                kwargs,
            )
            .await)
        }
        "virtual_machine_generalize" => {
            let client = azurerm::get_client("compute", &credentials)?;
            Ok(Value::Bool(
                compute::virtual_machine_generalize(
                    &client,
                    pos(0, "name")?,
                    pos(1, "resource_group")?,
                    kwargs,
                )
                .await,
            ))
        }
        "virtual_machine_get" => {
            let client = azurerm::get_client("compute", &credentials)?;
            Ok(compute::virtual_machine_get(
                &client,
                pos(0, "name")?,
                pos(1, "resource_group")?,
                kwargs,
            )
            .await)
        }
        "virtual_machine_power_off" => {
            let client = azurerm::get_client("compute", &credentials)?;
            Ok(compute::virtual_machine_power_off(
                &client,
                pos(0, "name")?,
                pos(1, "resource_group")?,
                kwargs,
            )
            .await)
        }
        "virtual_machine_redeploy" => {
            let client = azurerm::get_client("compute", &credentials)?;
            Ok(compute::virtual_machine_redeploy(
                &client,
                pos(0, "name")?,
                pos(1, "resource_group")?,
                kwargs,
            )
            .await)
        }
        "virtual_machine_restart" => {
            let client = azurerm::get_client("compute", &credentials)?;
            Ok(compute::virtual_machine_restart(
                &client,
                pos(0, "name")?,
                pos(1, "resource_group")?,
                kwargs,
            )
            .await)
        }
        "virtual_machine_start" => {
            let client = azurerm::get_client("compute", &credentials)?;
            Ok(compute::virtual_machine_start(
                &client,
                pos(0, "name")?,
                pos(1, "resource_group")?,
                kwargs,
            )
            .await)
        }
        "virtual_machines_list" => {
            let client = azurerm::get_client("compute", &credentials)?;
            Ok(compute::virtual_machines_list(&client, pos(0, "resource_group")?, kwargs).await)
        }
        "virtual_machines_list_all" => {
            let client = azurerm::get_client("compute", &credentials)?;
            Ok(compute::virtual_machines_list_all(&client, kwargs).await)
        }
        "virtual_machines_list_available_sizes" => {
            let client = azurerm::get_client("compute", &credentials)?;
            Ok(compute::virtual_machines_list_available_sizes(
                &client,
                pos(0, "name")?,
                pos(1, "resource_group")?,
                kwargs,
            )
            .await)
        }
        other => Err(CloudError::Invocation(format!(
            "'{other}' is not a known function. Available functions: {}",
            FUNCTIONS.join(", ")
        ))),
    }
}
