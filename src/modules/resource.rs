//! Resource module functions. Only the resource group lookup is exposed;
//! the compute functions use it to default a location.

use crate::azurerm::{self, ResourceApi};
use crate::modules::ModuleParams;
use serde_json::{json, Value};

/// Get a dictionary representing a resource group.
pub async fn resource_group_get(
    resource: &dyn ResourceApi,
    name: &str,
    kwargs: &ModuleParams,
) -> Value {
    match resource.resource_group_get(name).await {
        Ok(result) => result,
        Err(err) => {
            let message = err.to_string();
            azurerm::log_cloud_error("resource", &message, kwargs);
            json!({ "error": message })
        }
    }
}
