//! Azure Resource Manager plumbing shared by the module functions:
//! credential resolution, the client factory, and a few utilities for
//! error reporting and state comparison.

pub mod auth;
pub mod client;
pub mod models;

pub use auth::{AuthMethod, AzureRmCredentials, CloudEnvironment};
pub use client::{ArmClient, ComputeApi, ResourceApi};

use crate::error::{CloudError, Result};
use serde_json::{json, Value};
use std::collections::HashMap;

/// The management-plane clients this crate knows how to build, each pinned
/// to the API version its operations are written against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
    Compute,
    Resource,
}

impl ClientType {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "compute" => Ok(Self::Compute),
            "resource" => Ok(Self::Resource),
            other => Err(CloudError::InvalidConfig(format!(
                "The client type '{other}' specified can not be found."
            ))),
        }
    }

    pub fn api_version(&self) -> &'static str {
        match self {
            Self::Compute => "2023-03-01",
            Self::Resource => "2021-04-01",
        }
    }
}

/// Build a management client of the requested type for one credential
/// bundle.
pub fn get_client(client_type: &str, credentials: &AzureRmCredentials) -> Result<ArmClient> {
    let kind = ClientType::parse(client_type)?;
    ArmClient::new(credentials, kind.api_version())
}

/// Log a cloud error the way the module functions report them. The
/// `azurerm_log_level` keyword downgrades the record to info; anything
/// else logs at error.
pub fn log_cloud_error(client: &str, message: &str, kwargs: &HashMap<String, Value>) {
    let client = capitalize(client);
    let level = kwargs
        .get("azurerm_log_level")
        .and_then(Value::as_str)
        .unwrap_or("error");
    if level.eq_ignore_ascii_case("info") {
        tracing::info!(
            "An Azure Resource Manager {} error has occurred: {}",
            client,
            message
        );
    } else {
        tracing::error!(
            "An Azure Resource Manager {} error has occurred: {}",
            client,
            message
        );
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Compare two lists of configuration dictionaries, name-keyed and
/// case-insensitive for string values. Keys named in `convert_id_to_name`
/// hold `{"id": ...}` references on the remote side and are compared by
/// the trailing path segment of the id.
///
/// Returns an empty object when the lists match, an object with a
/// `changes` key holding the sorted old and new lists when they differ,
/// and an object with a `comment` key when an entry lacks a `name`.
pub fn compare_list_of_dicts(
    old: &[Value],
    new: &[Value],
    convert_id_to_name: &[&str],
) -> Value {
    let sort_by_name = |items: &[Value]| -> Option<Vec<Value>> {
        let mut sorted: Vec<Value> = items.to_vec();
        for item in &sorted {
            item.get("name").and_then(Value::as_str)?;
        }
        sorted.sort_by_key(|item| {
            item.get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_lowercase()
        });
        Some(sorted)
    };

    let (Some(local), Some(remote)) = (sort_by_name(new), sort_by_name(old)) else {
        return json!({
            "comment": "configuration dictionaries must contain the \"name\" key!"
        });
    };

    let changed = json!({ "changes": { "old": remote.clone(), "new": local.clone() } });

    if local.len() != remote.len() {
        return changed;
    }

    for (local_item, remote_item) in local.iter().zip(remote.iter()) {
        let Some(local_obj) = local_item.as_object() else {
            return changed;
        };
        for (key, local_val) in local_obj {
            let matches = if convert_id_to_name.contains(&key.as_str()) {
                let remote_name = remote_item
                    .pointer(&format!("/{key}/id"))
                    .and_then(Value::as_str)
                    .and_then(|id| id.rsplit('/').next())
                    .unwrap_or_default();
                local_val.as_str().unwrap_or_default() == remote_name
            } else {
                values_equal_ci(local_val, remote_item.get(key).unwrap_or(&Value::Null))
            };
            if !matches {
                return changed;
            }
        }
    }

    json!({})
}

fn values_equal_ci(a: &Value, b: &Value) -> bool {
    match (a.as_str(), b.as_str()) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_client_type_parse() {
        assert_eq!(ClientType::parse("compute").unwrap(), ClientType::Compute);
        assert_eq!(ClientType::parse("Resource").unwrap(), ClientType::Resource);
        // Only the two providers the operations use are supported.
        for unsupported in ["network", "storage", "subscription", "pillar"] {
            let err = ClientType::parse(unsupported).unwrap_err();
            assert!(err.to_string().contains("can not be found"));
        }
    }

    #[test]
    fn test_compare_identical_ignoring_case() {
        let old = vec![json!({"name": "Alpha", "size": "Standard_B1s"})];
        let new = vec![json!({"name": "alpha", "size": "standard_b1s"})];
        assert_eq!(compare_list_of_dicts(&old, &new, &[]), json!({}));
    }

    #[test]
    fn test_compare_detects_changed_value() {
        let old = vec![json!({"name": "alpha", "size": "Standard_B1s"})];
        let new = vec![json!({"name": "alpha", "size": "Standard_B2s"})];
        let result = compare_list_of_dicts(&old, &new, &[]);
        assert_eq!(result["changes"]["old"], json!(old));
        assert_eq!(result["changes"]["new"], json!(new));
    }

    #[test]
    fn test_compare_missing_name_key() {
        let old = vec![json!({"name": "alpha"})];
        let new = vec![json!({"size": "Standard_B1s"})];
        let result = compare_list_of_dicts(&old, &new, &[]);
        assert!(result["comment"]
            .as_str()
            .unwrap()
            .contains("must contain the \"name\" key"));
    }

    #[test]
    fn test_compare_id_reference_by_trailing_segment() {
        let old = vec![json!({
            "name": "alpha",
            "subnet": {"id": "/subscriptions/s/subnets/default"},
        })];
        let new = vec![json!({"name": "alpha", "subnet": "default"})];
        assert_eq!(compare_list_of_dicts(&old, &new, &["subnet"]), json!({}));
    }

    #[test]
    fn test_compare_length_mismatch() {
        let old = vec![json!({"name": "alpha"})];
        let new = vec![json!({"name": "alpha"}), json!({"name": "beta"})];
        let result = compare_list_of_dicts(&old, &new, &[]);
        assert!(result.get("changes").is_some());
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("compute"), "Compute");
        assert_eq!(capitalize(""), "");
    }
}
