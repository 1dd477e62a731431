//! HTTP client for Azure Resource Manager.
//!
//! [`ArmClient`] speaks the ARM REST conventions the management SDKs wrap:
//! bearer-token auth, `api-version` query parameters, `value`/`nextLink`
//! paging, and long-running operations signalled through an
//! `Azure-AsyncOperation` (or `Location`) header that is polled until the
//! operation reaches a terminal status.
//!
//! The [`ComputeApi`] and [`ResourceApi`] traits are the seams the module
//! functions call through; `ArmClient` is the production implementation.

use crate::azurerm::auth::{AzureRmCredentials, TokenProvider};
use crate::error::{CloudError, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::{Duration, Instant};
use url::Url;

/// Request timeout for individual HTTP calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Delay between long-running operation polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Ceiling on total long-running operation wait time.
const LRO_TIMEOUT: Duration = Duration::from_secs(600);

/// ARM error codes that mean the resource does not exist, delivered with
/// statuses other than 404 by some providers.
const NOT_FOUND_CODES: &[&str] = &["ResourceNotFound", "NotFound", "ResourceGroupNotFound"];

/// Compute operations used by the module functions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn availability_set_create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        parameters: Value,
    ) -> Result<Value>;
    async fn availability_set_delete(&self, resource_group: &str, name: &str) -> Result<()>;
    async fn availability_set_get(&self, resource_group: &str, name: &str) -> Result<Value>;
    async fn availability_sets_list(&self, resource_group: &str) -> Result<Vec<Value>>;
    async fn availability_sets_list_available_sizes(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Vec<Value>>;

    async fn virtual_machine_get(
        &self,
        resource_group: &str,
        name: &str,
        expand: Option<String>,
    ) -> Result<Value>;
    async fn virtual_machine_capture(
        &self,
        resource_group: &str,
        name: &str,
        parameters: Value,
    ) -> Result<Value>;
    async fn virtual_machine_convert_to_managed_disks(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Value>;
    async fn virtual_machine_deallocate(&self, resource_group: &str, name: &str) -> Result<Value>;
    async fn virtual_machine_generalize(&self, resource_group: &str, name: &str) -> Result<()>;
    async fn virtual_machine_power_off(&self, resource_group: &str, name: &str) -> Result<Value>;
    async fn virtual_machine_restart(&self, resource_group: &str, name: &str) -> Result<Value>;
    async fn virtual_machine_start(&self, resource_group: &str, name: &str) -> Result<Value>;
    async fn virtual_machine_redeploy(&self, resource_group: &str, name: &str) -> Result<Value>;
    async fn virtual_machines_list(&self, resource_group: &str) -> Result<Vec<Value>>;
    async fn virtual_machines_list_all(&self) -> Result<Vec<Value>>;
    async fn virtual_machines_list_available_sizes(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Vec<Value>>;
}

/// Resource-group operations used by the module functions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceApi: Send + Sync {
    async fn resource_group_get(&self, name: &str) -> Result<Value>;
}

/// A client bound to one subscription, one cloud environment, and one
/// provider API version.
#[derive(Debug)]
pub struct ArmClient {
    http: reqwest::Client,
    tokens: TokenProvider,
    base: Url,
    subscription_id: String,
    api_version: String,
    poll_interval: Duration,
}

impl ArmClient {
    pub fn new(credentials: &AzureRmCredentials, api_version: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let base = Url::parse(&format!(
            "{}/",
            credentials.cloud.resource_manager.trim_end_matches('/')
        ))
        .map_err(|e| {
            CloudError::InvalidConfig(format!(
                "invalid resource manager endpoint '{}': {e}",
                credentials.cloud.resource_manager
            ))
        })?;

        Ok(Self {
            http: http.clone(),
            tokens: TokenProvider::new(credentials.clone(), http),
            base,
            subscription_id: credentials.subscription_id.clone(),
            api_version: api_version.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Shorten the poll delay, for exercising operation polling against
    /// local mock servers.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self
            .base
            .join(path.trim_start_matches('/'))
            .map_err(|e| CloudError::InvalidConfig(format!("invalid request path '{path}': {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("api-version", &self.api_version);
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn vm_path(&self, resource_group: &str, name: &str) -> String {
        format!(
            "subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachines/{}",
            self.subscription_id, resource_group, name
        )
    }

    fn availability_set_path(&self, resource_group: &str, name: &str) -> String {
        format!(
            "subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/availabilitySets/{}",
            self.subscription_id, resource_group, name
        )
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let token = self.tokens.bearer_token().await?;
        tracing::trace!(method = %method, url = %url, "sending request");
        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn fail(response: reqwest::Response) -> CloudError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let (code, message) = parse_arm_error(&body);
        let message = message.unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.to_string()
            } else {
                body.clone()
            }
        });

        let not_found_code = code
            .as_deref()
            .is_some_and(|c| NOT_FOUND_CODES.contains(&c));
        if status == StatusCode::NOT_FOUND || not_found_code {
            CloudError::ResourceNotFound(message)
        } else {
            CloudError::HttpResponse {
                status: status.as_u16(),
                message,
            }
        }
    }

    async fn get_resource(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = self.url(path, query)?;
        let response = self.send(Method::GET, url, None).await?;
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| CloudError::Serialization(e.to_string()))
    }

    /// GET a collection, following `nextLink` until the listing is
    /// exhausted, and return the flattened `value` items.
    async fn get_paged(&self, path: &str) -> Result<Vec<Value>> {
        let mut url = self.url(path, &[])?;
        let mut items = Vec::new();
        loop {
            let response = self.send(Method::GET, url.clone(), None).await?;
            if !response.status().is_success() {
                return Err(Self::fail(response).await);
            }
            let page: Value = response
                .json()
                .await
                .map_err(|e| CloudError::Serialization(e.to_string()))?;
            if let Some(Value::Array(values)) = page.get("value") {
                items.extend(values.iter().cloned());
            }
            match page.get("nextLink").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => {
                    url = Url::parse(next).map_err(|e| {
                        CloudError::Serialization(format!("invalid nextLink '{next}': {e}"))
                    })?;
                }
                _ => break,
            }
        }
        Ok(items)
    }

    async fn put_resource(&self, path: &str, body: &Value) -> Result<Value> {
        let url = self.url(path, &[])?;
        let response = self.send(Method::PUT, url, Some(body)).await?;
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| CloudError::Serialization(e.to_string()))
    }

    async fn delete_resource(&self, path: &str) -> Result<()> {
        let url = self.url(path, &[])?;
        let response = self.send(Method::DELETE, url, None).await?;
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        Ok(())
    }

    /// POST an action and wait for it to finish. Returns the terminal
    /// operation body, or `Null` when the action completes with no body.
    async fn post_action(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = self.url(path, &[])?;
        let response = self.send(Method::POST, url, body).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::fail(response).await);
        }

        if status == StatusCode::ACCEPTED || status == StatusCode::CREATED {
            let headers = response.headers();
            let poll_target = headers
                .get("azure-asyncoperation")
                .or_else(|| headers.get("location"))
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            if let Some(target) = poll_target {
                let poll_url = Url::parse(&target).map_err(|e| {
                    CloudError::Serialization(format!("invalid operation URL '{target}': {e}"))
                })?;
                return self.poll_operation(poll_url).await;
            }
        }

        Ok(read_json_or_null(response).await)
    }

    async fn poll_operation(&self, url: Url) -> Result<Value> {
        let started = Instant::now();
        loop {
            if started.elapsed() > LRO_TIMEOUT {
                return Err(CloudError::HttpResponse {
                    status: StatusCode::ACCEPTED.as_u16(),
                    message: format!(
                        "operation did not complete within {} seconds",
                        LRO_TIMEOUT.as_secs()
                    ),
                });
            }

            let response = self.send(Method::GET, url.clone(), None).await?;
            let status = response.status();
            if !status.is_success() {
                return Err(Self::fail(response).await);
            }
            if status == StatusCode::ACCEPTED {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            let body = read_json_or_null(response).await;
            match body.get("status").and_then(Value::as_str) {
                Some(s) if s.eq_ignore_ascii_case("InProgress")
                    || s.eq_ignore_ascii_case("Running") =>
                {
                    tracing::trace!(url = %url, status = s, "operation still running");
                    tokio::time::sleep(self.poll_interval).await;
                }
                Some(s) if s.eq_ignore_ascii_case("Failed")
                    || s.eq_ignore_ascii_case("Canceled") =>
                {
                    let message = body
                        .pointer("/error/message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("long-running operation {s}"));
                    return Err(CloudError::HttpResponse {
                        status: status.as_u16(),
                        message,
                    });
                }
                // Succeeded, or a Location-style final resource without a
                // status field.
                _ => return Ok(body),
            }
        }
    }

    /// POST a VM lifecycle action and return the refreshed VM object.
    async fn vm_action(&self, resource_group: &str, name: &str, action: &str) -> Result<Value> {
        let path = format!("{}/{}", self.vm_path(resource_group, name), action);
        self.post_action(&path, None).await?;
        self.get_resource(&self.vm_path(resource_group, name), &[])
            .await
    }
}

#[async_trait]
impl ComputeApi for ArmClient {
    async fn availability_set_create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        parameters: Value,
    ) -> Result<Value> {
        self.put_resource(&self.availability_set_path(resource_group, name), &parameters)
            .await
    }

    async fn availability_set_delete(&self, resource_group: &str, name: &str) -> Result<()> {
        self.delete_resource(&self.availability_set_path(resource_group, name))
            .await
    }

    async fn availability_set_get(&self, resource_group: &str, name: &str) -> Result<Value> {
        self.get_resource(&self.availability_set_path(resource_group, name), &[])
            .await
    }

    async fn availability_sets_list(&self, resource_group: &str) -> Result<Vec<Value>> {
        self.get_paged(&format!(
            "subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/availabilitySets",
            self.subscription_id, resource_group
        ))
        .await
    }

    async fn availability_sets_list_available_sizes(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Vec<Value>> {
        self.get_paged(&format!(
            "{}/vmSizes",
            self.availability_set_path(resource_group, name)
        ))
        .await
    }

    async fn virtual_machine_get(
        &self,
        resource_group: &str,
        name: &str,
        expand: Option<String>,
    ) -> Result<Value> {
        let mut query = Vec::new();
        if let Some(expand) = expand.as_deref() {
            query.push(("$expand", expand));
        }
        self.get_resource(&self.vm_path(resource_group, name), &query)
            .await
    }

    async fn virtual_machine_capture(
        &self,
        resource_group: &str,
        name: &str,
        parameters: Value,
    ) -> Result<Value> {
        let outcome = self
            .post_action(
                &format!("{}/capture", self.vm_path(resource_group, name)),
                Some(&parameters),
            )
            .await?;
        // The operation body nests the capture template under
        // properties.output; surface the template itself when present.
        Ok(outcome
            .pointer("/properties/output")
            .cloned()
            .unwrap_or(outcome))
    }

    async fn virtual_machine_convert_to_managed_disks(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Value> {
        self.vm_action(resource_group, name, "convertToManagedDisks")
            .await
    }

    async fn virtual_machine_deallocate(&self, resource_group: &str, name: &str) -> Result<Value> {
        self.vm_action(resource_group, name, "deallocate").await
    }

    async fn virtual_machine_generalize(&self, resource_group: &str, name: &str) -> Result<()> {
        self.post_action(
            &format!("{}/generalize", self.vm_path(resource_group, name)),
            None,
        )
        .await?;
        Ok(())
    }

    async fn virtual_machine_power_off(&self, resource_group: &str, name: &str) -> Result<Value> {
        self.vm_action(resource_group, name, "powerOff").await
    }

    async fn virtual_machine_restart(&self, resource_group: &str, name: &str) -> Result<Value> {
        self.vm_action(resource_group, name, "restart").await
    }

    async fn virtual_machine_start(&self, resource_group: &str, name: &str) -> Result<Value> {
        self.vm_action(resource_group, name, "start").await
    }

    async fn virtual_machine_redeploy(&self, resource_group: &str, name: &str) -> Result<Value> {
        self.vm_action(resource_group, name, "redeploy").await
    }

    async fn virtual_machines_list(&self, resource_group: &str) -> Result<Vec<Value>> {
        self.get_paged(&format!(
            "subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachines",
            self.subscription_id, resource_group
        ))
        .await
    }

    async fn virtual_machines_list_all(&self) -> Result<Vec<Value>> {
        self.get_paged(&format!(
            "subscriptions/{}/providers/Microsoft.Compute/virtualMachines",
            self.subscription_id
        ))
        .await
    }

    async fn virtual_machines_list_available_sizes(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Vec<Value>> {
        self.get_paged(&format!("{}/vmSizes", self.vm_path(resource_group, name)))
            .await
    }
}

#[async_trait]
impl ResourceApi for ArmClient {
    async fn resource_group_get(&self, name: &str) -> Result<Value> {
        self.get_resource(
            &format!(
                "subscriptions/{}/resourcegroups/{}",
                self.subscription_id, name
            ),
            &[],
        )
        .await
    }
}

async fn read_json_or_null(response: reqwest::Response) -> Value {
    let text = response.text().await.unwrap_or_default();
    if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::Null)
    }
}

/// Pull `(code, message)` out of an ARM error body. Handles both the
/// wrapped `{"error": {"code": ..., "message": ...}}` shape and the flat
/// one some endpoints return.
fn parse_arm_error(body: &str) -> (Option<String>, Option<String>) {
    let Ok(parsed) = serde_json::from_str::<Value>(body) else {
        return (None, None);
    };
    let error = parsed.get("error").unwrap_or(&parsed);
    let code = error.get("code").and_then(Value::as_str).map(str::to_string);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string);
    (code, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_arm_error_wrapped() {
        let body = r#"{"error":{"code":"ResourceNotFound","message":"The Resource was not found."}}"#;
        let (code, message) = parse_arm_error(body);
        assert_eq!(code.as_deref(), Some("ResourceNotFound"));
        assert_eq!(message.as_deref(), Some("The Resource was not found."));
    }

    #[test]
    fn test_parse_arm_error_flat() {
        let body = r#"{"code":"InvalidParameter","message":"bad platformFaultDomainCount"}"#;
        let (code, message) = parse_arm_error(body);
        assert_eq!(code.as_deref(), Some("InvalidParameter"));
        assert_eq!(message.as_deref(), Some("bad platformFaultDomainCount"));
    }

    #[test]
    fn test_parse_arm_error_garbage() {
        assert_eq!(parse_arm_error("<html>bad gateway</html>"), (None, None));
    }
}
