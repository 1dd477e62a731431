//! Credential resolution and token acquisition for Azure Resource Manager.
//!
//! Mirrors the provider parameter contract of the module functions: every
//! invocation carries a keyword bundle with either service principal
//! credentials (`subscription_id`, `client_id`, `secret`, `tenant`),
//! username/password credentials (`subscription_id`, `username`,
//! `password`), or just a `subscription_id` for the default chain
//! (`AZURE_*` environment variables, then the Azure CLI token cache).
//!
//! An optional `cloud_environment` selector points the client at
//! sovereign-cloud endpoints (`AZURE_CHINA_CLOUD`, `AZURE_US_GOV_CLOUD`,
//! `AZURE_GERMAN_CLOUD`); an `http(s)://` value triggers endpoint
//! discovery against that URL's ARM metadata endpoint.

use crate::error::{CloudError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Well-known public client id used for the username/password flow when the
/// caller does not supply one (the Azure CLI application id, same default
/// the upstream credential types use).
const DEFAULT_PUBLIC_CLIENT_ID: &str = "04b07795-8ddb-461a-bbee-02f9e1bf7b46";

/// API version of the ARM endpoint-metadata document.
const METADATA_API_VERSION: &str = "2019-05-01";

/// Refresh tokens this long before they would expire.
const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(60);

/// Lifetime assumed for tokens minted by the Azure CLI, which reports
/// expiry as a local timestamp we deliberately do not parse.
const CLI_TOKEN_TTL: Duration = Duration::from_secs(240);

/// A cloud environment: the authority used for token requests and the
/// Resource Manager endpoint used for management calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudEnvironment {
    /// Environment name (e.g. `AzureCloud`, `AzureUSGovernment`)
    pub name: String,
    /// Azure AD authority base URL
    pub authority: String,
    /// Azure Resource Manager base URL
    pub resource_manager: String,
}

impl CloudEnvironment {
    pub fn public() -> Self {
        Self {
            name: "AzureCloud".to_string(),
            authority: "https://login.microsoftonline.com".to_string(),
            resource_manager: "https://management.azure.com".to_string(),
        }
    }

    pub fn china() -> Self {
        Self {
            name: "AzureChinaCloud".to_string(),
            authority: "https://login.chinacloudapi.cn".to_string(),
            resource_manager: "https://management.chinacloudapi.cn".to_string(),
        }
    }

    pub fn us_government() -> Self {
        Self {
            name: "AzureUSGovernment".to_string(),
            authority: "https://login.microsoftonline.us".to_string(),
            resource_manager: "https://management.usgovcloudapi.net".to_string(),
        }
    }

    pub fn german() -> Self {
        Self {
            name: "AzureGermanCloud".to_string(),
            authority: "https://login.microsoftonline.de".to_string(),
            resource_manager: "https://management.microsoftazure.de".to_string(),
        }
    }

    /// The OAuth2 scope for Resource Manager tokens in this environment.
    pub fn default_scope(&self) -> String {
        format!("{}/.default", self.resource_manager.trim_end_matches('/'))
    }

    /// Resolve a `cloud_environment` selector into concrete endpoints.
    ///
    /// Known names map to the built-in sovereign clouds; a URL triggers
    /// metadata discovery; anything else is a configuration error.
    pub async fn resolve(selector: Option<&str>) -> Result<Self> {
        match selector {
            None | Some("") | Some("AZURE_PUBLIC_CLOUD") => Ok(Self::public()),
            Some("AZURE_CHINA_CLOUD") => Ok(Self::china()),
            Some("AZURE_US_GOV_CLOUD") => Ok(Self::us_government()),
            Some("AZURE_GERMAN_CLOUD") => Ok(Self::german()),
            Some(url) if url.starts_with("http") => Self::from_metadata_endpoint(url).await,
            Some(other) => Err(CloudError::InvalidConfig(format!(
                "Unknown cloud environment '{other}'. Expected AZURE_PUBLIC_CLOUD, \
                 AZURE_CHINA_CLOUD, AZURE_US_GOV_CLOUD, AZURE_GERMAN_CLOUD, or a \
                 metadata endpoint URL."
            ))),
        }
    }

    /// Discover endpoints from an ARM metadata document, for Azure Stack
    /// and other nonstandard environments.
    async fn from_metadata_endpoint(base: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Authentication {
            #[serde(rename = "loginEndpoint")]
            login_endpoint: String,
        }

        #[derive(Deserialize)]
        struct Metadata {
            name: Option<String>,
            authentication: Authentication,
            #[serde(rename = "resourceManager")]
            resource_manager: Option<String>,
        }

        let base = base.trim_end_matches('/');
        let url = format!("{base}/metadata/endpoints?api-version={METADATA_API_VERSION}");
        tracing::debug!(url = %url, "discovering cloud environment endpoints");

        let response = reqwest::get(&url).await?;
        if !response.status().is_success() {
            return Err(CloudError::InvalidConfig(format!(
                "Cloud environment metadata request to {url} failed with status {}",
                response.status()
            )));
        }
        let metadata: Metadata = response
            .json()
            .await
            .map_err(|e| CloudError::Serialization(e.to_string()))?;

        Ok(Self {
            name: metadata.name.unwrap_or_else(|| "AzureCustomCloud".to_string()),
            authority: metadata
                .authentication
                .login_endpoint
                .trim_end_matches('/')
                .to_string(),
            resource_manager: metadata
                .resource_manager
                .unwrap_or_else(|| base.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

/// How we authenticate against Azure AD.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// Service principal: client-credentials grant.
    ServicePrincipal {
        client_id: String,
        secret: String,
        tenant: String,
    },
    /// Username/password: resource-owner password grant.
    UserPassword {
        username: String,
        password: String,
        client_id: Option<String>,
        tenant: Option<String>,
    },
    /// Default chain: `AZURE_CLIENT_ID`/`AZURE_CLIENT_SECRET`/
    /// `AZURE_TENANT_ID`, then the Azure CLI token cache.
    Default,
}

/// A resolved credential bundle: everything the client factory needs.
#[derive(Debug, Clone)]
pub struct AzureRmCredentials {
    pub subscription_id: String,
    pub auth: AuthMethod,
    pub cloud: CloudEnvironment,
}

impl AzureRmCredentials {
    /// Resolve credentials from a keyword bundle, the way every module
    /// function receives them. Falls back to `AZURE_SUBSCRIPTION_ID` for
    /// the subscription and errors when none is present.
    pub async fn from_params(params: &HashMap<String, Value>) -> Result<Self> {
        Self::resolve(params, std::env::var("AZURE_SUBSCRIPTION_ID").ok()).await
    }

    async fn resolve(
        params: &HashMap<String, Value>,
        env_subscription: Option<String>,
    ) -> Result<Self> {
        // Scalars that are not strings (a numeric tenant or subscription
        // id, say) are stringified, the same coercion the keyword
        // accessors apply.
        let get = |key: &str| match params.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::String(_)) | Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string().trim_matches('"').to_string()),
        };

        let subscription_id = get("subscription_id")
            .or(env_subscription)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                CloudError::InvalidConfig("A subscription_id must be specified".to_string())
            })?;

        let cloud_selector = get("cloud_environment");
        let cloud = CloudEnvironment::resolve(cloud_selector.as_deref()).await?;

        let auth = match (get("client_id"), get("secret"), get("tenant")) {
            (Some(client_id), Some(secret), Some(tenant)) => AuthMethod::ServicePrincipal {
                client_id,
                secret,
                tenant,
            },
            _ => match (get("username"), get("password")) {
                (Some(username), Some(password)) => AuthMethod::UserPassword {
                    username,
                    password,
                    client_id: get("client_id"),
                    tenant: get("tenant"),
                },
                _ => AuthMethod::Default,
            },
        };

        Ok(Self {
            subscription_id,
            auth,
            cloud,
        })
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Acquires and caches bearer tokens for one credential bundle.
#[derive(Debug)]
pub struct TokenProvider {
    http: reqwest::Client,
    credentials: AzureRmCredentials,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(credentials: AzureRmCredentials, http: reqwest::Client) -> Self {
        Self {
            http,
            credentials,
            cache: Mutex::new(None),
        }
    }

    /// A valid bearer token, from cache when one is still fresh.
    pub async fn bearer_token(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if cached.expires_at.saturating_duration_since(Instant::now()) > TOKEN_EXPIRY_SKEW {
                return Ok(cached.token.clone());
            }
        }

        let fresh = self.acquire().await?;
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(token)
    }

    async fn acquire(&self) -> Result<CachedToken> {
        let scope = self.credentials.cloud.default_scope();
        match &self.credentials.auth {
            AuthMethod::ServicePrincipal {
                client_id,
                secret,
                tenant,
            } => {
                tracing::debug!(tenant = %tenant, "acquiring service principal token");
                self.request_token(
                    tenant,
                    &[
                        ("grant_type", "client_credentials"),
                        ("client_id", client_id),
                        ("client_secret", secret),
                        ("scope", &scope),
                    ],
                )
                .await
            }
            AuthMethod::UserPassword {
                username,
                password,
                client_id,
                tenant,
            } => {
                let tenant = tenant.as_deref().unwrap_or("organizations");
                let client_id = client_id.as_deref().unwrap_or(DEFAULT_PUBLIC_CLIENT_ID);
                tracing::debug!(username = %username, "acquiring username/password token");
                self.request_token(
                    tenant,
                    &[
                        ("grant_type", "password"),
                        ("client_id", client_id),
                        ("username", username),
                        ("password", password),
                        ("scope", &scope),
                    ],
                )
                .await
            }
            AuthMethod::Default => self.default_chain(&scope).await,
        }
    }

    async fn request_token(&self, tenant: &str, form: &[(&str, &str)]) -> Result<CachedToken> {
        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.credentials.cloud.authority.trim_end_matches('/'),
            tenant
        );

        let response = self.http.post(&url).form(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = token_error_description(&body).unwrap_or(body);
            return Err(CloudError::Auth(format!(
                "token request to {url} failed with status {status}: {detail}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CloudError::Auth(format!("malformed token response: {e}")))?;

        let ttl = Duration::from_secs(token.expires_in.unwrap_or(3600));
        Ok(CachedToken {
            token: token.access_token,
            expires_at: Instant::now() + ttl,
        })
    }

    /// Environment-variable service principal, then the Azure CLI.
    async fn default_chain(&self, scope: &str) -> Result<CachedToken> {
        let env = |key: &str| std::env::var(key).ok().filter(|s| !s.is_empty());

        if let (Some(client_id), Some(secret), Some(tenant)) = (
            env("AZURE_CLIENT_ID"),
            env("AZURE_CLIENT_SECRET"),
            env("AZURE_TENANT_ID"),
        ) {
            tracing::debug!("default chain: using environment service principal");
            return self
                .request_token(
                    &tenant,
                    &[
                        ("grant_type", "client_credentials"),
                        ("client_id", &client_id),
                        ("client_secret", &secret),
                        ("scope", scope),
                    ],
                )
                .await;
        }

        tracing::debug!("default chain: falling back to the Azure CLI");
        self.azure_cli_token().await
    }

    async fn azure_cli_token(&self) -> Result<CachedToken> {
        #[derive(Deserialize)]
        struct CliToken {
            #[serde(rename = "accessToken")]
            access_token: String,
        }

        let resource = self.credentials.cloud.resource_manager.clone();
        let output = tokio::process::Command::new("az")
            .args([
                "account",
                "get-access-token",
                "--resource",
                &resource,
                "--output",
                "json",
            ])
            .output()
            .await
            .map_err(|e| {
                CloudError::Auth(format!(
                    "no usable credentials: environment variables unset and the \
                     Azure CLI could not be invoked ({e})"
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CloudError::Auth(format!(
                "az account get-access-token failed: {}",
                stderr.trim()
            )));
        }

        let token: CliToken = serde_json::from_slice(&output.stdout)
            .map_err(|e| CloudError::Auth(format!("malformed Azure CLI token output: {e}")))?;

        Ok(CachedToken {
            token: token.access_token,
            expires_at: Instant::now() + CLI_TOKEN_TTL,
        })
    }
}

/// Pull `error_description` out of an AAD error body, if it is one.
fn token_error_description(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed
        .get("error_description")
        .or_else(|| parsed.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
