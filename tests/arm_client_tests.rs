//! Integration tests for the Resource Manager client, driven against a
//! local mock server: token acquisition, paging, error mapping, and
//! long-running operation polling.

use azurerm_compute::azurerm::{
    auth::{AuthMethod, AzureRmCredentials, CloudEnvironment},
    get_client, ArmClient, ComputeApi, ResourceApi,
};
use azurerm_compute::error::CloudError;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SUB: &str = "54321";

fn credentials(server_uri: &str) -> AzureRmCredentials {
    let endpoint = server_uri.trim_end_matches('/').to_string();
    AzureRmCredentials {
        subscription_id: SUB.to_string(),
        auth: AuthMethod::ServicePrincipal {
            client_id: "12345".to_string(),
            secret: "supersecret".to_string(),
            tenant: "testtenant".to_string(),
        },
        cloud: CloudEnvironment {
            name: "MockCloud".to_string(),
            authority: endpoint.clone(),
            resource_manager: endpoint,
        },
    }
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/testtenant/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "expires_in": 3600,
            "access_token": "testtoken",
        })))
        .mount(server)
        .await;
}

async fn compute_client(server: &MockServer) -> ArmClient {
    mount_token(server).await;
    get_client("compute", &credentials(&server.uri()))
        .unwrap()
        .with_poll_interval(Duration::from_millis(10))
}

fn vm_path(name: &str) -> String {
    format!(
        "/subscriptions/{SUB}/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/{name}"
    )
}

#[tokio::test]
async fn test_get_sends_bearer_token_and_api_version() {
    let server = MockServer::start().await;
    let client = compute_client(&server).await;

    Mock::given(method("GET"))
        .and(path(vm_path("testvm")))
        .and(header("authorization", "Bearer testtoken"))
        .and(query_param("api-version", "2023-03-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "testvm",
            "location": "eastus",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let vm = client.virtual_machine_get("rg", "testvm", None).await.unwrap();
    assert_eq!(vm["name"], json!("testvm"));
}

#[tokio::test]
async fn test_get_forwards_expand() {
    let server = MockServer::start().await;
    let client = compute_client(&server).await;

    Mock::given(method("GET"))
        .and(path(vm_path("testvm")))
        .and(query_param("$expand", "instanceView"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "testvm"})))
        .expect(1)
        .mount(&server)
        .await;

    client
        .virtual_machine_get("rg", "testvm", Some("instanceView".to_string()))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_token_is_cached_across_requests() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    let client = get_client("compute", &credentials(&server.uri())).unwrap();

    Mock::given(method("GET"))
        .and(path(vm_path("testvm")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "testvm"})))
        .mount(&server)
        .await;

    client.virtual_machine_get("rg", "testvm", None).await.unwrap();
    client.virtual_machine_get("rg", "testvm", None).await.unwrap();

    let token_requests = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path().ends_with("/oauth2/v2.0/token"))
        .count();
    assert_eq!(token_requests, 1);
}

#[tokio::test]
async fn test_token_failure_maps_to_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/testtenant/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "AADSTS7000215: Invalid client secret provided.",
        })))
        .mount(&server)
        .await;
    let client = get_client("compute", &credentials(&server.uri())).unwrap();

    let err = client
        .virtual_machine_get("rg", "testvm", None)
        .await
        .unwrap_err();
    match err {
        CloudError::Auth(message) => assert!(message.contains("AADSTS7000215")),
        other => panic!("expected an auth error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_not_found_maps_to_resource_not_found() {
    let server = MockServer::start().await;
    let client = compute_client(&server).await;

    Mock::given(method("GET"))
        .and(path(vm_path("idontexist")))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {
                "code": "ResourceNotFound",
                "message": "The Resource was not found.",
            }
        })))
        .mount(&server)
        .await;

    let err = client
        .virtual_machine_get("rg", "idontexist", None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "The Resource was not found.");
}

#[tokio::test]
async fn test_arm_error_message_surfaced() {
    let server = MockServer::start().await;
    let client = compute_client(&server).await;

    Mock::given(method("POST"))
        .and(path(format!("{}/capture", vm_path("testvm"))))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": {
                "code": "OperationNotAllowed",
                "message": "Operation 'capture' is not allowed on VM 'testvm' since the VM is not generalized.",
            }
        })))
        .mount(&server)
        .await;

    let err = client
        .virtual_machine_capture("rg", "testvm", json!({"vhdPrefix": "capture-"}))
        .await
        .unwrap_err();
    match err {
        CloudError::HttpResponse { status, message } => {
            assert_eq!(status, 409);
            assert!(message.contains("not generalized"));
        }
        other => panic!("expected an http error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_listing_follows_next_link() {
    let server = MockServer::start().await;
    let client = compute_client(&server).await;

    let next = format!("{}/page2?api-version=2023-03-01", server.uri());
    Mock::given(method("GET"))
        .and(path(format!(
            "/subscriptions/{SUB}/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"name": "vm1"}],
            "nextLink": next,
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"name": "vm2"}],
        })))
        .mount(&server)
        .await;

    let vms = client.virtual_machines_list("rg").await.unwrap();
    assert_eq!(vms.len(), 2);
    assert_eq!(vms[1]["name"], json!("vm2"));
}

#[tokio::test]
async fn test_lifecycle_action_polls_until_succeeded() {
    let server = MockServer::start().await;
    let client = compute_client(&server).await;

    let operation = format!("{}/operations/op1", server.uri());
    Mock::given(method("POST"))
        .and(path(format!("{}/start", vm_path("testvm"))))
        .respond_with(
            ResponseTemplate::new(202).insert_header("azure-asyncoperation", operation.as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/operations/op1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "InProgress"})))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/operations/op1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Succeeded"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(vm_path("testvm")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "testvm",
            "properties": {"provisioningState": "Succeeded"},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let vm = client.virtual_machine_start("rg", "testvm").await.unwrap();
    assert_eq!(vm["properties"]["provisioningState"], json!("Succeeded"));
}

#[tokio::test]
async fn test_failed_operation_surfaces_error() {
    let server = MockServer::start().await;
    let client = compute_client(&server).await;

    let operation = format!("{}/operations/op2", server.uri());
    Mock::given(method("POST"))
        .and(path(format!("{}/restart", vm_path("testvm"))))
        .respond_with(
            ResponseTemplate::new(202).insert_header("azure-asyncoperation", operation.as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/operations/op2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "Failed",
            "error": {"code": "VMRestartTimedOut", "message": "Restart timed out."},
        })))
        .mount(&server)
        .await;

    let err = client.virtual_machine_restart("rg", "testvm").await.unwrap_err();
    assert!(err.to_string().contains("Restart timed out."));
}

#[tokio::test]
async fn test_capture_returns_template_output() {
    let server = MockServer::start().await;
    let client = compute_client(&server).await;

    let operation = format!("{}/operations/op3", server.uri());
    Mock::given(method("POST"))
        .and(path(format!("{}/capture", vm_path("testvm"))))
        .respond_with(
            ResponseTemplate::new(202).insert_header("azure-asyncoperation", operation.as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/operations/op3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "Succeeded",
            "properties": {
                "output": {"resources": [{"type": "Microsoft.Compute/images"}]},
            },
        })))
        .mount(&server)
        .await;

    let template = client
        .virtual_machine_capture("rg", "testvm", json!({"vhdPrefix": "capture-"}))
        .await
        .unwrap();
    assert_eq!(
        template["resources"][0]["type"],
        json!("Microsoft.Compute/images")
    );
}

#[tokio::test]
async fn test_availability_set_put_and_delete() {
    let server = MockServer::start().await;
    let client = compute_client(&server).await;

    let set_path = format!(
        "/subscriptions/{SUB}/resourceGroups/rg/providers/Microsoft.Compute/availabilitySets/testset"
    );
    let body = json!({"location": "eastus", "properties": {"platformFaultDomainCount": 2}});
    Mock::given(method("PUT"))
        .and(path(set_path.as_str()))
        .and(body_json(body.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "testset",
            "location": "eastus",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(set_path.as_str()))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let created = client
        .availability_set_create_or_update("rg", "testset", body)
        .await
        .unwrap();
    assert_eq!(created["name"], json!("testset"));

    client.availability_set_delete("rg", "testset").await.unwrap();
}

#[tokio::test]
async fn test_resource_group_get_uses_resource_api_version() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    let client = get_client("resource", &credentials(&server.uri())).unwrap();

    Mock::given(method("GET"))
        .and(path(format!("/subscriptions/{SUB}/resourcegroups/rg")))
        .and(query_param("api-version", "2021-04-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "rg",
            "location": "eastus",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let group = client.resource_group_get("rg").await.unwrap();
    assert_eq!(group["location"], json!("eastus"));
}

#[tokio::test]
async fn test_cloud_environment_metadata_discovery() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metadata/endpoints"))
        .and(query_param("api-version", "2019-05-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "AzureStackCloud",
            "authentication": {"loginEndpoint": "https://login.stack.local/"},
            "resourceManager": "https://management.stack.local/",
        })))
        .mount(&server)
        .await;

    let environment = CloudEnvironment::resolve(Some(&server.uri())).await.unwrap();
    assert_eq!(environment.name, "AzureStackCloud");
    assert_eq!(environment.authority, "https://login.stack.local");
    assert_eq!(environment.resource_manager, "https://management.stack.local");
}
