#![allow(dead_code)]

use serde_json::{json, Value};
use sharepoint_core::auth::{Credential, TokenManager};
use sharepoint_core::graph::{GraphClient, Location, RetryPolicy};
use sharepoint_core::{Settings, SharePointConnector};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TENANT: &str = "tenant-1";
pub const SITE_URL: &str = "https://contoso.sharepoint.com/sites/Marketing";
pub const SITE_PATH: &str = "/sites/contoso.sharepoint.com:/sites/Marketing";
pub const SITE_ID: &str = "contoso.sharepoint.com,site-guid,web-guid";
pub const DRIVE_ID: &str = "drive-docs";

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 4,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

pub async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/{}/oauth2/v2.0/token", TENANT)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .mount(server)
        .await;
}

pub fn graph(server: &MockServer) -> GraphClient {
    let tokens = TokenManager::new(
        Credential::new(TENANT, "client-1", "secret-1", &server.uri()),
        Duration::from_secs(5),
        fast_retry(),
        Duration::from_secs(300),
    )
    .unwrap();
    GraphClient::new(tokens, &server.uri(), Duration::from_secs(5), fast_retry()).unwrap()
}

pub fn settings(server: &MockServer) -> Settings {
    let uri = server.uri();
    Settings::from_lookup(|key| match key {
        "TENANT_ID" => Some(TENANT.to_string()),
        "CLIENT_ID" => Some("client-1".to_string()),
        "CLIENT_SECRET" => Some("secret-1".to_string()),
        "SITE_URL" => Some(SITE_URL.to_string()),
        "GRAPH_BASE_URL" | "AUTHORITY_URL" => Some(uri.clone()),
        "MAX_FOLDER_DEPTH" => Some("3".to_string()),
        _ => None,
    })
    .unwrap()
}

pub fn connector(server: &MockServer) -> SharePointConnector {
    SharePointConnector::new(settings(server), graph(server))
}

/// Site lookup plus a two-library drive listing.
pub async fn mount_site(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(SITE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": SITE_ID,
            "name": "Marketing",
            "displayName": "Marketing",
            "description": "Marketing team site",
            "webUrl": SITE_URL,
            "createdDateTime": "2023-01-01T00:00:00Z",
            "lastModifiedDateTime": "2024-06-01T00:00:00Z"
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/sites/{}/drives", SITE_ID)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {
                    "id": DRIVE_ID,
                    "name": "Documents",
                    "webUrl": format!("{}/Shared%20Documents", SITE_URL),
                    "driveType": "documentLibrary"
                },
                {
                    "id": "drive-policies",
                    "name": "Policies",
                    "webUrl": format!("{}/Policies", SITE_URL),
                    "driveType": "documentLibrary"
                }
            ]
        })))
        .mount(server)
        .await;
}

pub fn library_root() -> Location {
    Location {
        drive_id: DRIVE_ID.to_string(),
        library: "Shared Documents".to_string(),
        item_path: String::new(),
    }
}

pub fn folder_item(id: &str, name: &str, child_count: u64) -> Value {
    json!({
        "id": id,
        "name": name,
        "folder": {"childCount": child_count},
        "webUrl": format!("{}/Shared%20Documents/{}", SITE_URL, name)
    })
}

pub fn file_item(id: &str, name: &str, mime: &str, size: u64) -> Value {
    json!({
        "id": id,
        "name": name,
        "size": size,
        "file": {"mimeType": mime},
        "createdDateTime": "2024-01-02T03:04:05Z",
        "lastModifiedDateTime": "2024-02-03T04:05:06Z",
        "createdBy": {"user": {"displayName": "Ada Lovelace"}},
        "parentReference": {"driveId": DRIVE_ID, "path": format!("/drives/{}/root:", DRIVE_ID)}
    })
}

pub fn item_path(relative: &str) -> String {
    format!("/drives/{}/root:/{}", DRIVE_ID, relative)
}

pub fn children_path(item_id: &str) -> String {
    format!("/drives/{}/items/{}/children", DRIVE_ID, item_id)
}

pub fn content_path(item_id: &str) -> String {
    format!("/drives/{}/items/{}/content", DRIVE_ID, item_id)
}
