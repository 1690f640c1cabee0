mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

use common::{effective, strings};

#[tokio::test]
async fn role_only_user_gets_role_defaults() -> Result<()> {
    let app = common::spawn_app().await?;
    let id = app.create_user("viewer@example.com", &["viewer"]).await?;

    let (status, body) = app.get(&format!("/api/user-management/users/{}/permissions", id)).await?;
    assert_eq!(status, StatusCode::OK);
    let perms = &body["data"];

    let tenants = effective(perms, "tenants");
    assert_eq!(strings(&tenants["allowedActions"]), vec!["read"]);
    assert_eq!(tenants["hasOverride"], false);
    assert_eq!(tenants["source"], "role");

    // Menus the role never mentions resolve to nothing
    let roles = effective(perms, "roles");
    assert!(strings(&roles["allowedActions"]).is_empty());
    assert!(perms["overrides"].as_array().unwrap().is_empty());

    Ok(())
}

#[tokio::test]
async fn grant_override_adds_action() -> Result<()> {
    let app = common::spawn_app().await?;
    let id = app.create_user("grant@example.com", &["viewer"]).await?;

    let (status, body) = app
        .post(
            &format!("/api/user-management/users/{}/permissions", id),
            json!({
                "overrides": [{ "menuKey": "tenants", "overrideType": "GRANT", "allowedActions": ["write"] }],
                "reason": "Covering for the tenant team",
            }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "body: {}", body);

    let tenants = effective(&body["data"], "tenants");
    assert_eq!(strings(&tenants["allowedActions"]), vec!["read", "write"]);
    assert_eq!(tenants["hasOverride"], true);
    assert_eq!(body["data"]["overrides"].as_array().unwrap().len(), 1);

    Ok(())
}

#[tokio::test]
async fn deny_override_removes_role_action() -> Result<()> {
    let app = common::spawn_app().await?;
    let id = app.create_user("deny@example.com", &["manager"]).await?;

    let (status, body) = app
        .post(
            &format!("/api/user-management/users/{}/permissions", id),
            json!({
                "overrides": [{ "menuKey": "tenants", "overrideType": "DENY", "deniedActions": ["write"] }],
                "reason": "Freeze tenant edits",
            }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "body: {}", body);

    let tenants = effective(&body["data"], "tenants");
    assert_eq!(strings(&tenants["allowedActions"]), vec!["read"]);
    assert_eq!(strings(&tenants["deniedActions"]), vec!["write"]);
    assert_eq!(tenants["hasOverride"], true);

    // A newer override on the same menu supersedes the deny
    let (_, body) = app
        .post(
            &format!("/api/user-management/users/{}/permissions", id),
            json!({
                "overrides": [{ "menuKey": "tenants", "overrideType": "CUSTOM", "allowedActions": ["delete"], "deniedActions": ["read"] }],
                "reason": "Delete-only cleanup access",
            }),
        )
        .await?;
    let tenants = effective(&body["data"], "tenants");
    assert_eq!(strings(&tenants["allowedActions"]), vec!["write", "delete"]);
    assert_eq!(strings(&tenants["deniedActions"]), vec!["read"]);
    assert_eq!(body["data"]["overrides"].as_array().unwrap().len(), 1);

    Ok(())
}

#[tokio::test]
async fn overrides_require_reason_and_known_menu() -> Result<()> {
    let app = common::spawn_app().await?;
    let id = app.create_user("invalid@example.com", &["viewer"]).await?;
    let path = format!("/api/user-management/users/{}/permissions", id);

    let (status, body) = app
        .post(
            &path,
            json!({ "overrides": [{ "menuKey": "tenants", "overrideType": "GRANT", "allowedActions": ["write"] }] }),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["field_errors"]["reason"].is_string());

    let (status, _) = app
        .post(
            &path,
            json!({
                "overrides": [{ "menuKey": "missing", "overrideType": "GRANT", "allowedActions": ["read"] }],
                "reason": "typo",
            }),
        )
        .await?;
    assert!(status.is_client_error());

    // Nothing was written by the rejected requests
    let (_, body) = app.get(&path).await?;
    assert!(body["data"]["overrides"].as_array().unwrap().is_empty());

    Ok(())
}

#[tokio::test]
async fn revoked_override_stops_applying() -> Result<()> {
    let app = common::spawn_app().await?;
    let id = app.create_user("revoke@example.com", &["viewer"]).await?;
    let path = format!("/api/user-management/users/{}/permissions", id);

    let (_, body) = app
        .post(
            &path,
            json!({
                "overrides": [{ "menuKey": "users", "overrideType": "GRANT", "allowedActions": ["write"] }],
                "reason": "Temporary",
            }),
        )
        .await?;
    let override_id = body["data"]["overrides"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .post(&path, json!({ "revokeOverrideIds": [override_id], "reason": "Done" }))
        .await?;
    assert_eq!(status, StatusCode::OK, "body: {}", body);
    let users = effective(&body["data"], "users");
    assert_eq!(strings(&users["allowedActions"]), vec!["read"]);
    assert_eq!(users["hasOverride"], false);

    Ok(())
}

#[tokio::test]
async fn menu_catalog_is_listed() -> Result<()> {
    let app = common::spawn_app().await?;

    let (status, body) = app.get("/api/permission-engine/menu-permissions").await?;
    assert_eq!(status, StatusCode::OK);
    let keys: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["menuKey"].as_str())
        .collect();
    assert!(keys.contains(&"tenants"));
    assert!(keys.contains(&"permissions"));

    Ok(())
}
