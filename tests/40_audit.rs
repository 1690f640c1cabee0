mod common;

use anyhow::Result;
use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn override_changes_are_audited() -> Result<()> {
    let app = common::spawn_app().await?;
    let id = app.create_user("audited@example.com", &["viewer"]).await?;

    let (status, _) = app
        .post(
            &format!("/api/user-management/users/{}/permissions", id),
            json!({
                "overrides": [{ "menuKey": "permissions", "overrideType": "GRANT", "allowedActions": ["admin"] }],
                "reason": "Incident response",
            }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .get(&format!(
            "/api/permission-engine/audit?entityType=USER&entityId={}&action=OVERRIDDEN",
            id
        ))
        .await?;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"]["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["performedBy"], common::OPERATOR_EMAIL);
    assert_eq!(entries[0]["reason"], "Incident response");
    // Admin on a CRITICAL menu scores above the baseline
    assert!(entries[0]["aiRiskScore"].as_u64().unwrap() > 50, "entry: {}", entries[0]);

    // User creation is in the log too, newest first overall
    let (_, body) = app.get(&format!("/api/permission-engine/audit?entityId={}", id)).await?;
    let actions: Vec<&str> = body["data"]["entries"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["action"].as_str())
        .collect();
    assert_eq!(actions.first(), Some(&"OVERRIDDEN"));
    assert!(actions.contains(&"GRANTED"));

    Ok(())
}

#[tokio::test]
async fn invalid_audit_filter_is_rejected() -> Result<()> {
    let app = common::spawn_app().await?;

    let (status, body) = app.get("/api/permission-engine/audit?entityType=PLANET").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["field_errors"]["entityType"].is_string(), "body: {}", body);

    Ok(())
}

#[tokio::test]
async fn audit_chain_verifies() -> Result<()> {
    let app = common::spawn_app().await?;
    app.create_user("one@example.com", &["viewer"]).await?;
    app.create_user("two@example.com", &["manager"]).await?;

    let (status, body) = app.get("/api/permission-engine/audit/verify").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["chainIntact"], true);
    assert!(body["data"]["totalEntries"].as_u64().unwrap() >= 2);
    assert!(body["data"].get("firstBreakAt").is_none());

    Ok(())
}
