mod common;

use anyhow::Result;
use axum::http::{Method, StatusCode};
use serde_json::{json, Value};

use common::{effective, strings, TestApp};

/// Manager with a permanent admin grant on the CRITICAL `roles` menu
async fn risky_user(app: &TestApp) -> Result<String> {
    let id = app.create_user("risky@example.com", &["manager"]).await?;
    let (status, body) = app
        .post(
            &format!("/api/user-management/users/{}/permissions", id),
            json!({
                "overrides": [{ "menuKey": "roles", "overrideType": "GRANT", "allowedActions": ["admin"] }],
                "reason": "Migration work",
            }),
        )
        .await?;
    anyhow::ensure!(status == StatusCode::OK, "override failed: {}", body);
    Ok(id)
}

async fn generate(app: &TestApp, user_id: &str) -> Result<(StatusCode, Value)> {
    app.post("/api/ai-recommendations/permissions/generate", json!({ "userId": user_id }))
        .await
}

#[tokio::test]
async fn generate_flags_permanent_critical_grant() -> Result<()> {
    let app = common::spawn_app().await?;
    let id = risky_user(&app).await?;

    let (status, body) = generate(&app, &id).await?;
    assert_eq!(status, StatusCode::CREATED, "body: {}", body);
    let recs = body["data"].as_array().unwrap();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0]["kind"], "REVOKE");
    assert_eq!(recs[0]["status"], "PENDING");
    assert_eq!(strings(&recs[0]["actions"]), vec!["admin"]);

    // A second run does not duplicate the pending recommendation
    let (status, body) = generate(&app, &id).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"].as_array().unwrap().is_empty());

    let (_, body) = app.get("/api/ai-recommendations/permissions?status=PENDING").await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    Ok(())
}

#[tokio::test]
async fn generate_for_unknown_user_is_not_found() -> Result<()> {
    let app = common::spawn_app().await?;

    let (status, _) = generate(&app, &uuid::Uuid::new_v4().to_string()).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn approving_revoke_creates_deny_override() -> Result<()> {
    let app = common::spawn_app().await?;
    let id = risky_user(&app).await?;
    let (_, body) = generate(&app, &id).await?;
    let rec_id = body["data"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .post(
            &format!("/api/ai-recommendations/permissions/{}/approve", rec_id),
            json!({ "reason": "Agreed in review" }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(body["data"]["recommendation"]["status"], "APPROVED");
    assert_eq!(body["data"]["recommendation"]["decidedBy"], common::OPERATOR_EMAIL);
    assert_eq!(body["data"]["overrideCreated"]["overrideType"], "DENY");

    let (_, body) = app.get(&format!("/api/user-management/users/{}/permissions", id)).await?;
    let roles = effective(&body["data"], "roles");
    assert_eq!(strings(&roles["allowedActions"]), vec!["read"]);
    assert_eq!(strings(&roles["deniedActions"]), vec!["admin"]);

    // Decided recommendations cannot be decided again
    let (status, _) = app
        .post(&format!("/api/ai-recommendations/permissions/{}/reject", rec_id), json!({}))
        .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    Ok(())
}

#[tokio::test]
async fn reject_accepts_empty_body() -> Result<()> {
    let app = common::spawn_app().await?;
    let id = risky_user(&app).await?;
    let (_, body) = generate(&app, &id).await?;
    let rec_id = body["data"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .request(
            Method::POST,
            &format!("/api/ai-recommendations/permissions/{}/reject", rec_id),
            None,
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(body["data"]["status"], "REJECTED");

    // The grant is untouched
    let (_, body) = app.get(&format!("/api/user-management/users/{}/permissions", id)).await?;
    assert!(strings(&effective(&body["data"], "roles")["allowedActions"]).contains(&"admin".to_string()));

    let (_, body) = app
        .get(&format!("/api/permission-engine/audit?entityId={}&action=REVIEWED", id))
        .await?;
    assert_eq!(body["data"]["entries"].as_array().unwrap().len(), 1);

    Ok(())
}

#[tokio::test]
async fn approving_revoke_only_removes_the_named_action() -> Result<()> {
    let app = common::spawn_app().await?;
    let id = app.create_user("broad@example.com", &["viewer"]).await?;
    let (status, body) = app
        .post(
            &format!("/api/user-management/users/{}/permissions", id),
            json!({
                "overrides": [{ "menuKey": "roles", "overrideType": "GRANT", "allowedActions": ["read", "write", "admin"] }],
                "reason": "Role catalogue rework",
            }),
        )
        .await?;
    assert_eq!(status, StatusCode::OK, "body: {}", body);

    let (_, body) = generate(&app, &id).await?;
    let recs = body["data"].as_array().unwrap();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0]["kind"], "REVOKE");
    let rec_id = recs[0]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .post(&format!("/api/ai-recommendations/permissions/{}/approve", rec_id), json!({}))
        .await?;
    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(body["data"]["overrideCreated"]["overrideType"], "CUSTOM");

    let (_, body) = app.get(&format!("/api/user-management/users/{}/permissions", id)).await?;
    let roles = effective(&body["data"], "roles");
    assert_eq!(strings(&roles["allowedActions"]), vec!["read", "write"]);
    assert_eq!(strings(&roles["deniedActions"]), vec!["admin"]);
    assert_eq!(body["data"]["overrides"].as_array().unwrap().len(), 1);

    Ok(())
}
