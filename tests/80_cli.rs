use std::time::Duration;

use anyhow::Result;

use tenant_console_api::cli::client::ApiClient;
use tenant_console_api::cli::commands::tenant::create_tenant;
use tenant_console_api::cli::commands::user::create_user;
use tenant_console_api::cli::forms::{NewTenantForm, NewUserForm};

// Nothing listens here; any request attempt would fail with a connection error
fn offline_client() -> Result<ApiClient> {
    ApiClient::new("http://127.0.0.1:9", Some("token".into()), Duration::from_millis(200))
}

#[tokio::test]
async fn user_without_roles_fails_before_any_request() -> Result<()> {
    let client = offline_client()?;
    let form = NewUserForm {
        email: "no-roles@example.com".into(),
        first_name: None,
        last_name: None,
        roles: vec![],
        tenant_id: None,
    };

    let err = create_user(&client, &form).await.unwrap_err();
    assert!(err.to_string().contains("roleIds"), "unexpected error: {}", err);
    assert_eq!(client.requests_sent(), 0);

    Ok(())
}

#[tokio::test]
async fn invalid_tenant_fails_before_any_request() -> Result<()> {
    let client = offline_client()?;
    let form = NewTenantForm {
        name: "Acme".into(),
        domain: "acme.example.com".into(),
        plan_type: Some("PLATINUM".into()),
        status: None,
        brand_color: Some("#12345".into()),
        health_score: None,
        description: None,
        max_users: None,
    };

    let err = create_tenant(&client, &form).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("planType"), "unexpected error: {}", message);
    assert!(message.contains("brandColor"), "unexpected error: {}", message);
    assert_eq!(client.requests_sent(), 0);

    Ok(())
}

#[tokio::test]
async fn valid_user_reaches_the_network() -> Result<()> {
    let client = offline_client()?;
    let form = NewUserForm {
        email: "ok@example.com".into(),
        first_name: Some("Ok".into()),
        last_name: None,
        roles: vec!["viewer".into()],
        tenant_id: None,
    };

    // Validation passes, so the role lookup is attempted and fails to connect
    assert!(create_user(&client, &form).await.is_err());
    assert_eq!(client.requests_sent(), 1);

    Ok(())
}
