#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use serde_json::{json, Value};
use tower::ServiceExt;

use tenant_console_api::app::{app, AppState};
use tenant_console_api::auth::{generate_jwt, Claims};
use tenant_console_api::config::AppConfig;
use tenant_console_api::database::MemoryStore;
use tenant_console_api::permissions::{seed_defaults, CatalogSeed};
use tenant_console_api::services::HeuristicEngine;

pub const OPERATOR_EMAIL: &str = "operator@example.com";

/// Router state over a freshly seeded memory store
pub struct TestApp {
    pub state: AppState,
    pub token: String,
}

pub async fn spawn_app() -> Result<TestApp> {
    let store = Arc::new(MemoryStore::new());
    seed_defaults(store.as_ref(), &CatalogSeed::builtin()?).await?;

    let mut config = AppConfig::development();
    config.recommendations.stream_delay_ms = 0;

    let claims = Claims::new("operator", Some(OPERATOR_EMAIL.to_string()), 1);
    let token = generate_jwt(&claims, &config.security.jwt_secret)?;

    let state = AppState::new(store, config, Arc::new(HeuristicEngine));
    Ok(TestApp { state, token })
}

impl TestApp {
    /// Authenticated request; returns the status and raw body
    pub async fn raw(&self, method: Method, path: &str, body: Option<Value>, token: Option<&str>) -> Result<(StatusCode, String)> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(serde_json::to_vec(&value)?)
            }
            None => Body::empty(),
        };

        let response = app(self.state.clone()).oneshot(builder.body(body)?).await?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok((status, String::from_utf8(bytes.to_vec()).context("body is not UTF-8")?))
    }

    pub async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
        let (status, text) = self.raw(method, path, body, Some(&self.token)).await?;
        let value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).with_context(|| format!("invalid JSON body: {}", text))?
        };
        Ok((status, value))
    }

    pub async fn get(&self, path: &str) -> Result<(StatusCode, Value)> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<(StatusCode, Value)> {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Id of a seeded role by name
    pub async fn role_id(&self, name: &str) -> Result<String> {
        let (_, body) = self.get("/api/user-management/roles").await?;
        body["data"]
            .as_array()
            .and_then(|roles| roles.iter().find(|r| r["name"] == name))
            .and_then(|r| r["id"].as_str())
            .map(str::to_string)
            .with_context(|| format!("role {} not seeded", name))
    }

    /// Creates a user with the given roles and returns its id
    pub async fn create_user(&self, email: &str, roles: &[&str]) -> Result<String> {
        let mut role_ids = Vec::new();
        for name in roles {
            role_ids.push(self.role_id(name).await?);
        }
        let (status, body) = self
            .post(
                "/api/user-management/users",
                json!({ "email": email, "firstName": "Test", "lastName": "User", "roleIds": role_ids }),
            )
            .await?;
        anyhow::ensure!(status == StatusCode::CREATED, "user create failed: {} {}", status, body);
        body["data"]["id"]
            .as_str()
            .map(str::to_string)
            .context("created user has no id")
    }

    pub async fn create_tenant(&self, name: &str, domain: &str) -> Result<(StatusCode, Value)> {
        self.post("/api/tenants", json!({ "name": name, "domain": domain, "planType": "PRO" }))
            .await
    }
}

static NULL: Value = Value::Null;

/// Effective permission entry for one menu
pub fn effective<'a>(permissions: &'a Value, menu_key: &str) -> &'a Value {
    permissions["effective"]
        .as_array()
        .and_then(|items| items.iter().find(|p| p["menuKey"] == menu_key))
        .unwrap_or(&NULL)
}

pub fn strings(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}
