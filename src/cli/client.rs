//! HTTP client for the console API

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context};
use futures::StreamExt;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::event_stream::{EventStreamParser, StreamItem};

pub struct ApiClient {
    http: Client,
    base: Url,
    token: Option<String>,
    requests: AtomicU64,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let mut base = Url::parse(base_url).with_context(|| format!("Invalid API URL '{}'", base_url))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            base,
            token: token.filter(|t| !t.trim().is_empty()),
            requests: AtomicU64::new(0),
        })
    }

    /// Requests sent so far
    pub fn requests_sent(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn url(&self, path: &str) -> anyhow::Result<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("Invalid request path '{}'", path))
    }

    fn request(&self, method: Method, path: &str) -> anyhow::Result<RequestBuilder> {
        let mut builder = self.http.request(method, self.url(path)?);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> anyhow::Result<T> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let response = builder.send().await.context("Request failed")?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("Invalid response body (HTTP {})", status.as_u16()))?;
        decode_envelope(status.as_u16(), body)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> anyhow::Result<T> {
        self.send(self.request(Method::GET, path)?.query(query)).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> anyhow::Result<T> {
        self.send(self.request(Method::POST, path)?.json(body)).await
    }

    pub async fn put<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> anyhow::Result<T> {
        self.send(self.request(Method::PUT, path)?.json(body)).await
    }

    pub async fn patch<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> anyhow::Result<T> {
        self.send(self.request(Method::PATCH, path)?.json(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        self.send(self.request(Method::DELETE, path)?).await
    }

    /// POST and consume a `text/event-stream` response, calling `on_data` for
    /// every data event until `[DONE]` or the connection closes
    pub async fn stream<B, F>(&self, path: &str, body: &B, mut on_data: F) -> anyhow::Result<usize>
    where
        B: Serialize,
        F: FnMut(Value) -> anyhow::Result<()>,
    {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let response = self
            .request(Method::POST, path)?
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .await
            .context("Request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return decode_envelope::<Value>(status.as_u16(), body).map(|_| 0);
        }

        let mut parser = EventStreamParser::new();
        let mut received = 0;
        let mut bytes = response.bytes_stream();
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.context("Stream interrupted")?;
            for item in parser.push(&chunk) {
                if handle_item(item, &mut on_data, &mut received)? {
                    return Ok(received);
                }
            }
        }
        for item in parser.finish() {
            handle_item(item, &mut on_data, &mut received)?;
        }
        Ok(received)
    }
}

/// Returns true once the stream is done
fn handle_item<F>(item: StreamItem, on_data: &mut F, received: &mut usize) -> anyhow::Result<bool>
where
    F: FnMut(Value) -> anyhow::Result<()>,
{
    match item {
        StreamItem::Data(value) => {
            *received += 1;
            on_data(value)?;
            Ok(false)
        }
        StreamItem::Done => Ok(true),
        StreamItem::Error(message) => {
            tracing::warn!("{}", message);
            Ok(false)
        }
    }
}

/// Unwrap `{ success, data }` or turn `{ success: false, error, code }` into an error
pub fn decode_envelope<T: DeserializeOwned>(status: u16, body: Value) -> anyhow::Result<T> {
    if body.get("success").and_then(Value::as_bool) == Some(true) {
        let data = body.get("data").cloned().unwrap_or(Value::Null);
        return serde_json::from_value(data).context("Unexpected response shape");
    }

    let message = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("Request failed")
        .to_string();
    let code = body.get("code").and_then(Value::as_str).unwrap_or("UNKNOWN");
    let mut text = format!("{} (HTTP {} {})", message, status, code);
    if let Some(fields) = body.get("field_errors").and_then(Value::as_object) {
        let details: Vec<String> = fields
            .iter()
            .map(|(field, msg)| format!("{}: {}", field, msg.as_str().unwrap_or_default()))
            .collect();
        text.push_str(&format!(" [{}]", details.join("; ")));
    }
    Err(anyhow!(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn joins_paths_under_base() {
        let client = ApiClient::new("http://localhost:3000/console", None, Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.url("/api/tenants").unwrap().as_str(),
            "http://localhost:3000/console/api/tenants"
        );
    }

    #[test]
    fn envelope_errors_carry_code_and_fields() {
        let body = json!({
            "success": false,
            "error": "Validation failed",
            "code": "VALIDATION_ERROR",
            "field_errors": { "roleIds": "At least one role is required" }
        });
        let err = decode_envelope::<Value>(400, body).unwrap_err().to_string();
        assert!(err.contains("VALIDATION_ERROR"));
        assert!(err.contains("roleIds"));

        let ok: u32 = decode_envelope(200, json!({ "success": true, "data": 7 })).unwrap();
        assert_eq!(ok, 7);
    }
}
