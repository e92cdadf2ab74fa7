//! JSON-over-HTTP entity store. Implements EntityStore against the portal's REST API.
//!
//! Routes: `GET/POST {base}/{collection}`, `GET/PATCH/DELETE {base}/{collection}/{id}`.
//! List filters are sent as a single `?field=value` query pair.

use crate::domain::{EntityKind, StoreError};
use crate::ports::{EntityStore, ListFilter};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// REST adapter for the remote entity API.
pub struct RestStore {
    client: Client,
    base_url: Url,
    token: Option<String>,
    timeout: Duration,
}

impl RestStore {
    /// Create a new REST store.
    ///
    /// # Arguments
    /// * `base_url` - API root (e.g. "https://portal.example.edu/api")
    /// * `token` - Optional bearer token sent on every request
    /// * `timeout` - Transport timeout; the retry policy applies its own per-call timeout too
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let base_url = base_url.into();
        let base_url = Url::parse(base_url.trim())
            .map_err(|e| StoreError::Validation(format!("store URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(StoreError::Validation(format!(
                "store URL '{}' cannot carry a path",
                base_url
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Unavailable(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url,
            token: token.filter(|t| !t.trim().is_empty()),
            timeout,
        })
    }

    /// Base URL plus percent-encoded path segments.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was rejected in new().
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn collection_url(&self, kind: EntityKind) -> Url {
        self.url(&[kind.collection()])
    }

    /// `.` and `..` would be dropped as path segments and address the collection.
    fn item_url(&self, kind: EntityKind, id: &str) -> Result<Url, StoreError> {
        if matches!(id.trim(), "" | "." | "..") {
            return Err(StoreError::Validation(format!("{} id '{}' is not addressable", kind, id)));
        }
        Ok(self.url(&[kind.collection(), id]))
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, StoreError> {
        let res = self.authorize(req).send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout {
                    after_ms: self.timeout.as_millis() as u64,
                }
            } else {
                StoreError::Unavailable(format!("request failed: {}", e))
            }
        })?;
        Ok(res)
    }

    /// Maps non-success statuses onto the store taxonomy.
    async fn check(res: Response, kind: EntityKind, id: Option<&str>) -> Result<Response, StoreError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let text = res.text().await.unwrap_or_default();
        let body: String = text.chars().take(200).collect();
        Err(status_error(status, kind, id, body))
    }

    async fn json(res: Response) -> Result<Value, StoreError> {
        res.json::<Value>()
            .await
            .map_err(|e| StoreError::Unavailable(format!("invalid JSON response: {}", e)))
    }
}

fn status_error(status: StatusCode, kind: EntityKind, id: Option<&str>, body: String) -> StoreError {
    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound {
            kind,
            id: id.unwrap_or_default().to_string(),
        },
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            StoreError::Validation(format!("{}: {}", status, body))
        }
        _ => {
            warn!(status = %status, body = %body, "entity API returned error");
            StoreError::Unavailable(format!("API error {}: {}", status, body))
        }
    }
}

/// Accepts either a bare array or `{ "data": [...] }`.
fn unwrap_list(body: Value) -> Result<Vec<Value>, StoreError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(StoreError::Unavailable(
                "list response is neither an array nor {data: [...]}".to_string(),
            )),
        },
        _ => Err(StoreError::Unavailable(
            "list response is not an array".to_string(),
        )),
    }
}

#[async_trait::async_trait]
impl EntityStore for RestStore {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Value, StoreError> {
        let res = self.send(self.client.get(self.item_url(kind, id)?)).await?;
        let res = Self::check(res, kind, Some(id)).await?;
        Self::json(res).await
    }

    async fn list(
        &self,
        kind: EntityKind,
        filter: Option<&ListFilter>,
    ) -> Result<Vec<Value>, StoreError> {
        let mut req = self.client.get(self.collection_url(kind));
        if let Some(f) = filter {
            req = req.query(&[(f.field.as_str(), f.value_str())]);
        }
        let res = self.send(req).await?;
        let res = Self::check(res, kind, None).await?;
        let items = unwrap_list(Self::json(res).await?)?;
        debug!(%kind, count = items.len(), "listed documents");
        // The API may ignore unknown filters; apply it locally as well.
        Ok(match filter {
            Some(f) => items.into_iter().filter(|d| f.matches(d)).collect(),
            None => items,
        })
    }

    async fn create(&self, kind: EntityKind, body: Value) -> Result<Value, StoreError> {
        let res = self
            .send(self.client.post(self.collection_url(kind)).json(&body))
            .await?;
        let res = Self::check(res, kind, None).await?;
        Self::json(res).await
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        partial: Value,
    ) -> Result<Value, StoreError> {
        let res = self
            .send(self.client.patch(self.item_url(kind, id)?).json(&partial))
            .await?;
        let res = Self::check(res, kind, Some(id)).await?;
        Self::json(res).await
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), StoreError> {
        let res = self.send(self.client.delete(self.item_url(kind, id)?)).await?;
        Self::check(res, kind, Some(id)).await?;
        Ok(())
    }
}
