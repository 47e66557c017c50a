//! HTTP client for the serverless records API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::auth::CredentialProvider;
use crate::error::RemoteError;

use super::remote::RemoteStore;
use super::types::{Record, RecordType};

/// Timeout for the startup reachability probe.
const PROBE_TIMEOUT_SECS: u64 = 5;

/// List endpoints answer either with a bare array or with `{ "items": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApiListResponse {
  Bare(Vec<Record>),
  Wrapped { items: Vec<Record> },
}

impl ApiListResponse {
  fn into_records(self) -> Vec<Record> {
    match self {
      ApiListResponse::Bare(records) => records,
      ApiListResponse::Wrapped { items } => items,
    }
  }
}

/// Records API client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpRemoteStore {
  client: Client,
  base_url: Url,
  credentials: Arc<dyn CredentialProvider>,
}

impl HttpRemoteStore {
  pub fn new(
    base_url: &str,
    timeout: Duration,
    credentials: Arc<dyn CredentialProvider>,
  ) -> Result<Self> {
    let base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid API url {}: {}", base_url, e))?;
    if base_url.cannot_be_a_base() {
      return Err(eyre!("Invalid API url {}: not a base url", base_url));
    }

    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      credentials,
    })
  }

  /// Whether the API host answers at all. Used once at startup to seed the
  /// connectivity state; any HTTP status counts as reachable.
  pub async fn probe(&self) -> bool {
    let result = self
      .client
      .head(self.base_url.clone())
      .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
      .send()
      .await;

    match result {
      Ok(response) => {
        debug!(status = %response.status(), "API reachable");
        true
      }
      Err(e) => {
        debug!(error = %e, "API unreachable");
        false
      }
    }
  }

  fn endpoint(&self, segments: &[&str]) -> Url {
    let mut url = self.base_url.clone();
    if let Ok(mut path) = url.path_segments_mut() {
      path.pop_if_empty().extend(segments);
    }
    url
  }

  fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, RemoteError> {
    let token = self
      .credentials
      .bearer_token()
      .ok_or(RemoteError::Unauthorized)?;
    Ok(request.bearer_auth(token))
  }

  /// Check if response is successful, returning an error with body if not.
  async fn check_response(response: Response) -> Result<Response, RemoteError> {
    if response.status().is_success() {
      Ok(response)
    } else {
      let status = response.status();
      let body = response.text().await.unwrap_or_default();
      Err(RemoteError::from_status(status, &body))
    }
  }

  fn with_owner(owner: &str, record: &Record) -> Record {
    let mut body = record.clone();
    body.insert("ownerId", Value::String(owner.to_string()));
    body
  }

  fn record_id(record: &Record) -> Result<&str, RemoteError> {
    record
      .id()
      .ok_or_else(|| RemoteError::InvalidResponse("record has no id".to_string()))
  }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
  async fn create(
    &self,
    owner: &str,
    record_type: RecordType,
    record: &Record,
  ) -> Result<Record, RemoteError> {
    let url = self.endpoint(&[record_type.collection()]);
    let request = self
      .authorized(self.client.post(url))?
      .json(&Self::with_owner(owner, record));

    let response = Self::check_response(request.send().await?).await?;
    Ok(response.json().await?)
  }

  async fn list(
    &self,
    owner: &str,
    record_type: RecordType,
    partition: i32,
  ) -> Result<Vec<Record>, RemoteError> {
    let url = self.endpoint(&[record_type.collection()]);
    let request = self
      .authorized(self.client.get(url))?
      .query(&[("ownerId", owner.to_string()), ("year", partition.to_string())]);

    let response = Self::check_response(request.send().await?).await?;
    let list: ApiListResponse = response.json().await?;
    Ok(list.into_records())
  }

  async fn update(
    &self,
    owner: &str,
    record_type: RecordType,
    record: &Record,
  ) -> Result<Record, RemoteError> {
    let id = Self::record_id(record)?;
    let url = self.endpoint(&[record_type.collection(), id]);
    let request = self
      .authorized(self.client.put(url))?
      .json(&Self::with_owner(owner, record));

    let response = Self::check_response(request.send().await?).await?;
    Ok(response.json().await?)
  }

  async fn delete(&self, owner: &str, record_type: RecordType, id: &str) -> Result<(), RemoteError> {
    let url = self.endpoint(&[record_type.collection(), id]);
    let request = self
      .authorized(self.client.delete(url))?
      .query(&[("ownerId", owner)]);

    Self::check_response(request.send().await?).await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::auth::StaticToken;
  use serde_json::json;

  fn store(base: &str, token: Option<&str>) -> HttpRemoteStore {
    HttpRemoteStore::new(
      base,
      Duration::from_secs(1),
      Arc::new(StaticToken::new(token.map(String::from))),
    )
    .unwrap()
  }

  #[test]
  fn test_endpoint_joins_segments() {
    let s = store("https://api.example.org/v1/", Some("t"));
    assert_eq!(
      s.endpoint(&["donations", "a1"]).as_str(),
      "https://api.example.org/v1/donations/a1"
    );

    let s = store("https://api.example.org/v1", Some("t"));
    assert_eq!(
      s.endpoint(&["expenses"]).as_str(),
      "https://api.example.org/v1/expenses"
    );
  }

  #[test]
  fn test_rejects_non_base_url() {
    let result = HttpRemoteStore::new(
      "mailto:someone@example.org",
      Duration::from_secs(1),
      Arc::new(StaticToken::default()),
    );
    assert!(result.is_err());
  }

  #[test]
  fn test_missing_token_is_unauthorized() {
    let s = store("https://api.example.org", None);
    let request = s.client.get(s.endpoint(&["donations"]));
    assert_eq!(s.authorized(request).err(), Some(RemoteError::Unauthorized));
  }

  #[test]
  fn test_list_response_shapes() {
    let bare: ApiListResponse = serde_json::from_value(json!([{"id": "a"}])).unwrap();
    assert_eq!(bare.into_records().len(), 1);

    let wrapped: ApiListResponse =
      serde_json::from_value(json!({"items": [{"id": "a"}, {"id": "b"}]})).unwrap();
    assert_eq!(wrapped.into_records().len(), 2);
  }

  #[test]
  fn test_owner_is_added_to_body() {
    let record = Record::from_value(json!({"id": "a1", "year": 2026})).unwrap();
    let body = HttpRemoteStore::with_owner("owner-1", &record);
    assert_eq!(body.get("ownerId"), Some(&json!("owner-1")));
  }
}
