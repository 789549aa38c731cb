use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use url::form_urlencoded::byte_serialize;
use url::Url;

use super::types::{ListScope, Record, UploadRequest, UploadTicket};
use crate::error::ApiError;
use crate::proxy::{Network, ProxyRequest, ProxyResponse};

/// REST client for the records API.
///
/// Requests go out through whatever [`Network`] it is given; in the app
/// that is a proxy client, so every call is intercepted.
#[derive(Clone)]
pub struct RestApi {
  network: Arc<dyn Network>,
  /// Always ends in '/'
  base: Url,
  collection: String,
  token: Option<String>,
}

impl RestApi {
  pub fn new(network: Arc<dyn Network>, base_url: &str, collection: &str) -> Result<Self, ApiError> {
    let mut base = Url::parse(base_url)?;
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    Ok(Self {
      network,
      base,
      collection: collection.trim_matches('/').to_string(),
      token: None,
    })
  }

  pub fn with_token(mut self, token: Option<String>) -> Self {
    self.token = token;
    self
  }

  pub fn base_url(&self) -> &Url {
    &self.base
  }

  /// Get every record
  pub async fn list(&self) -> Result<Vec<Record>, ApiError> {
    let url = self.collection_url()?;
    self.send(self.request(Method::GET, url)).await
  }

  /// Get records matching `scope`
  pub async fn list_scoped(&self, scope: &ListScope) -> Result<Vec<Record>, ApiError> {
    let mut url = self.collection_url()?;
    {
      let mut query = url.query_pairs_mut();
      for (key, value) in &scope.filters {
        query.append_pair(key, value);
      }
    }
    self.send(self.request(Method::GET, url)).await
  }

  /// Get a single record by id
  pub async fn get(&self, id: &str) -> Result<Record, ApiError> {
    let url = self.record_url(id)?;
    self.send(self.request(Method::GET, url)).await
  }

  pub async fn create(&self, fields: &Map<String, Value>) -> Result<Record, ApiError> {
    let url = self.collection_url()?;
    let request = self.request(Method::POST, url).with_json(fields)?;
    self.send(request).await
  }

  pub async fn update(&self, id: &str, updates: &Map<String, Value>) -> Result<Record, ApiError> {
    let url = self.record_url(id)?;
    let request = self.request(Method::PATCH, url).with_json(updates)?;
    self.send(request).await
  }

  pub async fn delete(&self, id: &str) -> Result<(), ApiError> {
    let url = self.record_url(id)?;
    self.execute(self.request(Method::DELETE, url)).await?;
    Ok(())
  }

  /// Ask for a one-off upload location for a media file.
  pub async fn request_upload_url(&self, upload: &UploadRequest) -> Result<UploadTicket, ApiError> {
    let url = self.base.join("upload-url")?;
    let request = self.request(Method::POST, url).with_json(upload)?;
    self.send(request).await
  }

  fn collection_url(&self) -> Result<Url, ApiError> {
    Ok(self.base.join(&self.collection)?)
  }

  fn record_url(&self, id: &str) -> Result<Url, ApiError> {
    let id: String = byte_serialize(id.as_bytes()).collect();
    Ok(self.base.join(&format!("{}/{}", self.collection, id))?)
  }

  fn request(&self, method: Method, url: Url) -> ProxyRequest {
    let request = ProxyRequest::new(method, url).with_header("accept", "application/json");
    match &self.token {
      Some(token) => request.with_header("authorization", format!("Bearer {}", token)),
      None => request,
    }
  }

  /// Send and require a 2xx answer.
  async fn execute(&self, request: ProxyRequest) -> Result<ProxyResponse, ApiError> {
    let response = self.network.fetch(request).await?;
    if !response.is_success() {
      return Err(ApiError::Status {
        status: response.status,
        body: response.text(),
      });
    }
    Ok(response)
  }

  async fn send<T: DeserializeOwned>(&self, request: ProxyRequest) -> Result<T, ApiError> {
    let response = self.execute(request).await?;
    Ok(response.json()?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::ScriptedNetwork;
  use serde_json::json;

  fn api(network: &ScriptedNetwork) -> RestApi {
    RestApi::new(Arc::new(network.clone()), "https://api.test/v1", "records").unwrap()
  }

  #[test]
  fn test_urls() {
    let api = api(&ScriptedNetwork::new());
    assert_eq!(api.base_url().as_str(), "https://api.test/v1/");
    assert_eq!(
      api.collection_url().unwrap().as_str(),
      "https://api.test/v1/records"
    );
    assert_eq!(
      api.record_url("a b/c").unwrap().as_str(),
      "https://api.test/v1/records/a+b%2Fc"
    );
  }

  #[tokio::test]
  async fn test_list_and_get() {
    let network = ScriptedNetwork::new();
    network.respond_json(
      "GET",
      "https://api.test/v1/records",
      200,
      json!([{"id": "1", "title": "a"}]),
    );
    network.respond_json(
      "GET",
      "https://api.test/v1/records/1",
      200,
      json!({"id": "1", "title": "a"}),
    );
    let api = api(&network);

    let all = api.list().await.unwrap();
    let one = api.get("1").await.unwrap();

    assert_eq!(all.len(), 1);
    assert_eq!(one, all[0]);
  }

  #[tokio::test]
  async fn test_scoped_list_sends_filters() {
    let network = ScriptedNetwork::new();
    network.respond_json(
      "GET",
      "https://api.test/v1/records?owner=me&kind=image",
      200,
      json!([]),
    );
    let api = api(&network);

    let scoped = api
      .list_scoped(&ListScope::new().filter("owner", "me").filter("kind", "image"))
      .await
      .unwrap();

    assert!(scoped.is_empty());
  }

  #[tokio::test]
  async fn test_non_success_is_status_error() {
    let network = ScriptedNetwork::new();
    network.respond("PATCH", "https://api.test/v1/records/1", 405, "method not allowed");
    let api = api(&network);

    let err = api.update("1", &Map::new()).await.unwrap_err();

    assert_eq!(err.status(), Some(405));
  }

  #[tokio::test]
  async fn test_token_and_body_are_sent() {
    let network = ScriptedNetwork::new();
    network.respond_json(
      "POST",
      "https://api.test/v1/records",
      201,
      json!({"id": "9", "title": "new"}),
    );
    let api = api(&network).with_token(Some("secret".into()));

    let mut fields = Map::new();
    fields.insert("title".into(), json!("new"));
    let created = api.create(&fields).await.unwrap();

    assert_eq!(created.id, "9");
    let sent = &network.calls()[0];
    assert!(sent
      .headers
      .iter()
      .any(|(k, v)| k == "authorization" && v == "Bearer secret"));
    assert_eq!(sent.body.as_deref(), Some(br#"{"title":"new"}"#.as_slice()));
  }

  #[tokio::test]
  async fn test_upload_url() {
    let network = ScriptedNetwork::new();
    network.respond_json(
      "POST",
      "https://api.test/v1/upload-url",
      200,
      json!({"uploadUrl": "https://media.test/put/1", "publicUrl": "https://media.test/1.png"}),
    );
    let api = api(&network);

    let ticket = api
      .request_upload_url(&UploadRequest {
        filename: "1.png".into(),
        content_type: "image/png".into(),
      })
      .await
      .unwrap();

    assert_eq!(ticket.public_url, "https://media.test/1.png");
  }
}
