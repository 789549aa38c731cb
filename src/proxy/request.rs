//! Request/response values that cross the proxy boundary, and the network
//! seam every fetch goes through.

use futures::future::BoxFuture;
use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

use crate::error::FetchError;

/// An outgoing request as seen by the proxy.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
  pub method: Method,
  pub url: Url,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl ProxyRequest {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_json<T: Serialize + ?Sized>(self, body: &T) -> Result<Self, serde_json::Error> {
    let bytes = serde_json::to_vec(body)?;
    let mut request = self.with_header("content-type", "application/json");
    request.body = Some(bytes);
    Ok(request)
  }

  /// Method plus URL. Two requests with the same identity share a cache slot.
  pub fn identity(&self) -> String {
    format!("{} {}", self.method, self.url)
  }

  /// Only read-only requests are ever stored or served from a partition.
  pub fn is_read_only(&self) -> bool {
    self.method == Method::GET || self.method == Method::HEAD
  }
}

/// A response, either fresh from the network or replayed from a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl ProxyResponse {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
    serde_json::from_slice(&self.body)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Anything that can carry a request to its destination.
///
/// The returned future owns everything it needs so it can be spawned.
pub trait Network: Send + Sync {
  fn fetch(&self, request: ProxyRequest) -> BoxFuture<'static, Result<ProxyResponse, FetchError>>;
}

/// Real HTTP transport.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new() -> Result<Self, reqwest::Error> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("duocache/", env!("CARGO_PKG_VERSION")))
      .build()?;

    Ok(Self { client })
  }
}

impl Network for HttpNetwork {
  fn fetch(&self, request: ProxyRequest) -> BoxFuture<'static, Result<ProxyResponse, FetchError>> {
    let client = self.client.clone();

    Box::pin(async move {
      let mut builder = client.request(request.method, request.url);
      for (name, value) in request.headers {
        builder = builder.header(name, value);
      }
      if let Some(body) = request.body {
        builder = builder.body(body);
      }

      let response = builder
        .send()
        .await
        .map_err(|e| FetchError::Network(e.to_string()))?;

      let status = response.status().as_u16();
      let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.to_string(), v.to_string()))
        })
        .collect();

      let body = response
        .bytes()
        .await
        .map_err(|e| FetchError::Network(e.to_string()))?
        .to_vec();

      Ok(ProxyResponse {
        status,
        headers,
        body,
      })
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[test]
  fn test_identity_includes_method_and_url() {
    let get = ProxyRequest::get(url("https://cdn.example.com/a.png"));
    let post = ProxyRequest::new(Method::POST, url("https://cdn.example.com/a.png"));

    assert_eq!(get.identity(), "GET https://cdn.example.com/a.png");
    assert_ne!(get.identity(), post.identity());
  }

  #[test]
  fn test_read_only_methods() {
    assert!(ProxyRequest::get(url("https://x.test/")).is_read_only());
    assert!(ProxyRequest::new(Method::HEAD, url("https://x.test/")).is_read_only());
    assert!(!ProxyRequest::new(Method::POST, url("https://x.test/")).is_read_only());
    assert!(!ProxyRequest::new(Method::PATCH, url("https://x.test/")).is_read_only());
  }

  #[test]
  fn test_with_json_sets_body_and_content_type() {
    let request = ProxyRequest::new(Method::POST, url("https://x.test/records"))
      .with_json(&serde_json::json!({"title": "a"}))
      .unwrap();

    assert_eq!(request.body.as_deref(), Some(br#"{"title":"a"}"#.as_slice()));
    assert!(request
      .headers
      .iter()
      .any(|(k, v)| k == "content-type" && v == "application/json"));
  }

  #[test]
  fn test_response_helpers() {
    let mut response = ProxyResponse::new(201, r#"{"id":"1"}"#);
    response.headers.push(("Content-Type".into(), "application/json".into()));

    assert!(response.is_success());
    assert_eq!(response.header("content-type"), Some("application/json"));
    assert_eq!(response.json::<serde_json::Value>().unwrap()["id"], "1");
    assert!(!ProxyResponse::new(404, "").is_success());
    assert!(!ProxyResponse::new(304, "").is_success());
  }
}
