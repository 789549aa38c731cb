use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A record from the authoritative API. Apart from `id`, its fields are
/// opaque to the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  pub id: String,
  #[serde(flatten)]
  pub fields: Map<String, Value>,
}

impl Record {
  pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
    Self {
      id: id.into(),
      fields,
    }
  }
}

/// Filters for a scoped list query, sent as query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListScope {
  pub filters: Vec<(String, String)>,
}

impl ListScope {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.filters.push((key.into(), value.into()));
    self
  }

  pub fn is_empty(&self) -> bool {
    self.filters.is_empty()
  }
}

/// Body of an upload-url request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
  pub filename: String,
  pub content_type: String,
}

/// Where to upload a media file and where it will be served from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
  pub upload_url: String,
  pub public_url: String,
}

/// Whether an update result reflects server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
  /// The server accepted the update and returned this record
  Confirmed,
  /// The update failed; the record was assembled locally from the request
  Unsynced,
}

/// Result of an update. Never an error: failures come back `Unsynced`.
#[derive(Debug, Clone, PartialEq)]
pub struct Updated {
  pub record: Record,
  pub sync: SyncState,
}

impl Updated {
  pub fn is_synced(&self) -> bool {
    self.sync == SyncState::Confirmed
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_record_keeps_unknown_fields() {
    let record: Record = serde_json::from_value(json!({
      "id": "r1",
      "prompt": "a cat",
      "imageUrl": "https://media.test/r1.png"
    }))
    .unwrap();

    assert_eq!(record.id, "r1");
    assert_eq!(record.fields["prompt"], "a cat");
    assert!(!record.fields.contains_key("id"));
    assert_eq!(
      serde_json::to_value(&record).unwrap(),
      json!({"id": "r1", "prompt": "a cat", "imageUrl": "https://media.test/r1.png"})
    );
  }

  #[test]
  fn test_upload_types_use_camel_case() {
    let request = UploadRequest {
      filename: "a.png".into(),
      content_type: "image/png".into(),
    };
    assert_eq!(
      serde_json::to_value(&request).unwrap(),
      json!({"filename": "a.png", "contentType": "image/png"})
    );

    let ticket: UploadTicket =
      serde_json::from_value(json!({"uploadUrl": "https://u", "publicUrl": "https://p"})).unwrap();
    assert_eq!(ticket.public_url, "https://p");
  }
}
