//! Client store keys for records.

use std::fmt;

/// Reserved id of the full-list projection.
pub const LIST_KEY: &str = "__list__";

/// Prefix for entity ids that would otherwise fall in the reserved `__`
/// namespace.
const ESCAPE: &str = "__id:";

/// Key of one entry in the client store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
  /// The whole collection, stored as one entry
  List,
  /// A single record. Holds the encoded key: the id verbatim, or the id
  /// behind [`ESCAPE`] if it starts with `__`.
  Entity(String),
}

impl CacheKey {
  pub fn entity(id: impl Into<String>) -> Self {
    let id = id.into();
    if id.starts_with("__") {
      Self::Entity(format!("{}{}", ESCAPE, id))
    } else {
      Self::Entity(id)
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      Self::List => LIST_KEY,
      Self::Entity(id) => id,
    }
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_keys() {
    assert_eq!(CacheKey::List.as_str(), "__list__");
    assert_eq!(CacheKey::entity("abc").as_str(), "abc");
    assert_eq!(CacheKey::entity("abc").to_string(), "abc");
    assert_eq!(CacheKey::entity("_abc").as_str(), "_abc");
  }

  #[test]
  fn test_reserved_looking_ids_never_hit_the_list_key() {
    let list_lookalike = CacheKey::entity("__list__");
    assert_ne!(list_lookalike.as_str(), LIST_KEY);
    assert_eq!(list_lookalike.as_str(), "__id:__list__");

    // Escaping is injective
    assert_ne!(
      CacheKey::entity("__id:__list__").as_str(),
      list_lookalike.as_str()
    );
  }
}
