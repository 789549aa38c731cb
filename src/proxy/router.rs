//! Static request classification.
//!
//! Rules are evaluated top to bottom and the first match wins. A request no
//! rule matches lands in the router's fallback partition, so classification
//! always produces an answer.

use url::{Origin, Url};

/// Resource class a request belongs to. Each class owns one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionClass {
  /// Immutable, uniquely named binary assets
  Media,
  /// The application's data API
  Api,
  /// Everything else
  Static,
}

impl PartitionClass {
  pub const ALL: [PartitionClass; 3] = [Self::Media, Self::Api, Self::Static];

  pub fn strategy(self) -> Strategy {
    match self {
      Self::Media => Strategy::CacheFirst,
      Self::Api => Strategy::NetworkFirst,
      Self::Static => Strategy::StaleWhileRevalidate,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Media => "media",
      Self::Api => "api",
      Self::Static => "static",
    }
  }
}

/// How a partition trades freshness against latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  CacheFirst,
  NetworkFirst,
  StaleWhileRevalidate,
}

/// Predicate over a request URL.
#[derive(Debug, Clone)]
pub enum Matcher {
  /// Host equal to the pattern, or any subdomain of it
  Host(String),
  /// Exact scheme/host/port match
  Origin(Origin),
}

impl Matcher {
  pub fn host(host: &str) -> Self {
    Self::Host(host.trim().trim_start_matches('.').to_lowercase())
  }

  pub fn origin_of(url: &Url) -> Self {
    Self::Origin(url.origin())
  }

  pub fn matches(&self, url: &Url) -> bool {
    match self {
      Self::Host(pattern) => match url.host_str() {
        Some(host) => {
          let host = host.to_lowercase();
          host == *pattern
            || host
              .strip_suffix(pattern.as_str())
              .is_some_and(|rest| rest.ends_with('.'))
        }
        None => false,
      },
      Self::Origin(origin) => url.origin() == *origin,
    }
  }
}

#[derive(Debug, Clone)]
struct Rule {
  matcher: Matcher,
  class: PartitionClass,
}

/// Ordered rule list with an unconditional fallback.
#[derive(Debug, Clone)]
pub struct Router {
  rules: Vec<Rule>,
  fallback: PartitionClass,
}

impl Router {
  pub fn new(fallback: PartitionClass) -> Self {
    Self {
      rules: Vec::new(),
      fallback,
    }
  }

  /// Append a rule after all existing ones.
  pub fn rule(mut self, matcher: Matcher, class: PartitionClass) -> Self {
    self.rules.push(Rule { matcher, class });
    self
  }

  /// Standard layout: media hosts first, then the API origin, then static.
  pub fn standard(media_hosts: &[String], api_base: &Url) -> Self {
    let router = media_hosts.iter().fold(Router::new(PartitionClass::Static), |router, host| {
      router.rule(Matcher::host(host), PartitionClass::Media)
    });

    router.rule(Matcher::origin_of(api_base), PartitionClass::Api)
  }

  pub fn classify(&self, url: &Url) -> PartitionClass {
    self
      .rules
      .iter()
      .find(|rule| rule.matcher.matches(url))
      .map(|rule| rule.class)
      .unwrap_or(self.fallback)
  }
}
