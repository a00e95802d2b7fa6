//! Cache key derivation.
//!
//! A key is `prefix + path`, followed by `?` and the canonical query when any
//! parameters survive filtering. Canonical means: parameters that never change
//! the response ([`IGNORED_QUERY_PARAMS`]) are dropped, the rest are sorted by
//! name and re-encoded as `application/x-www-form-urlencoded`. Repeated names
//! keep their relative order, since `?tag=a&tag=b` and `?tag=b&tag=a` may
//! legitimately produce different responses.

use std::fmt;

use url::form_urlencoded;

use crate::Request;

/// Query parameters that affect how a request is handled but not what it returns.
pub const IGNORED_QUERY_PARAMS: &[&str] = &["apiKey", super::NO_CACHE_QUERY_PARAM];

/// A canonical, backend-safe cache key.
///
/// # Examples
///
/// ```
/// use stash::cache::CacheKey;
///
/// let a = CacheKey::new("v1:", "/items", Some("page=2&sort=asc&apiKey=secret"));
/// let b = CacheKey::new("v1:", "/items", Some("sort=asc&page=2"));
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "v1:/items?page=2&sort=asc");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for `path` and an optional raw query string.
    pub fn new(prefix: &str, path: &str, query: Option<&str>) -> Self {
        let mut pairs: Vec<(String, String)> =
            form_urlencoded::parse(query.unwrap_or_default().as_bytes())
                .filter(|(name, _)| !IGNORED_QUERY_PARAMS.contains(&name.as_ref()))
                .map(|(name, value)| (name.into_owned(), value.into_owned()))
                .collect();
        // stable: values of a repeated name keep their order
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        let canonical = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&pairs)
            .finish();

        let mut key = String::with_capacity(prefix.len() + path.len() + canonical.len() + 1);
        key.push_str(prefix);
        key.push_str(path);
        if !canonical.is_empty() {
            key.push('?');
            key.push_str(&canonical);
        }
        Self(key)
    }

    /// Derives the key for an incoming request.
    pub fn from_request(prefix: &str, request: &Request) -> Self {
        Self::new(prefix, request.path(), request.query_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Joins several key components into one key, independent of argument order.
///
/// Useful for application-level keys built from multiple identifiers.
///
/// ```
/// use stash::cache::key::join_key;
///
/// assert_eq!(join_key(["user:7", "locale:en"]), join_key(["locale:en", "user:7"]));
/// assert_eq!(join_key(["b", "a"]), "a;b");
/// ```
pub fn join_key<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parts: Vec<String> = parts.into_iter().map(|p| p.as_ref().to_owned()).collect();
    parts.sort();
    parts.join(";")
}
