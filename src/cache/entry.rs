//! The stored unit of the response cache and its wire encoding.

use std::{
    io,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::CACHED_RESPONSE_HEADER;
use crate::http::{Headers, ResponseWriter, StatusCode};

/// Errors decoding or encoding a [`CachedResponse`].
#[derive(Debug, Error)]
pub enum EntryError {
    #[error("malformed cache entry: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache entry carries unsupported status code {0}")]
    UnknownStatus(u16),
}

/// How cached headers combine with headers already present on the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMerge {
    /// Only add headers the sink does not already have.
    KeepExisting,
    /// Cached values replace any sink values of the same name.
    Replace,
}

/// A memoized response.
///
/// `expiration` is a Unix timestamp in seconds. Past it the entry is no
/// longer served as a hit, but it remains a stale-fallback candidate for as
/// long as the backend keeps it.
///
/// Encoded as JSON with the body in standard base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub header: Headers,
    #[serde(with = "base64_body")]
    pub body: Vec<u8>,
    pub status_code: u16,
    pub expiration: i64,
}

impl CachedResponse {
    /// Creates an entry that stays fresh for `ttl` from now.
    pub fn new(header: Headers, body: Vec<u8>, status: StatusCode, ttl: Duration) -> Self {
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        Self {
            header,
            body,
            status_code: status.as_u16(),
            expiration: unix_now().saturating_add(ttl),
        }
    }

    /// Decodes an entry previously produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// [`EntryError::Json`] for anything that is not a well-formed entry,
    /// including invalid base64 in the body, and
    /// [`EntryError::UnknownStatus`] for a status this crate cannot emit.
    pub fn from_bytes(data: &[u8]) -> Result<Self, EntryError> {
        let entry: Self = serde_json::from_slice(data)?;
        entry.status()?;
        Ok(entry)
    }

    /// Encodes the entry for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EntryError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn status(&self) -> Result<StatusCode, EntryError> {
        StatusCode::from_u16(self.status_code).ok_or(EntryError::UnknownStatus(self.status_code))
    }

    /// Returns `true` while the entry may be served as a cache hit.
    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(unix_now())
    }

    pub fn is_fresh_at(&self, now: i64) -> bool {
        self.expiration > now
    }

    /// Writes the entry to `writer`, tagged with [`CACHED_RESPONSE_HEADER`].
    ///
    /// # Errors
    ///
    /// Propagates body write failures from the sink.
    pub fn write_to<W>(&self, writer: &mut W, merge: HeaderMerge) -> io::Result<()>
    where
        W: ResponseWriter + ?Sized,
    {
        let headers = writer.headers_mut();
        for name in self.header.names() {
            match merge {
                HeaderMerge::KeepExisting if headers.contains(name) => continue,
                HeaderMerge::KeepExisting => {}
                HeaderMerge::Replace => {
                    headers.remove(name);
                }
            }
            for value in self.header.get_all(name) {
                headers.insert(name, value);
            }
        }
        headers.set(CACHED_RESPONSE_HEADER, "true");

        writer.write_status(self.status().unwrap_or(StatusCode::Ok));
        if !self.body.is_empty() {
            writer.write(&self.body)?;
        }
        Ok(())
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX)
        })
}

mod base64_body {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(D::Error::custom)
    }
}
