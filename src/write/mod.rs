//! JSON response helpers.
//!
//! Every helper sets `Content-Type: application/json`. Errors share one shape:
//!
//! ```json
//! {"status":500,"statusText":"Internal Server Error","error":"..."}
//! ```

use serde::Serialize;
use tracing::error;

use crate::{Response, StatusCode};

const CONTENT_TYPE_JSON: &str = "application/json";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    status: u16,
    status_text: &'a str,
    error: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OkBody {
    status: u16,
    status_text: &'static str,
}

/// Builds a JSON error response with the given status.
///
/// ```
/// use stash::{StatusCode, write};
///
/// let response = write::error(StatusCode::NotFound, "no such user");
/// assert_eq!(response.status(), StatusCode::NotFound);
/// assert_eq!(
///     response.payload(),
///     br#"{"status":404,"statusText":"Not Found","error":"no such user"}"#
/// );
/// ```
pub fn error(status: StatusCode, message: &str) -> Response {
    let body = ErrorBody {
        status: status.as_u16(),
        status_text: status.canonical_reason(),
        error: message,
    };

    match serde_json::to_vec(&body) {
        Ok(bytes) => with_json(status, bytes),
        Err(_) => Response::new(status).body("Unable to create error response"),
    }
}

/// Builds the standard `200 OK` JSON acknowledgement.
pub fn ok() -> Response {
    json(
        StatusCode::Ok,
        &OkBody {
            status: StatusCode::Ok.as_u16(),
            status_text: StatusCode::Ok.canonical_reason(),
        },
    )
}

/// Serializes `value` as the body of a JSON response.
///
/// Falls back to a `500` [`error`] response if `value` cannot be encoded.
pub fn json<T>(status: StatusCode, value: &T) -> Response
where
    T: Serialize + ?Sized,
{
    match serde_json::to_vec(value) {
        Ok(bytes) => with_json(status, bytes),
        Err(err) => {
            error!(error = %err, "failed to encode JSON response");
            error(StatusCode::InternalServerError, &err.to_string())
        }
    }
}

fn with_json(status: StatusCode, body: Vec<u8>) -> Response {
    Response::new(status)
        .header("Content-Type", CONTENT_TYPE_JSON)
        .body_bytes(body)
}
