//! Response-shaped values the coordinator knows how to unwrap.
//!
//! The actual network call is caller-supplied; this module only defines the
//! structured response shape that [`attempt_json`](crate::Aborter::attempt_json)
//! can decode a typed body out of.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Response from an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as a string
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        HttpResponse { status, body: body.into() }
    }

    /// True for client and server error statuses (4xx/5xx).
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    /// Decode the body as JSON into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_typed_body() {
        #[derive(Debug, PartialEq, Deserialize)]
        struct Payload {
            data: Vec<u32>,
        }

        let response = HttpResponse::new(200, r#"{"data":[1,2,3]}"#);
        assert!(!response.is_error());
        let payload: Payload = response.json().unwrap();
        assert_eq!(payload, Payload { data: vec![1, 2, 3] });
    }

    #[test]
    fn malformed_body_is_a_decode_error() {
        let response = HttpResponse::new(200, "not json");
        let result: Result<serde_json::Value> = response.json();
        assert!(matches!(result, Err(crate::error::AborterError::Decode(_))));
    }
}
