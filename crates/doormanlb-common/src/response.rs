//! The buffered upstream response value object.
//!
//! Responses are fully buffered: status code, the complete header
//! multimap and the body bytes. The serde encoding doubles as the
//! persisted cache record (`statusCode`, `header`, `body`), and bodies
//! round-trip byte-for-byte.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamResponse {
    pub status_code: u16,
    pub header: HashMap<String, Vec<String>>,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn new(status_code: u16, header: HashMap<String, Vec<String>>, body: Vec<u8>) -> Self {
        Self {
            status_code,
            header,
            body,
        }
    }

    /// Server errors are never written to the cache.
    pub fn should_cache(&self) -> bool {
        self.status_code < 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UpstreamResponse {
        let mut header = HashMap::new();
        header.insert(
            "content-type".to_string(),
            vec!["text/plain".to_string()],
        );
        header.insert(
            "set-cookie".to_string(),
            vec!["a=1".to_string(), "b=2".to_string()],
        );
        UpstreamResponse::new(202, header, vec![0, 159, 146, 150, 255])
    }

    #[test]
    fn test_record_round_trips_byte_for_byte() {
        let response = sample();
        let encoded = serde_json::to_vec(&response).unwrap();
        let decoded: UpstreamResponse = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(decoded.body, vec![0, 159, 146, 150, 255]);
    }

    #[test]
    fn test_record_field_names() {
        let encoded = serde_json::to_value(sample()).unwrap();
        assert!(encoded.get("statusCode").is_some());
        assert!(encoded.get("header").is_some());
        assert!(encoded.get("body").is_some());
    }

    #[test]
    fn test_should_cache_boundary() {
        let mut response = sample();
        response.status_code = 499;
        assert!(response.should_cache());
        response.status_code = 500;
        assert!(!response.should_cache());
        response.status_code = 503;
        assert!(!response.should_cache());
    }
}
