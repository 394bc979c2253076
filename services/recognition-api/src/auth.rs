//! Inbound API key verification.

use actix_web::HttpRequest;
use subtle::ConstantTimeEq;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Compares the X-API-Key header against the configured secret in constant
/// time. A missing header compares as an empty key and fails.
pub fn verify_api_key(req: &HttpRequest, secret: &str) -> bool {
    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    provided.as_bytes().ct_eq(secret.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn accepts_matching_key() {
        let req = TestRequest::default()
            .insert_header((API_KEY_HEADER, "s3cret"))
            .to_http_request();
        assert!(verify_api_key(&req, "s3cret"));
    }

    #[test]
    fn rejects_wrong_key() {
        let req = TestRequest::default()
            .insert_header((API_KEY_HEADER, "nope"))
            .to_http_request();
        assert!(!verify_api_key(&req, "s3cret"));
    }

    #[test]
    fn rejects_missing_header() {
        let req = TestRequest::default().to_http_request();
        assert!(!verify_api_key(&req, "s3cret"));
    }
}
