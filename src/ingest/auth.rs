use super::api::ApiError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Shared-secret credential.
///
/// Only the SHA-256 digest is kept. Candidates are hashed and compared in
/// constant time, so neither matching prefixes nor the length of a wrong
/// key change how long a check takes.
#[derive(Clone)]
pub struct ApiKey {
    digest: [u8; 32],
}

impl ApiKey {
    pub fn new(key: &str) -> Self {
        Self {
            digest: Sha256::digest(key.as_bytes()).into(),
        }
    }

    pub fn matches(&self, candidate: &[u8]) -> bool {
        let candidate: [u8; 32] = Sha256::digest(candidate).into();
        self.digest[..].ct_eq(&candidate[..]).into()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(..)")
    }
}

/// Reject requests without the configured key.
///
/// Failures answer 404 rather than 401 so unauthenticated callers cannot
/// tell the endpoint exists. A missing header is checked like an empty key.
pub async fn require_api_key(
    State(key): State<ApiKey>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let candidate = req
        .headers()
        .get(API_KEY_HEADER)
        .map(|v| v.as_bytes())
        .unwrap_or_default();

    if !key.matches(candidate) {
        tracing::debug!(path = %req.uri().path(), "Rejected request with bad API key");
        return Err(ApiError::NotFound);
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_exact_key_only() {
        let key = ApiKey::new("s3cret");
        assert!(key.matches(b"s3cret"));
        assert!(!key.matches(b"s3cre"));
        assert!(!key.matches(b"s3cret "));
        assert!(!key.matches(b"S3CRET"));
        assert!(!key.matches(b""));
    }

    #[test]
    fn test_debug_hides_key() {
        let key = ApiKey::new("s3cret");
        assert_eq!(format!("{:?}", key), "ApiKey(..)");
    }
}
