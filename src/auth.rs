//! Admin bearer-token check.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::http::ApiError;

type HmacSha256 = Hmac<Sha256>;

/// Compares presented tokens against the configured one in constant time.
#[derive(Clone)]
pub struct AdminAuth {
    key: Arc<[u8]>,
    expected: Arc<[u8]>,
}

impl AdminAuth {
    pub fn new(token: &str) -> Self {
        // Both sides are MACed under a per-process key before comparing.
        let key: Vec<u8> = ulid::Ulid::new().to_bytes().to_vec();
        let expected = Self::digest(&key, token.as_bytes());
        Self {
            key: key.into(),
            expected: expected.into(),
        }
    }

    fn digest(key: &[u8], token: &[u8]) -> Vec<u8> {
        match HmacSha256::new_from_slice(key) {
            Ok(mut mac) => {
                mac.update(token);
                mac.finalize().into_bytes().to_vec()
            }
            Err(_) => Vec::new(),
        }
    }

    pub fn check(&self, presented: &str) -> bool {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            return false;
        };
        mac.update(presented.as_bytes());
        !self.expected.is_empty() && mac.verify_slice(&self.expected).is_ok()
    }
}

fn bearer(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// `axum::middleware::from_fn_with_state` guard for `/admin`.
pub async fn require_admin(State(auth): State<AdminAuth>, request: Request, next: Next) -> Result<Response, ApiError> {
    match bearer(&request) {
        Some(token) if auth.check(token) => Ok(next.run(request).await),
        _ => {
            tracing::warn!(path = %request.uri().path(), "admin request rejected");
            Err(ApiError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_only_the_configured_token() {
        let auth = AdminAuth::new("s3cret");
        assert!(auth.check("s3cret"));
        assert!(!auth.check("s3cre"));
        assert!(!auth.check("s3cret "));
        assert!(!auth.check(""));
    }
}
