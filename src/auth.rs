//! Bearer token verification against the identity provider

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

pub const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";

/// Caller identity established from a verified token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Extract the token from `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    id_token: &'a str,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<LookupUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupUser {
    local_id: String,
    email: Option<String>,
    display_name: Option<String>,
}

/// Verifies ID tokens with the Identity Toolkit `accounts:lookup` endpoint
pub struct IdentityToolkitVerifier {
    client: Client,
    api_key: String,
    base_url: String,
}

impl IdentityToolkitVerifier {
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| IDENTITY_TOOLKIT_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

#[async_trait]
impl TokenVerifier for IdentityToolkitVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let response = self
            .client
            .post(format!("{}/accounts:lookup", self.base_url))
            .query(&[("key", self.api_key.as_str())])
            .json(&LookupRequest { id_token: token })
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            return Err(AuthError::InvalidToken);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Identity provider rejected lookup");
            return Err(AuthError::Unavailable(format!("{}: {}", status, body)));
        }

        let lookup: LookupResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Unavailable(format!("malformed lookup response: {}", e)))?;

        let user = lookup
            .users
            .into_iter()
            .next()
            .ok_or(AuthError::InvalidToken)?;
        Ok(Identity {
            uid: user.local_id,
            email: user.email,
            name: user.display_name,
        })
    }
}

#[cfg(test)]
pub(crate) use fake::FakeTokenVerifier;


#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Err(AuthError::MissingToken)));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def");

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("token abc"));
        assert!(bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(bearer_token(&headers).is_err());
    }

    #[test]
    fn test_lookup_response_parses() {
        let parsed: LookupResponse = serde_json::from_str(
            r#"{"kind":"identitytoolkit#GetAccountInfoResponse",
                "users":[{"localId":"uid-1","email":"a@b.c","displayName":"Ada"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.users[0].local_id, "uid-1");
        assert_eq!(parsed.users[0].display_name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_fake_verifier() {
        let identity = FakeTokenVerifier.verify("token-uid-7").await.unwrap();
        assert_eq!(identity.uid, "uid-7");
        assert!(FakeTokenVerifier.verify("garbage").await.is_err());
    }
}
