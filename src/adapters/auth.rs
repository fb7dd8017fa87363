//! Exchanges an access grant for S3 gateway credentials.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::error::StorageError;

pub const DEFAULT_AUTH_SERVICE: &str = "https://auth.storjshare.io";

#[derive(Serialize)]
struct RegisterRequest<'a> {
    access_grant: &'a str,
    public: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct GatewayCredentials {
    pub access_key_id: String,
    pub secret_key: String,
    pub endpoint: String,
}

pub async fn register_access(
    client: &reqwest::Client,
    auth_service: &str,
    grant: &str,
) -> Result<GatewayCredentials, StorageError> {
    let url = format!("{}/v1/access", auth_service.trim_end_matches('/'));
    debug!(url = %url, "registering access grant");

    let resp = client
        .post(&url)
        .json(&RegisterRequest {
            access_grant: grant,
            public: false,
        })
        .send()
        .await
        .map_err(|err| StorageError::Unavailable(format!("failed to reach auth service: {}", err)))?;

    let status = resp.status().as_u16();
    if !resp.status().is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(classify_status(status, format!("auth service rejected access grant: {}", body)));
    }

    resp.json::<GatewayCredentials>()
        .await
        .map_err(|err| StorageError::Other(format!("failed to decode auth service response: {}", err)))
}

/// Maps an HTTP status onto the collaborator error kinds.
pub fn classify_status(status: u16, message: String) -> StorageError {
    match status {
        401 | 403 => StorageError::Unauthorized(message),
        404 => StorageError::NotFound(message),
        408 | 429 | 500..=599 => StorageError::Unavailable(message),
        _ => StorageError::Other(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(403, "x".into()), StorageError::Unauthorized(_)));
        assert!(matches!(classify_status(404, "x".into()), StorageError::NotFound(_)));
        assert!(matches!(classify_status(503, "x".into()), StorageError::Unavailable(_)));
        assert!(matches!(classify_status(429, "x".into()), StorageError::Unavailable(_)));
        assert!(matches!(classify_status(400, "x".into()), StorageError::Other(_)));
    }

    #[test]
    fn test_decode_credentials() {
        let body = r#"{"access_key_id":"jw","secret_key":"jx","endpoint":"https://gateway.storjshare.io"}"#;
        let creds: GatewayCredentials = serde_json::from_str(body).unwrap();

        assert_eq!(creds.access_key_id, "jw");
        assert_eq!(creds.endpoint, "https://gateway.storjshare.io");
    }
}
