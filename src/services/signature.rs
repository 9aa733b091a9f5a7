use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-content-signature";

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("missing {SIGNATURE_HEADER} header")]
    MissingHeader,
    #[error("payload has no metadata.key_url")]
    MissingKeyUrl,
    #[error("unreadable payload: {0}")]
    Payload(String),
    #[error("fetching signing key: {0}")]
    KeyFetch(String),
    #[error("signature mismatch")]
    Mismatch,
}

/// Checks `header` against base64(HMAC-SHA256(sha256(signing_key), body)).
pub fn verify_signature(body: &[u8], signing_key: &str, header: &str) -> Result<(), SignatureError> {
    let provided = STANDARD
        .decode(header.trim())
        .map_err(|_| SignatureError::Mismatch)?;
    let key = Sha256::digest(signing_key.as_bytes());
    let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| SignatureError::Mismatch)?;
    mac.update(body);
    mac.verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
pub fn sign(body: &[u8], signing_key: &str) -> Result<String, SignatureError> {
    let key = Sha256::digest(signing_key.as_bytes());
    let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| SignatureError::Mismatch)?;
    mac.update(body);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

fn key_url(body: &[u8]) -> Result<String, SignatureError> {
    let payload: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| SignatureError::Payload(e.to_string()))?;
    let metadata = payload
        .get("metadata")
        .or_else(|| payload.get("Metadata"))
        .ok_or(SignatureError::MissingKeyUrl)?;
    metadata
        .get("key_url")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(SignatureError::MissingKeyUrl)
}

/// Where the shared signing key for a callback comes from.
#[async_trait::async_trait]
pub trait SigningKeySource: Send + Sync {
    async fn signing_key(&self, key_url: &str) -> Result<String, SignatureError>;
}

pub struct HttpKeySource {
    client: reqwest::Client,
}

impl HttpKeySource {
    pub fn new() -> Result<Self, SignatureError> {
        let client = reqwest::Client::builder()
            .timeout(super::http::REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SignatureError::KeyFetch(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl SigningKeySource for HttpKeySource {
    async fn signing_key(&self, key_url: &str) -> Result<String, SignatureError> {
        #[derive(serde::Deserialize)]
        struct KeyResponse {
            signing_key: String,
        }

        let resp = self
            .client
            .get(key_url)
            .send()
            .await
            .map_err(|e| SignatureError::KeyFetch(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SignatureError::KeyFetch(format!(
                "{} from {key_url}",
                resp.status()
            )));
        }
        let key: KeyResponse = resp
            .json()
            .await
            .map_err(|e| SignatureError::KeyFetch(e.to_string()))?;
        Ok(key.signing_key)
    }
}

/// Validates PSA webhook bodies.
#[derive(Clone)]
pub struct SignatureValidator {
    keys: Arc<dyn SigningKeySource>,
}

impl SignatureValidator {
    pub fn new(keys: Arc<dyn SigningKeySource>) -> Self {
        Self { keys }
    }

    pub async fn validate(&self, body: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
        let header = header
            .filter(|h| !h.is_empty())
            .ok_or(SignatureError::MissingHeader)?;
        let url = key_url(body)?;
        let key = self.keys.signing_key(&url).await?;
        verify_signature(body, &key, header)
    }
}
