//! Per-user request details for lookup-key feeds.
//!
//! Some feeds can only be fetched with the owner's credentials. Their
//! dispatch items and delivery payloads carry a rewritten URL and request
//! headers instead of the bare feed URL.

use std::collections::BTreeMap;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use serde::{Deserialize, Serialize};
use url::Url;

use feedpulse_common::error::{AppError, AppResult};
use feedpulse_common::types::{ExternalCredential, ExternalCredentialType};

const NONCE_LEN: usize = 12;
const REDDIT_OAUTH_HOST: &str = "oauth.reddit.com";

/// Decrypts credential secrets stored as `<nonce hex>:<ciphertext+tag hex>`
/// with AES-256-GCM.
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    /// Build from a hex-encoded 32-byte key.
    pub fn from_hex_key(key_hex: &str) -> AppResult<Self> {
        let key = hex::decode(key_hex.trim())
            .map_err(|e| AppError::Config(format!("encryption key is not valid hex: {e}")))?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|_| AppError::Config("encryption key must be 32 bytes".to_string()))?;
        Ok(Self { cipher })
    }

    pub fn decrypt(&self, encrypted: &str) -> AppResult<String> {
        let (nonce_hex, ciphertext_hex) = encrypted
            .split_once(':')
            .ok_or_else(|| AppError::Decryption("missing nonce separator".to_string()))?;

        let nonce = hex::decode(nonce_hex).map_err(|e| AppError::Decryption(e.to_string()))?;
        if nonce.len() != NONCE_LEN {
            return Err(AppError::Decryption(format!(
                "nonce must be {NONCE_LEN} bytes, got {}",
                nonce.len()
            )));
        }
        let ciphertext =
            hex::decode(ciphertext_hex).map_err(|e| AppError::Decryption(e.to_string()))?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| AppError::Decryption("authentication failed".to_string()))?;

        String::from_utf8(plaintext).map_err(|e| AppError::Decryption(e.to_string()))
    }
}

/// Request details the fetcher must use for a lookup-key feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLookupDetails {
    pub key: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

/// Resolves [`RequestLookupDetails`] from a feed and its owner's credentials.
#[derive(Clone, Default)]
pub struct RequestLookupResolver {
    cipher: Option<CredentialCipher>,
}

impl RequestLookupResolver {
    pub fn new(cipher: Option<CredentialCipher>) -> Self {
        Self { cipher }
    }

    /// `None` when the feed has no lookup key, is not a supported host, the
    /// owner has no usable credential, or no decryption key is configured.
    pub fn resolve(
        &self,
        url: &str,
        lookup_key: Option<&str>,
        credentials: &[ExternalCredential],
    ) -> Option<RequestLookupDetails> {
        let lookup_key = lookup_key.filter(|key| !key.is_empty())?;
        let mut parsed = Url::parse(url).ok()?;

        if !is_reddit_host(parsed.host_str()?) {
            return None;
        }

        let encrypted_token = credentials
            .iter()
            .filter(|c| c.credential_type == ExternalCredentialType::Reddit)
            .find_map(|c| c.data.access_token.as_deref())?;

        let cipher = self.cipher.as_ref()?;
        let access_token = match cipher.decrypt(encrypted_token) {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(lookup_key, error = %e, "Failed to decrypt reddit access token");
                return None;
            }
        };

        parsed.set_host(Some(REDDIT_OAUTH_HOST)).ok()?;

        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), format!("Bearer {access_token}"));

        Some(RequestLookupDetails {
            key: lookup_key.to_string(),
            url: parsed.to_string(),
            headers,
        })
    }
}

fn is_reddit_host(host: &str) -> bool {
    host == "reddit.com" || host.ends_with(".reddit.com")
}
