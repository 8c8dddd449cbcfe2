use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::DecodingKey;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ConfigError;
use crate::error::{AuthError, AuthResult};

/// One public verification key from the identity provider.
#[derive(Clone)]
pub struct SigningKey {
    pub kid: String,
    pub kty: String,
    pub usage: Option<String>,
    pub modulus: String,
    pub exponent: String,
    decoding: DecodingKey,
}

impl SigningKey {
    pub fn from_rsa_components(
        kid: impl Into<String>,
        usage: Option<String>,
        modulus: impl Into<String>,
        exponent: impl Into<String>,
    ) -> Result<Self, jsonwebtoken::errors::Error> {
        let modulus = modulus.into();
        let exponent = exponent.into();
        let decoding = DecodingKey::from_rsa_components(&modulus, &exponent)?;
        Ok(Self {
            kid: kid.into(),
            kty: "RSA".to_string(),
            usage,
            modulus,
            exponent,
            decoding,
        })
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("kty", &self.kty)
            .field("usage", &self.usage)
            .finish_non_exhaustive()
    }
}

/// Published keys indexed by `kid`.
#[derive(Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, Arc<SigningKey>>,
}

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later entries with a repeated kid replace earlier ones.
    pub fn insert(&mut self, key: SigningKey) {
        self.keys.insert(key.kid.clone(), Arc::new(key));
    }

    pub fn get(&self, kid: &str) -> Option<Arc<SigningKey>> {
        self.keys.get(kid).cloned()
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}

impl FromIterator<SigningKey> for KeySet {
    fn from_iter<I: IntoIterator<Item = SigningKey>>(iter: I) -> Self {
        let mut set = KeySet::new();
        for key in iter {
            set.insert(key);
        }
        set
    }
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.keys.keys()).finish()
    }
}

#[derive(Clone)]
pub struct JwksFetcher {
    client: Client,
    url: String,
}

impl JwksFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> AuthResult<KeySet> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| AuthError::KeySetUnavailable {
                reason: err.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(AuthError::KeySetUnavailable {
                reason: format!("HTTP {} from {}", response.status(), self.url),
            });
        }

        let body: JwksResponse =
            response
                .json()
                .await
                .map_err(|err| AuthError::KeySetUnavailable {
                    reason: err.to_string(),
                })?;

        let keys: KeySet = body.keys.into_iter().filter_map(JwkEntry::into_key).collect();
        debug!(count = keys.len(), jwks_url = %self.url, "fetched JWKS");
        Ok(keys)
    }
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<JwkEntry>,
}

#[derive(Debug, Deserialize)]
struct JwkEntry {
    kid: Option<String>,
    kty: Option<String>,
    #[serde(rename = "use")]
    usage: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

impl JwkEntry {
    fn into_key(self) -> Option<SigningKey> {
        let Some(kid) = self.kid else {
            debug!("skipping JWKS entry without kid");
            return None;
        };
        let kty = self.kty.unwrap_or_default();
        if kty != "RSA" {
            debug!(kid, kty, "skipping non-RSA JWKS entry");
            return None;
        }
        if let Some(usage) = self.usage.as_deref() {
            if usage != "sig" {
                debug!(kid, usage, "skipping JWKS entry not meant for signatures");
                return None;
            }
        }
        let (Some(modulus), Some(exponent)) = (self.n, self.e) else {
            warn!(kid, "skipping JWKS entry missing RSA components");
            return None;
        };

        match SigningKey::from_rsa_components(kid.clone(), self.usage, modulus, exponent) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(kid, error = %err, "skipping JWKS entry with unusable RSA components");
                None
            }
        }
    }
}
