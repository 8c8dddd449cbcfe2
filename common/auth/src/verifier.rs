use std::time::Duration;

use authz_observability::GateMetrics;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde_json::Value;
use tracing::debug;

use crate::claims::Claims;
use crate::config::{AuthConfig, ConfigError};
use crate::error::{AuthError, AuthResult};
use crate::key_set::KeySetCache;

/// Verifies bearer tokens against the identity provider's published keys.
#[derive(Clone)]
pub struct TokenVerifier {
    config: AuthConfig,
    keys: KeySetCache,
    metrics: Option<GateMetrics>,
}

impl TokenVerifier {
    /// Refuses an algorithm allow-list that could never accept a provider token.
    pub fn new(config: AuthConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let keys = KeySetCache::from_config(&config)?;
        Ok(Self {
            config,
            keys,
            metrics: None,
        })
    }

    pub fn builder(config: AuthConfig) -> TokenVerifierBuilder {
        TokenVerifierBuilder::new(config)
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn key_cache(&self) -> &KeySetCache {
        &self.keys
    }

    pub fn metrics(&self) -> Option<&GateMetrics> {
        self.metrics.as_ref()
    }

    pub async fn verify(&self, token: &str) -> AuthResult<Claims> {
        let header = decode_header(token)?;
        let kid = header
            .kid
            .ok_or(AuthError::MalformedHeader(AuthError::MISSING_KID))?;
        let key = self.keys.get(&kid).await?;

        let token_data = decode::<Value>(token, key.decoding_key(), &self.validation())?;
        let claims = Claims::try_from(token_data.claims)?;
        debug!(kid, alg = ?header.alg, "verified JWT successfully");
        Ok(claims)
    }

    /// [`verify`](Self::verify) bounded by the caller's remaining request budget.
    pub async fn verify_within(&self, token: &str, deadline: Duration) -> AuthResult<Claims> {
        tokio::time::timeout(deadline, self.verify(token))
            .await
            .map_err(|_| AuthError::DeadlineExceeded)?
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.algorithms = self.config.algorithms.clone();
        validation.set_issuer(&[self.config.issuer.as_str()]);
        validation.set_audience(&[self.config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.leeway = self.config.leeway_seconds.into();
        validation
    }
}

pub struct TokenVerifierBuilder {
    config: AuthConfig,
    keys: Option<KeySetCache>,
    metrics: Option<GateMetrics>,
    prefetch: bool,
}

impl TokenVerifierBuilder {
    fn new(config: AuthConfig) -> Self {
        Self {
            config,
            keys: None,
            metrics: None,
            prefetch: false,
        }
    }

    /// Share an existing cache, e.g. between verifiers for several audiences.
    pub fn with_key_cache(mut self, keys: KeySetCache) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn with_metrics(mut self, metrics: GateMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Fetch the key set during `build` instead of on first use.
    pub fn prefetch(mut self) -> Self {
        self.prefetch = true;
        self
    }

    pub async fn build(self) -> AuthResult<TokenVerifier> {
        self.config.validate()?;
        let mut keys = match self.keys {
            Some(keys) => keys,
            None => KeySetCache::from_config(&self.config)?,
        };
        if let Some(metrics) = &self.metrics {
            keys = keys.with_metrics(metrics.clone());
        }

        let verifier = TokenVerifier {
            config: self.config,
            keys,
            metrics: self.metrics,
        };

        if self.prefetch {
            let count = verifier.keys.refresh().await?;
            debug!(count, jwks_url = %verifier.keys.fetcher().url(), "prefetched JWKS keys");
        }

        Ok(verifier)
    }
}
