use std::env;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use thiserror::Error;

const DEFAULT_JWKS_TTL_SECONDS: u64 = 300;
const DEFAULT_REFRESH_COOLDOWN_SECONDS: u64 = 30;
const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 5;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("invalid value '{value}' for {name}")]
    Invalid { name: &'static str, value: String },
    #[error("signing algorithm allow-list must not be empty")]
    NoAlgorithms,
    #[error("signing algorithm {0:?} is not an RSA-family algorithm")]
    UnsupportedAlgorithm(Algorithm),
    #[error("failed to build JWKS HTTP client: {0}")]
    HttpClient(String),
}

/// Static configuration for verifying tokens issued by one identity provider.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Identity-provider host, e.g. `tenant.us.auth0.com`.
    pub domain: String,
    /// Expected audience claim (aud).
    pub audience: String,
    /// Expected issuer claim (iss), `https://<domain>/`.
    pub issuer: String,
    /// Location of the published key set.
    pub jwks_url: String,
    /// Accepted signing algorithms. RSA family only.
    pub algorithms: Vec<Algorithm>,
    /// Allowable clock skew in seconds when validating exp/nbf.
    pub leeway_seconds: u32,
    /// How long a fetched key set is trusted. Zero disables caching.
    pub jwks_ttl: Duration,
    /// Minimum age of the cached set before an unknown kid forces a refetch.
    pub jwks_refresh_cooldown: Duration,
    /// Upper bound for a single key set fetch.
    pub jwks_fetch_timeout: Duration,
}

impl AuthConfig {
    /// Derive issuer and key set location from the identity-provider domain.
    pub fn new(domain: impl Into<String>, audience: impl Into<String>) -> Self {
        let domain = domain.into();
        let issuer = format!("https://{domain}/");
        let jwks_url = format!("https://{domain}/.well-known/jwks.json");
        Self {
            domain,
            audience: audience.into(),
            issuer,
            jwks_url,
            algorithms: vec![Algorithm::RS256],
            leeway_seconds: 0,
            jwks_ttl: Duration::from_secs(DEFAULT_JWKS_TTL_SECONDS),
            jwks_refresh_cooldown: Duration::from_secs(DEFAULT_REFRESH_COOLDOWN_SECONDS),
            jwks_fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECONDS),
        }
    }

    /// Point key retrieval somewhere other than the domain's well-known path.
    pub fn with_jwks_url(mut self, url: impl Into<String>) -> Self {
        self.jwks_url = url.into();
        self
    }

    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    pub fn with_leeway(mut self, seconds: u32) -> Self {
        self.leeway_seconds = seconds;
        self
    }

    pub fn with_jwks_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_ttl = ttl;
        self
    }

    pub fn with_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.jwks_refresh_cooldown = cooldown;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.jwks_fetch_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.algorithms.is_empty() {
            return Err(ConfigError::NoAlgorithms);
        }
        for algorithm in &self.algorithms {
            if !is_rsa_family(*algorithm) {
                return Err(ConfigError::UnsupportedAlgorithm(*algorithm));
            }
        }
        Ok(())
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let domain = lookup("AUTH0_DOMAIN").ok_or(ConfigError::Missing("AUTH0_DOMAIN"))?;
        let audience = lookup("API_AUDIENCE").ok_or(ConfigError::Missing("API_AUDIENCE"))?;
        let mut config = Self::new(domain, audience);

        if let Some(url) = lookup("AUTH_JWKS_URL") {
            config = config.with_jwks_url(url);
        }
        if let Some(raw) = lookup("AUTH_ALGORITHMS") {
            config.algorithms = parse_algorithms(&raw)?;
        }
        if let Some(raw) = lookup("JWT_LEEWAY_SECONDS") {
            config.leeway_seconds = parse_number("JWT_LEEWAY_SECONDS", &raw)?;
        }
        if let Some(raw) = lookup("JWKS_TTL_SECONDS") {
            config.jwks_ttl = Duration::from_secs(parse_number("JWKS_TTL_SECONDS", &raw)?);
        }
        if let Some(raw) = lookup("JWKS_REFRESH_COOLDOWN_SECONDS") {
            config.jwks_refresh_cooldown =
                Duration::from_secs(parse_number("JWKS_REFRESH_COOLDOWN_SECONDS", &raw)?);
        }
        if let Some(raw) = lookup("JWKS_FETCH_TIMEOUT_SECONDS") {
            config.jwks_fetch_timeout =
                Duration::from_secs(parse_number("JWKS_FETCH_TIMEOUT_SECONDS", &raw)?);
        }

        config.validate()?;
        Ok(config)
    }
}

fn is_rsa_family(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
    )
}

fn parse_algorithms(raw: &str) -> Result<Vec<Algorithm>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<Algorithm>().map_err(|_| ConfigError::Invalid {
                name: "AUTH_ALGORITHMS",
                value: item.to_string(),
            })
        })
        .collect()
}

fn parse_number<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })
}
