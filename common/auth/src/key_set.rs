use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use authz_observability::GateMetrics;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{AuthConfig, ConfigError};
use crate::error::{AuthError, AuthResult};
use crate::jwks::{JwksFetcher, KeySet, SigningKey};

#[derive(Clone)]
struct Snapshot {
    keys: Arc<KeySet>,
    fetched_at: Instant,
}

#[derive(Clone)]
struct Failure {
    at: Instant,
    error: AuthError,
}

/// Process-wide cache of the identity provider's published keys.
///
/// Reads take a short read lock on the current snapshot. Refreshes are
/// serialized behind `refresh_lock` and re-check the snapshot once the lock
/// is held, so a burst of misses results in a single fetch. A lookup that
/// waited on the lock while another task attempted a fetch settles on that
/// attempt's outcome instead of fetching again, and failed attempts are not
/// retried on the lookup path until the cooldown has passed.
#[derive(Clone)]
pub struct KeySetCache {
    fetcher: JwksFetcher,
    ttl: Duration,
    cooldown: Duration,
    current: Arc<RwLock<Option<Snapshot>>>,
    refresh_lock: Arc<Mutex<()>>,
    attempts: Arc<AtomicU64>,
    last_failure: Arc<RwLock<Option<Failure>>>,
    metrics: Option<GateMetrics>,
}

impl KeySetCache {
    pub fn new(fetcher: JwksFetcher, ttl: Duration, cooldown: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            cooldown,
            current: Arc::new(RwLock::new(None)),
            refresh_lock: Arc::new(Mutex::new(())),
            attempts: Arc::new(AtomicU64::new(0)),
            last_failure: Arc::new(RwLock::new(None)),
            metrics: None,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, ConfigError> {
        let fetcher = JwksFetcher::new(config.jwks_url.clone(), config.jwks_fetch_timeout)?;
        Ok(Self::new(fetcher, config.jwks_ttl, config.jwks_refresh_cooldown))
    }

    pub fn with_metrics(mut self, metrics: GateMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn fetcher(&self) -> &JwksFetcher {
        &self.fetcher
    }

    /// The most recently fetched set, fresh or not.
    pub fn snapshot(&self) -> Option<Arc<KeySet>> {
        self.read().map(|snapshot| snapshot.keys)
    }

    /// Forget the current set; the next lookup fetches.
    pub fn invalidate(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub async fn get(&self, kid: &str) -> AuthResult<Arc<SigningKey>> {
        let seen = self.attempts.load(Ordering::Acquire);
        if let Some(snapshot) = self.read() {
            if self.is_fresh(&snapshot) {
                if let Some(key) = snapshot.keys.get(kid) {
                    return Ok(key);
                }
            }
        }

        let _guard = self.refresh_lock.lock().await;

        let stale = match self.read() {
            Some(snapshot) if self.is_fresh(&snapshot) => {
                if let Some(key) = snapshot.keys.get(kid) {
                    return Ok(key);
                }
                if snapshot.fetched_at.elapsed() < self.cooldown {
                    debug!(kid, "unknown kid within refresh cooldown");
                    return Err(AuthError::KeyNotFound {
                        kid: kid.to_string(),
                    });
                }
                Some(snapshot)
            }
            other => other,
        };

        if self.attempts.load(Ordering::Acquire) != seen {
            debug!(kid, "settling on a fetch made while waiting");
            return self.settle(kid, stale, None);
        }
        if let Some(failure) = self.recent_failure() {
            debug!(kid, "last JWKS fetch failed within cooldown");
            return self.settle(kid, stale, Some(failure.error));
        }

        match self.fetch_and_store().await {
            Ok(keys) => keys.get(kid).ok_or_else(|| AuthError::KeyNotFound {
                kid: kid.to_string(),
            }),
            Err(err) => match stale.and_then(|snapshot| snapshot.keys.get(kid)) {
                Some(key) => {
                    warn!(kid, error = %err, jwks_url = %self.fetcher.url(), "serving stale signing key");
                    Ok(key)
                }
                None => Err(err),
            },
        }
    }

    /// Fetch unconditionally and replace the cached set.
    pub async fn refresh(&self) -> AuthResult<usize> {
        let _guard = self.refresh_lock.lock().await;
        let keys = self.fetch_and_store().await?;
        Ok(keys.len())
    }

    /// Periodically refresh in the background. Failures keep the old set.
    pub fn spawn_background_refresh(&self, every: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match cache.refresh().await {
                    Ok(count) => {
                        debug!(count, jwks_url = %cache.fetcher.url(), "refreshed JWKS keys");
                    }
                    Err(err) => {
                        warn!(error = %err, jwks_url = %cache.fetcher.url(), "failed to refresh JWKS keys");
                    }
                }
            }
        })
    }

    /// Answer from whatever is cached without touching the network.
    fn settle(
        &self,
        kid: &str,
        snapshot: Option<Snapshot>,
        failure: Option<AuthError>,
    ) -> AuthResult<Arc<SigningKey>> {
        if let Some(key) = snapshot.and_then(|snapshot| snapshot.keys.get(kid)) {
            return Ok(key);
        }
        let failure = failure.or_else(|| {
            self.last_failure
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .map(|failure| failure.error.clone())
        });
        Err(failure.unwrap_or_else(|| AuthError::KeyNotFound {
            kid: kid.to_string(),
        }))
    }

    fn recent_failure(&self) -> Option<Failure> {
        self.last_failure
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|failure| failure.at.elapsed() < self.cooldown)
    }

    async fn fetch_and_store(&self) -> AuthResult<Arc<KeySet>> {
        let started = Instant::now();
        let result = self.fetcher.fetch().await;
        if let Some(metrics) = &self.metrics {
            metrics.jwks_fetch(result.is_ok(), started.elapsed().as_secs_f64());
        }

        let keys = match result {
            Ok(keys) => Arc::new(keys),
            Err(err) => {
                *self.last_failure.write().unwrap_or_else(PoisonError::into_inner) = Some(Failure {
                    at: Instant::now(),
                    error: err.clone(),
                });
                self.attempts.fetch_add(1, Ordering::AcqRel);
                return Err(err);
            }
        };

        info!(count = keys.len(), jwks_url = %self.fetcher.url(), "stored JWKS keys");
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Snapshot {
            keys: keys.clone(),
            fetched_at: Instant::now(),
        });
        *self.last_failure.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.attempts.fetch_add(1, Ordering::AcqRel);
        Ok(keys)
    }

    fn read(&self) -> Option<Snapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_fresh(&self, snapshot: &Snapshot) -> bool {
        snapshot.fetched_at.elapsed() < self.ttl
    }
}
