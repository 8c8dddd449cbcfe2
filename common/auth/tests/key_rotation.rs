mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use authz_gate::{AuthError, KeySetCache, TokenVerifier};
use httpmock::prelude::*;
use support::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cold_lookups_share_one_fetch() -> Result<()> {
    let server = MockServer::start_async().await;
    let mock = serve_jwks(&server, jwks(vec![jwk(KID, &PROVIDER_KEY)])).await;
    let verifier = Arc::new(TokenVerifier::new(config_for(&server))?);
    let token = provider_token(&claims(Some(&["post:drink"])));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let verifier = verifier.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move { verifier.verify(&token).await }));
    }
    for handle in handles {
        handle.await??;
    }

    assert_eq!(mock.hits_async().await, 1);
    Ok(())
}

#[tokio::test]
async fn rotated_key_is_picked_up_on_miss() -> Result<()> {
    let server = MockServer::start_async().await;
    let before = serve_jwks(&server, jwks(vec![jwk("old-key", &ROGUE_KEY)])).await;
    let verifier = TokenVerifier::new(config_for(&server))?;
    let token = provider_token(&claims(Some(&["post:drink"])));

    let err = verifier.verify(&token).await.expect_err("not yet published");
    assert!(matches!(err, AuthError::KeyNotFound { .. }));
    assert_eq!(before.hits_async().await, 1);
    before.delete_async().await;

    let after = serve_jwks(
        &server,
        jwks(vec![jwk("old-key", &ROGUE_KEY), jwk(KID, &PROVIDER_KEY)]),
    )
    .await;
    verifier.verify(&token).await?;
    verifier.verify(&token).await?;
    assert_eq!(after.hits_async().await, 1);
    Ok(())
}

#[tokio::test]
async fn stale_keys_cover_a_provider_outage() -> Result<()> {
    let server = MockServer::start_async().await;
    let healthy = serve_jwks(&server, jwks(vec![jwk(KID, &PROVIDER_KEY)])).await;
    let verifier = TokenVerifier::new(config_for(&server).with_jwks_ttl(Duration::ZERO))?;
    let token = provider_token(&claims(Some(&["post:drink"])));

    verifier.verify(&token).await?;
    healthy.delete_async().await;

    let outage = serve_status(&server, 502).await;
    verifier.verify(&token).await?;
    assert_eq!(outage.hits_async().await, 1);

    let unknown = sign(Some("never-published"), &claims(None), &ROGUE_KEY);
    let err = verifier.verify(&unknown).await.expect_err("nothing stale to serve");
    assert!(matches!(err, AuthError::KeySetUnavailable { .. }));
    Ok(())
}

#[tokio::test]
async fn background_refresh_keeps_fetching() -> Result<()> {
    let server = MockServer::start_async().await;
    let mock = serve_jwks(&server, jwks(vec![jwk(KID, &PROVIDER_KEY)])).await;
    let cache = KeySetCache::from_config(&config_for(&server))?;

    let handle = cache.spawn_background_refresh(Duration::from_millis(50));
    tokio::time::sleep(Duration::from_millis(275)).await;
    handle.abort();

    assert!(mock.hits_async().await >= 3);
    assert!(cache.snapshot().expect("refreshed").contains(KID));
    Ok(())
}

#[tokio::test]
async fn shared_cache_serves_several_verifiers() -> Result<()> {
    let server = MockServer::start_async().await;
    let mock = serve_jwks(&server, jwks(vec![jwk(KID, &PROVIDER_KEY)])).await;
    let cache = KeySetCache::from_config(&config_for(&server))?;

    let drinks = TokenVerifier::builder(config_for(&server))
        .with_key_cache(cache.clone())
        .build()
        .await?;
    let mut admin_config = config_for(&server);
    admin_config.audience = "drinks-admin".into();
    let admin = TokenVerifier::builder(admin_config)
        .with_key_cache(cache)
        .build()
        .await?;

    let token = provider_token(&claims(Some(&["post:drink"])));
    drinks.verify(&token).await?;
    let err = admin.verify(&token).await.expect_err("different audience");
    assert!(matches!(err, AuthError::InvalidClaims { .. }));

    assert_eq!(mock.hits_async().await, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_lookups_during_an_outage_share_one_failed_fetch() -> Result<()> {
    let server = MockServer::start_async().await;
    let healthy = serve_jwks(&server, jwks(vec![jwk(KID, &PROVIDER_KEY)])).await;
    let config = config_for(&server)
        .with_jwks_ttl(Duration::from_millis(200))
        .with_fetch_timeout(Duration::from_millis(300))
        .with_refresh_cooldown(Duration::from_secs(30));
    let verifier = Arc::new(TokenVerifier::new(config)?);
    let token = provider_token(&claims(Some(&["post:drink"])));

    verifier.verify(&token).await?;
    healthy.delete_async().await;
    let hanging = server
        .mock_async(|when, then| {
            when.method(GET).path(JWKS_PATH);
            then.status(200)
                .delay(Duration::from_secs(5))
                .json_body(jwks(vec![jwk(KID, &PROVIDER_KEY)]));
        })
        .await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    let started = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let verifier = verifier.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move { verifier.verify(&token).await }));
    }
    for handle in handles {
        handle.await??;
    }

    assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
    assert_eq!(hanging.hits_async().await, 1);
    Ok(())
}
