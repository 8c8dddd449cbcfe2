#![allow(dead_code)]

use std::time::Duration;

use authz_gate::AuthConfig;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use httpmock::prelude::*;
use httpmock::Mock;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use once_cell::sync::Lazy;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

pub const DOMAIN: &str = "coffee-shop.us.auth0.test";
pub const AUDIENCE: &str = "drinks";
pub const ISSUER: &str = "https://coffee-shop.us.auth0.test/";
pub const JWKS_PATH: &str = "/.well-known/jwks.json";
pub const KID: &str = "provider-key-1";

pub struct KeyMaterial {
    pub encoding: EncodingKey,
    pub modulus: String,
    pub exponent: String,
}

fn generate_key_material() -> KeyMaterial {
    let mut rng = OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("key generation");
    let public_key = private_key.to_public_key();
    let private_pem = private_key
        .to_pkcs1_pem(LineEnding::LF)
        .expect("private pem");

    KeyMaterial {
        encoding: EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("encoding key"),
        modulus: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
        exponent: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
    }
}

/// Key published by the identity provider.
pub static PROVIDER_KEY: Lazy<KeyMaterial> = Lazy::new(generate_key_material);
/// Key the identity provider never published.
pub static ROGUE_KEY: Lazy<KeyMaterial> = Lazy::new(generate_key_material);

pub fn jwk(kid: &str, key: &KeyMaterial) -> Value {
    json!({
        "kid": kid,
        "kty": "RSA",
        "use": "sig",
        "alg": "RS256",
        "n": key.modulus,
        "e": key.exponent,
    })
}

pub fn jwks(entries: Vec<Value>) -> Value {
    json!({ "keys": entries })
}

pub async fn serve_jwks(server: &MockServer, body: Value) -> Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(GET).path(JWKS_PATH);
            then.status(200)
                .header("content-type", "application/json")
                .json_body(body);
        })
        .await
}

pub async fn serve_status(server: &MockServer, status: u16) -> Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(GET).path(JWKS_PATH);
            then.status(status);
        })
        .await
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config_for(server: &MockServer) -> AuthConfig {
    init_tracing();
    AuthConfig::new(DOMAIN, AUDIENCE)
        .with_jwks_url(server.url(JWKS_PATH))
        .with_refresh_cooldown(Duration::ZERO)
        .with_fetch_timeout(Duration::from_secs(2))
}

pub fn claims(permissions: Option<&[&str]>) -> Value {
    let now = Utc::now().timestamp();
    let mut payload = json!({
        "iss": ISSUER,
        "aud": AUDIENCE,
        "sub": "auth0|barista",
        "iat": now,
        "exp": now + 600,
    });
    if let Some(permissions) = permissions {
        payload["permissions"] = json!(permissions);
    }
    payload
}

pub fn sign(kid: Option<&str>, payload: &Value, key: &KeyMaterial) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    encode(&header, payload, &key.encoding).expect("sign token")
}

pub fn provider_token(payload: &Value) -> String {
    sign(Some(KID), payload, &PROVIDER_KEY)
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}
