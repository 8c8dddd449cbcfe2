use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header::AUTHORIZATION, request::Parts, HeaderMap};

use crate::claims::Claims;
use crate::error::{AuthError, AuthResult, Rejection};
use crate::permissions::check_permissions;
use crate::verifier::TokenVerifier;

/// Raw compact-serialized token exactly as the caller presented it.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(..)")
    }
}

impl AsRef<str> for BearerToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Pull the token out of an `Authorization` header value.
pub fn bearer_token(header: Option<&str>) -> AuthResult<BearerToken> {
    let header = header.ok_or(AuthError::Unauthenticated)?;
    let parts: Vec<&str> = header.split_whitespace().collect();

    match parts.as_slice() {
        [scheme, ..] if !scheme.eq_ignore_ascii_case("bearer") => {
            Err(AuthError::MalformedHeader(AuthError::WRONG_SCHEME))
        }
        [_, token] => Ok(BearerToken((*token).to_owned())),
        _ => Err(AuthError::MalformedHeader(AuthError::TOKEN_NOT_FOUND)),
    }
}

/// Same as [`bearer_token`], reading the header from a request's headers.
pub fn bearer_token_from_headers(headers: &HeaderMap) -> AuthResult<BearerToken> {
    let value = match headers.get(AUTHORIZATION) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| AuthError::MalformedHeader(AuthError::NOT_VISIBLE_ASCII))?,
        ),
        None => None,
    };
    bearer_token(value)
}

/// A request whose token has been verified.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub token: BearerToken,
    pub claims: Claims,
}

impl AuthContext {
    pub fn token(&self) -> &str {
        self.token.as_str()
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.claims.has_permission(permission)
    }

    /// Run the permission check against an already verified request.
    pub fn require(&self, permission: &str) -> Result<(), Rejection> {
        check_permissions(permission, &self.claims).map_err(Rejection::from_permission)
    }

    pub fn into_claims(self) -> Claims {
        self.claims
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    Arc<TokenVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(context) = parts.extensions.get::<AuthContext>() {
            return Ok(context.clone());
        }

        let verifier = Arc::<TokenVerifier>::from_ref(state);
        let token = bearer_token_from_headers(&parts.headers).map_err(Rejection::unauthorized)?;
        let claims = verifier
            .verify(token.as_str())
            .await
            .map_err(Rejection::unauthorized)?;

        Ok(Self { token, claims })
    }
}
