use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::error::{AuthError, Rejection};
use crate::extractors::{bearer_token, bearer_token_from_headers, AuthContext, BearerToken};
use crate::permissions::check_permissions;
use crate::verifier::TokenVerifier;

/// Gate in front of a protected operation.
///
/// Runs extraction, verification and the permission check in that order;
/// the first failure rejects the request.
#[derive(Clone)]
pub struct RequiresAuth {
    verifier: Arc<TokenVerifier>,
    permission: Option<String>,
    deadline: Option<Duration>,
}

impl RequiresAuth {
    pub fn new(verifier: Arc<TokenVerifier>, permission: impl Into<String>) -> Self {
        Self {
            verifier,
            permission: Some(permission.into()),
            deadline: None,
        }
    }

    /// Verify the token but never consult its permissions.
    pub fn authenticated_only(verifier: Arc<TokenVerifier>) -> Self {
        Self {
            verifier,
            permission: None,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn permission(&self) -> Option<&str> {
        self.permission.as_deref()
    }

    pub async fn authorize(&self, authorization: Option<&str>) -> Result<AuthContext, Rejection> {
        let token = bearer_token(authorization);
        self.decide(token).await
    }

    pub async fn authorize_headers(&self, headers: &HeaderMap) -> Result<AuthContext, Rejection> {
        let token = bearer_token_from_headers(headers);
        self.decide(token).await
    }

    /// Invoke `operation` only if the request is authorized.
    pub async fn call<F, Fut, T>(
        &self,
        authorization: Option<&str>,
        operation: F,
    ) -> Result<T, Rejection>
    where
        F: FnOnce(AuthContext) -> Fut,
        Fut: Future<Output = T>,
    {
        let context = self.authorize(authorization).await?;
        Ok(operation(context).await)
    }

    async fn decide(&self, token: Result<BearerToken, AuthError>) -> Result<AuthContext, Rejection> {
        let outcome = self.run(token).await;
        if let Some(metrics) = self.verifier.metrics() {
            match &outcome {
                Ok(_) => metrics.allowed(),
                Err(rejection) => metrics.rejected(rejection.error.code()),
            }
        }
        if let Err(rejection) = &outcome {
            debug!(
                code = rejection.error.code(),
                status = rejection.status.as_u16(),
                required = self.permission.as_deref(),
                "request rejected"
            );
        }
        outcome
    }

    async fn run(&self, token: Result<BearerToken, AuthError>) -> Result<AuthContext, Rejection> {
        let token = token.map_err(Rejection::unauthorized)?;

        let verified = match self.deadline {
            Some(deadline) => self.verifier.verify_within(token.as_str(), deadline).await,
            None => self.verifier.verify(token.as_str()).await,
        };
        let claims = verified.map_err(Rejection::unauthorized)?;

        if let Some(permission) = &self.permission {
            check_permissions(permission, &claims).map_err(Rejection::from_permission)?;
        }

        Ok(AuthContext { token, claims })
    }
}

/// Middleware form of [`RequiresAuth`], for `axum::middleware::from_fn_with_state`.
///
/// The verified [`AuthContext`] is stored in the request extensions.
pub async fn require_permission(
    State(guard): State<RequiresAuth>,
    mut request: Request,
    next: Next,
) -> Result<Response, Rejection> {
    let context = guard.authorize_headers(request.headers()).await?;
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}
