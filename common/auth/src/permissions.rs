use tracing::warn;

use crate::claims::Claims;
use crate::error::{AuthError, AuthResult};

/// Literal membership test of `permission` in the token's `permissions` claim.
pub fn check_permissions(permission: &str, claims: &Claims) -> AuthResult<()> {
    let granted = claims
        .permissions
        .as_deref()
        .ok_or(AuthError::PermissionsClaimMissing)?;

    if granted.iter().any(|value| value == permission) {
        return Ok(());
    }

    warn!(
        required = permission,
        subject = claims.subject.as_deref().unwrap_or_default(),
        "permission_check_failed"
    );
    Err(AuthError::PermissionDenied {
        permission: permission.to_string(),
    })
}
