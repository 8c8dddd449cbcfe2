pub mod claims;
pub mod config;
pub mod error;
pub mod extractors;
pub mod guards;
pub mod jwks;
pub mod key_set;
pub mod permissions;
pub mod verifier;

pub use authz_observability::GateMetrics;
pub use claims::Claims;
pub use config::{AuthConfig, ConfigError};
pub use error::{AuthError, AuthResult, ErrorBody, Rejection};
pub use extractors::{bearer_token, bearer_token_from_headers, AuthContext, BearerToken};
pub use guards::{require_permission, RequiresAuth};
pub use jwks::{JwksFetcher, KeySet, SigningKey};
pub use key_set::KeySetCache;
pub use permissions::check_permissions;
pub use verifier::{TokenVerifier, TokenVerifierBuilder};
