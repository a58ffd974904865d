//! Identity provider — OAuth/JWT verification and user-
//! profile upsert live behind this trait as an external collaborator. The
//! connection handler only ever depends on `IdentityProvider::verify`.
//!
//! DESIGN
//! ======
//! The teacher's `services/auth.rs` does full GitHub OAuth code exchange
//! plus a Postgres upsert; that concrete flow is explicitly out of scope
//! here, so only the shape survives: a typed error enum and a small
//! result struct. `TestIdentityProvider` implements's "In test mode a
//! configured token maps directly to a synthetic user identity" — the
//! bearer token is hashed into a stable UUID via `Uuid::new_v5`, so the same
//! token always resolves to the same synthetic user across reconnects.

use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub user_id: Uuid,
    pub name: String,
    pub avatar: Option<String>,
    pub color: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("token rejected by identity provider")]
    Rejected,
    #[error("identity provider not configured")]
    NotConfigured,
}

impl crate::frame::ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        "E_UNAUTHORIZED"
    }
}

#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify a bearer token extracted from the handshake and return the
    /// identity to attach to the connection. Any failure is reported as `UNAUTHORIZED` and the
    /// connection is closed without upgrading further state.
    async fn verify(&self, bearer_token: &str) -> Result<UserIdentity, AuthError>;
}

/// Deterministic palette so the same synthetic user always gets the same
/// cursor color within a process lifetime.
const PALETTE: &[&str] = &["#E57373", "#64B5F6", "#81C784", "#FFD54F", "#BA68C8", "#4DB6AC"];

/// `E2E_TEST_AUTH` bypass (,): a configured token maps directly to a
/// synthetic user identity without calling out to a real identity provider.
pub struct TestIdentityProvider;

#[async_trait::async_trait]
impl IdentityProvider for TestIdentityProvider {
    async fn verify(&self, bearer_token: &str) -> Result<UserIdentity, AuthError> {
        if bearer_token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let user_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, bearer_token.as_bytes());
        let color = PALETTE[(user_id.as_u128() % PALETTE.len() as u128) as usize];
        Ok(UserIdentity {
            user_id,
            name: format!("Test User {}", &user_id.to_string()[..8]),
            avatar: None,
            color: color.to_owned(),
        })
    }
}

/// Stand-in for the real OAuth/JWT verifier this system depends on but does
/// not implement. Always rejects — a production
/// deployment wires a real `IdentityProvider` (e.g. one that verifies a JWT
/// against the identity provider's JWKS and upserts the user profile) in its
/// place.
pub struct UnconfiguredIdentityProvider;

#[async_trait::async_trait]
impl IdentityProvider for UnconfiguredIdentityProvider {
    async fn verify(&self, _bearer_token: &str) -> Result<UserIdentity, AuthError> {
        Err(AuthError::NotConfigured)
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
