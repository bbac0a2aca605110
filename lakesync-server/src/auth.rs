//! JWT verification for the sync surface.
//!
//! Tokens are HS256, verified against a server-configured secret. Claims
//! carry the client identity, the gateway the token is scoped to, and a
//! role: `client` for sync routes, `admin` for admin routes.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use lakesync_core::{Result, SyncError};

/// Role carried by a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Admin,
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub client_id: String,
    pub gateway_id: String,
    pub role: Role,
    pub exp: usize,
}

/// Verify a bearer token and check it is scoped to the routed gateway
/// and carries the required role.
pub fn verify_token(
    token: &str,
    secret: &[u8],
    gateway_id: &str,
    required: Role,
) -> Result<Claims> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(|e| SyncError::Unauthorized(e.to_string()))?;

    let claims = data.claims;
    if claims.gateway_id != gateway_id {
        return Err(SyncError::Unauthorized(format!(
            "token is scoped to gateway '{}'",
            claims.gateway_id
        )));
    }
    // Admin tokens may use client routes, not the other way round.
    if required == Role::Admin && claims.role != Role::Admin {
        return Err(SyncError::Forbidden {
            required: "admin".into(),
        });
    }
    Ok(claims)
}

/// Issue a token. Used by tests and the CLI-side tooling; production
/// tokens come from the external auth provider.
pub fn issue_token(claims: &Claims, secret: &[u8]) -> Result<String> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| SyncError::Config(format!("token signing failed: {e}")))
}

/// Pull the bearer token out of an `Authorization` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-key";

    fn claims(role: Role) -> Claims {
        Claims {
            client_id: "c1".into(),
            gateway_id: "gw1".into(),
            role,
            exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        }
    }

    #[test]
    fn test_roundtrip_client_token() {
        let token = issue_token(&claims(Role::Client), SECRET).unwrap();
        let verified = verify_token(&token, SECRET, "gw1", Role::Client).unwrap();
        assert_eq!(verified.client_id, "c1");
        assert_eq!(verified.role, Role::Client);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = issue_token(&claims(Role::Client), SECRET).unwrap();
        assert!(matches!(
            verify_token(&token, b"other-secret", "gw1", Role::Client),
            Err(SyncError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_wrong_gateway_rejected() {
        let token = issue_token(&claims(Role::Client), SECRET).unwrap();
        assert!(matches!(
            verify_token(&token, SECRET, "gw2", Role::Client),
            Err(SyncError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_client_role_cannot_use_admin_routes() {
        let token = issue_token(&claims(Role::Client), SECRET).unwrap();
        assert!(matches!(
            verify_token(&token, SECRET, "gw1", Role::Admin),
            Err(SyncError::Forbidden { .. })
        ));
        let admin = issue_token(&claims(Role::Admin), SECRET).unwrap();
        assert!(verify_token(&admin, SECRET, "gw1", Role::Admin).is_ok());
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut expired = claims(Role::Client);
        expired.exp = (chrono::Utc::now().timestamp() - 60) as usize;
        let token = issue_token(&expired, SECRET).unwrap();
        assert!(matches!(
            verify_token(&token, SECRET, "gw1", Role::Client),
            Err(SyncError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_bearer_extraction() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("Basic dXNlcg=="), None);
    }
}
