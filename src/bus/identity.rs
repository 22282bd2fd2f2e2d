//! Module identities and the HS256 tokens that carry them.
//!
//! Every non-public `emit` must present a token minted by [`TokenAuthority`].
//! The decoded [`Identity`] is what handlers see; payload fields claiming a
//! different module are rejected by the bus.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::utils::config::AuthConfig;
use crate::utils::error::{AuthError, GateError, GateResult};

/// Privilege class of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    Core,
    Community,
}

impl ModuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Core => "core",
            ModuleType::Community => "community",
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "core" => Ok(ModuleType::Core),
            "community" => Ok(ModuleType::Community),
            other => Err(format!("unknown module type '{}'", other)),
        }
    }
}

/// Decoded caller identity handed to handlers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub module: String,
    pub module_type: ModuleType,
}

impl Identity {
    pub fn new(module: impl Into<String>, module_type: ModuleType) -> Self {
        Self {
            module: module.into(),
            module_type,
        }
    }

    pub fn is_core(&self) -> bool {
        self.module_type == ModuleType::Core
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.module, self.module_type)
    }
}

/// JWT claims embedded in every module token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject -- the module name.
    pub sub: String,
    pub module_type: ModuleType,
    /// Expiration time (UTC Unix timestamp).
    pub exp: i64,
    /// Issued-at time (UTC Unix timestamp).
    pub iat: i64,
    /// Unique token identifier for audit.
    pub jti: String,
}

/// Mints and verifies module tokens.
#[derive(Clone)]
pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_seconds: i64,
}

impl fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl TokenAuthority {
    pub fn new(secret: &str, ttl_seconds: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_seconds,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.jwt_secret, config.token_ttl_seconds)
    }

    /// Issue a token for `identity` valid for the configured lifetime
    pub fn issue(&self, identity: &Identity) -> GateResult<String> {
        let now = chrono::Utc::now().timestamp();
        self.issue_claims(&Claims {
            sub: identity.module.clone(),
            module_type: identity.module_type,
            exp: now + self.ttl_seconds,
            iat: now,
            jti: Uuid::new_v4().to_string(),
        })
    }

    /// Encode arbitrary claims. Used by tests that need expired tokens.
    pub fn issue_claims(&self, claims: &Claims) -> GateResult<String> {
        encode(&Header::default(), claims, &self.encoding)
            .map_err(|e| GateError::Internal(format!("Failed to sign token: {}", e)))
    }

    /// Validate signature and expiry, returning the embedded identity
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let data = decode::<Claims>(token, &self.decoding, &Validation::default()).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;
        Ok(Identity::new(data.claims.sub, data.claims.module_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> TokenAuthority {
        TokenAuthority::new("test-secret-that-is-long-enough-for-hmac", 900)
    }

    #[test]
    fn test_issue_and_verify() {
        let authority = authority();
        let identity = Identity::new("settings", ModuleType::Core);

        let token = authority.issue(&identity).unwrap();
        let decoded = authority.verify(&token).unwrap();

        assert_eq!(decoded, identity);
        assert!(decoded.is_core());
    }

    #[test]
    fn test_expired_token_fails() {
        let authority = authority();
        // well past the default 60 second leeway
        let now = chrono::Utc::now().timestamp();
        let token = authority
            .issue_claims(&Claims {
                sub: "blog".to_string(),
                module_type: ModuleType::Community,
                exp: now - 300,
                iat: now - 600,
                jti: Uuid::new_v4().to_string(),
            })
            .unwrap();

        assert!(matches!(authority.verify(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn test_different_secrets_fail() {
        let other = TokenAuthority::new("another-secret", 900);
        let token = other
            .issue(&Identity::new("blog", ModuleType::Community))
            .unwrap();

        assert!(matches!(authority().verify(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_empty_and_garbage_tokens() {
        let authority = authority();
        assert!(matches!(authority.verify(""), Err(AuthError::MissingToken)));
        assert!(matches!(authority.verify("not.a.jwt"), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_module_type_parsing() {
        assert_eq!("core".parse::<ModuleType>(), Ok(ModuleType::Core));
        assert_eq!("community".parse::<ModuleType>(), Ok(ModuleType::Community));
        assert!("admin".parse::<ModuleType>().is_err());
    }
}
