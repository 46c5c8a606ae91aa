//! Service-credential issuer for autonomous loops.
//!
//! Mints short-lived HS256 credentials so scheduled executions can satisfy
//! tenant-context propagation when no human caller exists. The signing key is
//! immutable after initialization; minting takes no locks.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use tracing::debug;

use crate::config::CredentialConfig;

const SUBJECT: &str = "metering-service";
const TOKEN_TYPE: &str = "service";

/// Claims carried by a service credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceClaims {
    pub sub: String,
    pub iss: String,
    #[serde(rename = "organizationId")]
    pub organization_id: i64,
    #[serde(rename = "type")]
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues signed service credentials scoped to a tenant.
#[derive(Clone)]
pub struct ServiceTokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl_seconds: i64,
}

impl std::fmt::Debug for ServiceTokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceTokenIssuer")
            .field("issuer", &self.issuer)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl ServiceTokenIssuer {
    pub fn new(config: &CredentialConfig) -> Result<Self, AppError> {
        if config.secret.len() < 32 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Credential secret must be at least 32 bytes"
            )));
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            ttl_seconds: config.ttl_seconds as i64,
        })
    }

    /// Mint a credential for the given tenant.
    pub fn issue(&self, organization_id: i64) -> Result<String, AppError> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.ttl_seconds);

        let claims = ServiceClaims {
            sub: SUBJECT.to_string(),
            iss: self.issuer.clone(),
            organization_id,
            token_type: TOKEN_TYPE.to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Failed to sign service credential: {}", e))
            })?;

        debug!(organization_id, "Issued service credential");
        Ok(token)
    }

    /// Validate a credential and return its claims.
    pub fn validate(&self, token: &str) -> Result<ServiceClaims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);

        let data = decode::<ServiceClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| AppError::Unauthenticated(anyhow::anyhow!("Invalid credential: {}", e)))?;

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CredentialConfig {
        CredentialConfig {
            secret: "0123456789abcdef0123456789abcdef".to_string(),
            issuer: "metering-service".to_string(),
            ttl_seconds: 7200,
        }
    }

    #[test]
    fn issue_and_validate_round_trip() {
        let issuer = ServiceTokenIssuer::new(&test_config()).unwrap();

        let token = issuer.issue(42).unwrap();
        assert!(!token.is_empty());

        let claims = issuer.validate(&token).unwrap();
        assert_eq!(claims.sub, "metering-service");
        assert_eq!(claims.organization_id, 42);
        assert_eq!(claims.token_type, "service");
        assert_eq!(claims.exp - claims.iat, 7200);
    }

    #[test]
    fn short_secret_is_rejected() {
        let config = CredentialConfig {
            secret: "too-short".to_string(),
            ..test_config()
        };
        let err = ServiceTokenIssuer::new(&config).unwrap_err();
        assert_eq!(err.kind(), "CONFIG_ERROR");
    }

    #[test]
    fn wrong_issuer_fails_validation() {
        let issuer = ServiceTokenIssuer::new(&test_config()).unwrap();
        let other = ServiceTokenIssuer::new(&CredentialConfig {
            issuer: "someone-else".to_string(),
            ..test_config()
        })
        .unwrap();

        let token = other.issue(42).unwrap();
        let err = issuer.validate(&token).unwrap_err();
        assert_eq!(err.kind(), "UNAUTHENTICATED");
    }
}
