//! Tenant scoping for every outbound call and persistence write.
//!
//! The context is an explicit value threaded through function arguments;
//! callers acquire it before invoking the metering or invoicing services and
//! it drops with the operation. The pricing engine never consults it.

use service_core::error::AppError;

/// Per-operation tenant scope: organization id plus the credential presented
/// to upstream services on the tenant's behalf.
#[derive(Debug, Clone)]
pub struct TenantContext {
    organization_id: i64,
    credential: String,
}

impl TenantContext {
    pub fn new(organization_id: i64, credential: impl Into<String>) -> Self {
        Self {
            organization_id,
            credential: credential.into(),
        }
    }

    /// Build a context from optional transport-level parts. A missing
    /// organization id is a programming error on the caller's side and fails
    /// the operation as unauthenticated.
    pub fn from_parts(
        organization_id: Option<i64>,
        credential: Option<String>,
    ) -> Result<Self, AppError> {
        let organization_id = organization_id.ok_or_else(|| {
            AppError::Unauthenticated(anyhow::anyhow!("Missing tenant context"))
        })?;
        Ok(Self {
            organization_id,
            credential: credential.unwrap_or_default(),
        })
    }

    pub fn organization_id(&self) -> i64 {
        self.organization_id
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_parts_requires_organization_id() {
        let err = TenantContext::from_parts(None, Some("token".into())).unwrap_err();
        assert_eq!(err.kind(), "UNAUTHENTICATED");
    }

    #[test]
    fn from_parts_tolerates_missing_credential() {
        let ctx = TenantContext::from_parts(Some(42), None).unwrap();
        assert_eq!(ctx.organization_id(), 42);
        assert_eq!(ctx.credential(), "");
    }
}
