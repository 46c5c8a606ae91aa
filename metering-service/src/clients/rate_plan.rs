//! Client for the rate-plan catalog.

use reqwest::{Client, StatusCode};
use service_core::error::AppError;
use std::time::Duration;
use tracing::{instrument, warn};

use crate::models::RatePlan;
use crate::tenant::TenantContext;

/// Fetches rate-plan configuration by id.
///
/// Some deployments of the catalog fail `GET /rateplans/{id}` with a 5xx
/// while the list endpoint stays healthy, so a single list-and-filter
/// fallback runs before the failure is reported. This is the one retry
/// performed inside the core; everywhere else the monitor's next tick is the
/// retry mechanism.
pub struct RatePlanClient {
    client: Client,
    base_url: String,
}

impl RatePlanClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Fetch a rate plan by id.
    #[instrument(skip(self, ctx), fields(organization_id = ctx.organization_id()))]
    pub async fn fetch(&self, ctx: &TenantContext, rate_plan_id: i64) -> Result<RatePlan, AppError> {
        let url = format!("{}/rateplans/{}", self.base_url, rate_plan_id);

        let response = self
            .client
            .get(&url)
            .header("X-Organization-Id", ctx.organization_id().to_string())
            .bearer_auth(ctx.credential())
            .send()
            .await
            .map_err(|e| {
                AppError::UpstreamUnavailable(anyhow::anyhow!(
                    "Rate plan service unreachable: {}",
                    e
                ))
            })?;

        match response.status() {
            status if status.is_success() => response.json::<RatePlan>().await.map_err(|e| {
                AppError::UpstreamUnavailable(anyhow::anyhow!(
                    "Malformed rate plan response: {}",
                    e
                ))
            }),
            StatusCode::NOT_FOUND => Err(AppError::NotFound(anyhow::anyhow!(
                "Rate plan {} not found",
                rate_plan_id
            ))),
            status if status.is_server_error() => {
                warn!(
                    rate_plan_id,
                    status = %status,
                    "Rate plan fetch failed upstream, falling back to list lookup"
                );
                self.fetch_via_list(ctx, rate_plan_id).await
            }
            status => Err(AppError::UpstreamUnavailable(anyhow::anyhow!(
                "Rate plan service returned {}",
                status
            ))),
        }
    }

    /// Fallback on 5xx: enumerate the tenant's rate plans and filter locally.
    /// The list is treated as authoritative, so a miss is `NotFound`.
    async fn fetch_via_list(
        &self,
        ctx: &TenantContext,
        rate_plan_id: i64,
    ) -> Result<RatePlan, AppError> {
        let url = format!("{}/rateplans", self.base_url);

        let plans = self
            .client
            .get(&url)
            .header("X-Organization-Id", ctx.organization_id().to_string())
            .bearer_auth(ctx.credential())
            .send()
            .await
            .map_err(|e| {
                AppError::UpstreamUnavailable(anyhow::anyhow!(
                    "Rate plan list fallback unreachable: {}",
                    e
                ))
            })?
            .error_for_status()
            .map_err(|e| {
                AppError::UpstreamUnavailable(anyhow::anyhow!(
                    "Rate plan list fallback failed: {}",
                    e
                ))
            })?
            .json::<Vec<RatePlan>>()
            .await
            .map_err(|e| {
                AppError::UpstreamUnavailable(anyhow::anyhow!(
                    "Malformed rate plan list response: {}",
                    e
                ))
            })?;

        plans
            .into_iter()
            .find(|p| p.rate_plan_id == rate_plan_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Rate plan {} not found", rate_plan_id))
            })
    }
}
