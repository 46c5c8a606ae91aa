//! Client for the subscription service.

use reqwest::{Client, StatusCode};
use service_core::error::AppError;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::models::Subscription;
use crate::tenant::TenantContext;

pub struct SubscriptionClient {
    client: Client,
    base_url: String,
}

impl SubscriptionClient {
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

    /// Fetch a single subscription by id.
    #[instrument(skip(self, ctx), fields(organization_id = ctx.organization_id()))]
    pub async fn get(
        &self,
        ctx: &TenantContext,
        subscription_id: i64,
    ) -> Result<Subscription, AppError> {
        let url = format!("{}/subscriptions/{}", self.base_url, subscription_id);

        let response = self
            .client
            .get(&url)
            .header("X-Organization-Id", ctx.organization_id().to_string())
            .bearer_auth(ctx.credential())
            .send()
            .await
            .map_err(|e| {
                AppError::UpstreamUnavailable(anyhow::anyhow!(
                    "Subscription service unreachable: {}",
                    e
                ))
            })?;

        match response.status() {
            status if status.is_success() => {
                let sub = response.json::<Subscription>().await.map_err(|e| {
                    AppError::UpstreamUnavailable(anyhow::anyhow!(
                        "Malformed subscription response: {}",
                        e
                    ))
                })?;
                debug!(subscription_id, customer_id = ?sub.customer_id, "Fetched subscription");
                Ok(sub)
            }
            StatusCode::NOT_FOUND => Err(AppError::NotFound(anyhow::anyhow!(
                "Subscription {} not found",
                subscription_id
            ))),
            status => Err(AppError::UpstreamUnavailable(anyhow::anyhow!(
                "Subscription service returned {}",
                status
            ))),
        }
    }

    /// All active subscriptions for the tenant. Upstream failure degrades to
    /// an empty list: the monitor treats it as "nothing to do this tick"
    /// rather than aborting the full run.
    #[instrument(skip(self, ctx), fields(organization_id = ctx.organization_id()))]
    pub async fn list_active(&self, ctx: &TenantContext) -> Vec<Subscription> {
        let url = format!(
            "{}/subscriptions?organizationId={}&status=ACTIVE",
            self.base_url,
            ctx.organization_id()
        );

        let result = async {
            self.client
                .get(&url)
                .header("X-Organization-Id", ctx.organization_id().to_string())
                .bearer_auth(ctx.credential())
                .send()
                .await?
                .error_for_status()?
                .json::<Vec<Subscription>>()
                .await
        }
        .await;

        match result {
            Ok(subscriptions) => {
                debug!(
                    organization_id = ctx.organization_id(),
                    count = subscriptions.len(),
                    "Fetched active subscriptions"
                );
                subscriptions
            }
            Err(e) => {
                warn!(
                    organization_id = ctx.organization_id(),
                    error = %e,
                    "Failed to list active subscriptions, treating as empty"
                );
                Vec::new()
            }
        }
    }
}
