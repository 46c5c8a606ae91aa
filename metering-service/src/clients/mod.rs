mod rate_plan;
mod subscription;
mod webhook;

pub use rate_plan::RatePlanClient;
pub use subscription::SubscriptionClient;
pub use webhook::{InvoiceCreatedNotification, WebhookClient};
