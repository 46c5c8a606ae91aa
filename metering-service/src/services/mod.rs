mod database;
mod event_store;
mod invoice;
mod meter;
pub mod metrics;
mod monitor;
pub mod pricing;
mod token;

pub use database::Database;
pub use event_store::EventStore;
pub use invoice::{InvoiceCreatedEvent, InvoiceService, ResyncSummary};
pub use meter::MeterService;
pub use metrics::{get_metrics, init_metrics};
pub use monitor::{BillingPeriodMonitor, TickSummary};
pub use token::{ServiceClaims, ServiceTokenIssuer};
