mod invoice;
mod meter;
mod rate_plan;
mod subscription;

pub use invoice::{CreateInvoice, CreateLineItem, Invoice, InvoiceLineItem, InvoiceStatus};
pub use meter::{BreakdownLine, MeterRequest, MeterResponse};
pub use rate_plan::{
    Discount, DiscountKind, FlatFee, Freemium, MinimumCommitment, RatePlan, SetupFee, StairStep,
    StairStepPricing, Tier, TieredPricing, UsageBasedPricing, VolumePricing,
};
pub use subscription::Subscription;
