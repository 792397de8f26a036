pub mod cascade;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod matcher;
pub mod metrics;
pub mod model;
pub mod scheduler;
pub mod store;

pub use config::ScanflowConfig;
pub use controller::{ReconcileOutcome, ScanController};
pub use error::Error;
pub use events::Normalizer;
pub use model::finding::{Finding, Severity};
pub use model::rule::CascadingRule;
pub use model::{Phase, Scan, ScanRequest, ScanSpec};
