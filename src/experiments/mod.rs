pub mod bidding;
pub mod config;
pub mod metrics;
pub mod monitor;
pub mod progress;
pub mod rollout;
pub mod significance;
pub mod stats;
pub mod store;

pub use config::{AbTest, StoreError, TestDimension, TestStatus, Variant};
pub use monitor::{CycleSummary, TestMonitor, TestOutcome};
pub use store::{JsonTestStore, TestStore};
