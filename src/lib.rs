pub mod ads;
pub mod config;
pub mod error;
pub mod experiments;
pub mod notify;
pub mod retry;

pub use ads::{AdsError, AdsPlatform, BudgetType, DryRunAds};
pub use config::MonitorConfig;
pub use error::{AbPilotError, Result};
pub use experiments::{JsonTestStore, TestMonitor, TestStore};
pub use notify::{LogNotifier, Notifier};
pub use retry::RetryPolicy;
