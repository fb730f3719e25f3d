pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod types;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::HttpAdsClient;
pub use config::AdsClientConfig;
