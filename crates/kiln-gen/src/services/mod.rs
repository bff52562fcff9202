//! Service registry
//!
//! Maps service names to concrete implementations.

pub mod meshy;
pub mod mock;

use crate::config::KilnConfig;
use crate::http::HttpFetcher;
use crate::service::{BinaryFetcher, GenerationService};
use kiln_core::{KilnError, Result};

/// Create a generation service by name with configuration
pub fn create_service(name: &str, config: &KilnConfig) -> Result<Box<dyn GenerationService>> {
    if !config.is_enabled(name) {
        return Err(KilnError::ConfigurationError(format!(
            "Service '{}' is disabled in config",
            name
        )));
    }
    match name {
        "mock" => Ok(Box::new(mock::MockService::new())),
        "meshy" => Ok(Box::new(meshy::MeshyService::from_config(config)?)),
        _ => Err(KilnError::ConfigurationError(format!(
            "Unknown service '{}'. Available: {}",
            name,
            available_services().join(", ")
        ))),
    }
}

/// The artifact downloader that pairs with a service
pub fn create_fetcher(name: &str, config: &KilnConfig) -> Box<dyn BinaryFetcher> {
    match name {
        "mock" => Box::new(mock::MockFetcher),
        _ => Box::new(HttpFetcher::new(config.generation.request_timeout())),
    }
}

/// List all available service names
pub fn available_services() -> Vec<&'static str> {
    vec!["mock", "meshy"]
}
