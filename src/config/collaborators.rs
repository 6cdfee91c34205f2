//! External service endpoints.

use std::time::Duration;

use serde::Deserialize;

/// Base URLs of the HTTP collaborators used by the billing daemon.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CollaboratorsConfig {
    pub payment_url: String,
    pub tax_url: String,
    pub email_url: String,
    pub inventory_url: String,
    pub catalog_url: String,
    pub request_timeout_secs: u64,
}

impl CollaboratorsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            payment_url: "http://localhost:8081".to_string(),
            tax_url: "http://localhost:8082".to_string(),
            email_url: "http://localhost:8083".to_string(),
            inventory_url: "http://localhost:8084".to_string(),
            catalog_url: "http://localhost:8085".to_string(),
            request_timeout_secs: 10,
        }
    }
}
