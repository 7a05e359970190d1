use async_trait::async_trait;
use std::collections::HashMap;

use crate::{
    map_from_result, FhirPseudonymTransport, PseudonymClient, PseudonymClientConfig, Result,
};

/// MII backend: `$pseudonymize` (with explicit `allowCreate=true`) /
/// `$de-pseudonymize`.
pub struct MiiClient {
    transport: FhirPseudonymTransport,
}

impl MiiClient {
    pub fn new(http: reqwest::Client, config: PseudonymClientConfig) -> Self {
        Self {
            transport: FhirPseudonymTransport::new(http, config),
        }
    }
}

#[async_trait]
impl PseudonymClient for MiiClient {
    async fn pseudonymize(&self, values: HashMap<String, String>) -> HashMap<String, String> {
        if values.is_empty() {
            return HashMap::new();
        }
        let values: Vec<String> = values.into_values().collect();
        let result = self
            .transport
            .call("$pseudonymize", true, "original", &values)
            .await;
        map_from_result(result, false)
    }

    async fn depseudonymize(&self, values: HashMap<String, String>) -> HashMap<String, String> {
        if values.is_empty() {
            return HashMap::new();
        }
        let values: Vec<String> = values.into_values().collect();
        let result = self
            .transport
            .call("$de-pseudonymize", false, "pseudonym", &values)
            .await;
        map_from_result(result, true)
    }

    async fn test_connection(&self) -> Result<()> {
        self.transport.probe_metadata().await
    }
}
