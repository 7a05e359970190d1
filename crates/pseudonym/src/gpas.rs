use async_trait::async_trait;
use std::collections::HashMap;

use crate::{
    map_from_result, FhirPseudonymTransport, PseudonymClient, PseudonymClientConfig, Result,
};

/// gPAS backend: `$pseudonymizeAllowCreate` / `$dePseudonymize`, no explicit
/// `allowCreate` parameter (creation is implied by the endpoint name itself).
pub struct GPasClient {
    transport: FhirPseudonymTransport,
}

impl GPasClient {
    pub fn new(http: reqwest::Client, config: PseudonymClientConfig) -> Self {
        Self {
            transport: FhirPseudonymTransport::new(http, config),
        }
    }
}

#[async_trait]
impl PseudonymClient for GPasClient {
    async fn pseudonymize(&self, values: HashMap<String, String>) -> HashMap<String, String> {
        if values.is_empty() {
            return HashMap::new();
        }
        let values: Vec<String> = values.into_values().collect();
        let result = self
            .transport
            .call("$pseudonymizeAllowCreate", false, "original", &values)
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
            .call("$dePseudonymize", false, "pseudonym", &values)
            .await;
        map_from_result(result, true)
    }

    async fn test_connection(&self) -> Result<()> {
        self.transport.probe_metadata().await
    }
}
