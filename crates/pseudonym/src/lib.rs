//! Client library for FHIR `Parameters`-based pseudonymization services.
//!
//! Two concrete backends are supported — gPAS and MII — which differ only in
//! endpoint names and whether `allowCreate` is sent explicitly. Both speak
//! the same wire format: an `application/fhir+xml` `Parameters` resource in,
//! a `Parameters` resource of `(original, pseudonym)` pairs out.

mod config;
mod error;
mod fhir;
mod gpas;
mod mii;

pub use config::{PseudonymClientConfig, PseudonymClientType};
pub use error::{PseudonymError, Result};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A batch pseudonym lookup/creation service.
///
/// Implementations must honor the empty-in/empty-out guarantee: calling
/// either method with an empty map must return an empty map without
/// contacting the remote service.
#[async_trait]
pub trait PseudonymClient: Send + Sync {
    /// Requests pseudonyms for the given original values, creating them if
    /// the service doesn't already know them. Returns `{original -> pseudonym}`.
    async fn pseudonymize(&self, values: HashMap<String, String>) -> HashMap<String, String>;

    /// Requests originals for the given pseudonym values. Unknown pseudonyms
    /// are silently absent from the result. Returns `{pseudonym -> original}`.
    async fn depseudonymize(&self, values: HashMap<String, String>) -> HashMap<String, String>;

    /// Probes the service's FHIR `/metadata` endpoint. Used as a startup
    /// health check; any transport error or non-success status is a failure.
    async fn test_connection(&self) -> Result<()>;
}

/// Builds the configured client variant.
pub fn build_client(config: PseudonymClientConfig) -> Result<Arc<dyn PseudonymClient>> {
    let http = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()
        .map_err(PseudonymError::Transport)?;

    match config.client_type {
        PseudonymClientType::GPas => Ok(Arc::new(gpas::GPasClient::new(http, config))),
        PseudonymClientType::Mii => Ok(Arc::new(mii::MiiClient::new(http, config))),
    }
}

/// Shared request/response plumbing used by both backends. Each backend only
/// supplies the endpoint names and the `allowCreate` policy for pseudonymize.
pub(crate) struct FhirPseudonymTransport {
    pub(crate) http: reqwest::Client,
    pub(crate) config: PseudonymClientConfig,
}

impl FhirPseudonymTransport {
    pub(crate) fn new(http: reqwest::Client, config: PseudonymClientConfig) -> Self {
        Self { http, config }
    }

    fn request_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.config.endpoint_url.trim_end_matches('/'),
            endpoint
        )
    }

    fn apply_auth(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> reqwest::RequestBuilder {
        match self.config.basic_auth() {
            Some((user, password)) => builder.basic_auth(user, password),
            None => builder,
        }
    }

    /// Runs one batch call against `endpoint`, mapping `value_param_name` ->
    /// values in the request and returning the `(original, pseudonym)` pairs
    /// the service reported back.
    async fn call(
        &self,
        endpoint: &str,
        allow_create: bool,
        value_param_name: &str,
        values: &[String],
    ) -> Result<Vec<(String, String)>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }

        let body = fhir::build_parameters_xml(
            &self.config.domain,
            allow_create,
            value_param_name,
            values,
        )?;

        let request = self
            .http
            .post(self.request_url(endpoint))
            .header("Content-Type", "application/fhir+xml")
            .body(body);
        let request = self.apply_auth(request);

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, endpoint, "pseudonym service request failed");
                return Err(PseudonymError::Transport(e));
            }
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            tracing::error!(status, endpoint, "pseudonym service returned error status");
            return Err(PseudonymError::Http { status });
        }

        let text = response.text().await.map_err(PseudonymError::Transport)?;
        fhir::parse_parameter_pairs(&text)
    }

    async fn probe_metadata(&self) -> Result<()> {
        let request = self.apply_auth(self.http.get(self.request_url("metadata")));
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(PseudonymError::Http {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Turns a batch result into the map the public API promises, logging (but
/// not propagating) failures per the fail-closed policy: a failed call is
/// indistinguishable from "the service knows nothing about these values".
pub(crate) fn map_from_result(
    result: Result<Vec<(String, String)>>,
    invert: bool,
) -> HashMap<String, String> {
    match result {
        Ok(pairs) => pairs
            .into_iter()
            .map(|(orig, pseudo)| if invert { (pseudo, orig) } else { (orig, pseudo) })
            .collect(),
        Err(e) => {
            tracing::error!(error = %e, "pseudonym service call failed, returning empty mapping");
            HashMap::new()
        }
    }
}
