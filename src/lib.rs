//! `dicomshield`: a transparent DICOM privacy proxy. Accepts DIMSE
//! associations from a client, relays ECHO/FIND/GET/MOVE/STORE to a
//! configured upstream PACS, and rewrites identifying attributes through an
//! external pseudonymization service in both directions.
//!
//! This crate wires together [`dimse`] (the wire protocol engine), [`shield`]
//! (the attribute-rewriting pipeline) and [`pseudonym`] (the FHIR client)
//! behind the two listener roles implemented in [`handlers`].

pub mod config;
pub mod handlers;

use std::sync::Arc;

use dicom_dictionary_std::uids;
use dimse::{AeHandler, DimseScp};
use shield::Shield;
use tokio_util::sync::CancellationToken;

use crate::config::{LogFormat, LoggingConfig, ProxyConfig};
use crate::handlers::{InternalHandler, ProxyState, PublicHandler};

/// Initializes the global `tracing` subscriber once, per the configured
/// level and format. Must be called exactly once, before any listener
/// starts.
pub fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&logging.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match logging.format {
        LogFormat::Json => {
            subscriber.json().init();
        }
        LogFormat::Pretty => {
            subscriber.init();
        }
    }
}

/// The abstract syntaxes the public listener negotiates: verification,
/// every storage class this relay carries, and both query/retrieve models
/// (Patient Root, Study Root) for FIND, MOVE and GET (§6).
fn public_abstract_syntaxes() -> Vec<String> {
    let mut syntaxes = vec![uids::VERIFICATION.to_string()];
    syntaxes.extend(dimse::types::STORAGE_ABSTRACT_SYNTAXES.iter().map(|s| s.to_string()));
    syntaxes.extend(
        [
            uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
            uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE,
            uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET,
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE,
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET,
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    syntaxes
}

/// The abstract syntaxes the internal C-STORE sink accepts: verification
/// (for diagnostics) and every storage class, nothing else (§6).
fn internal_abstract_syntaxes() -> Vec<String> {
    std::iter::once(uids::VERIFICATION.to_string())
        .chain(dimse::types::STORAGE_ABSTRACT_SYNTAXES.iter().map(|s| s.to_string()))
        .collect()
}

/// Runs the proxy to completion: startup health checks, then both
/// listeners until a shutdown signal arrives. Returns an error for any
/// failed health check or listener startup failure; the caller (main)
/// turns that into a non-zero exit per §6.
pub async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    let pseudonym_client = pseudonym::build_client(config.pseudonymization_server.clone())
        .map_err(|e| anyhow::anyhow!("failed to build pseudonym client: {e}"))?;

    tracing::info!("running startup health checks");
    health_check_upstream(&config).await?;
    pseudonym_client
        .test_connection()
        .await
        .map_err(|e| anyhow::anyhow!("pseudonym service health check failed: {e}"))?;
    tracing::info!("pseudonym service health check succeeded");

    let shield = Arc::new(Shield::new(pseudonym_client));
    let config = Arc::new(config);
    let state = Arc::new(ProxyState {
        config: Arc::clone(&config),
        shield,
    });

    let public_handler: Arc<dyn AeHandler> = Arc::new(PublicHandler {
        state: Arc::clone(&state),
    });
    let internal_handler: Arc<dyn AeHandler> = Arc::new(InternalHandler {
        state: Arc::clone(&state),
    });

    let public_scp = Arc::new(DimseScp::new(
        config.ingress_dimse_config(),
        public_abstract_syntaxes(),
        public_handler,
    ));
    let internal_scp = Arc::new(DimseScp::new(
        config.internal_dimse_config(),
        internal_abstract_syntaxes(),
        internal_handler,
    ));

    let shutdown = CancellationToken::new();
    let public_shutdown = shutdown.clone();
    let internal_shutdown = shutdown.clone();

    let public_task = tokio::spawn(async move { public_scp.run(public_shutdown).await });
    let internal_task = tokio::spawn(async move { internal_scp.run(internal_shutdown).await });

    tracing::info!(
        ingress_port = config.ingress.port,
        internal_port = config.c_store_endpoint.port,
        "dicomshield listening, press ctrl-c to shut down"
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("failed to listen for ctrl-c: {e}"))?;
    tracing::info!("shutting down");
    shutdown.cancel();

    if let Ok(Err(e)) = public_task.await {
        tracing::warn!(error = %e, "public listener exited with an error");
    }
    if let Ok(Err(e)) = internal_task.await {
        tracing::warn!(error = %e, "internal listener exited with an error");
    }

    tracing::info!("dicomshield shut down gracefully");
    Ok(())
}

async fn health_check_upstream(config: &ProxyConfig) -> anyhow::Result<()> {
    let target = config.upstream_target(&config.ingress.aet);
    match dimse::scu::echo(target, 1).await {
        Ok(status) if dimse::message::is_success(status) => {
            tracing::info!("upstream C-ECHO health check succeeded");
            Ok(())
        }
        Ok(status) => anyhow::bail!("upstream C-ECHO returned non-success status {status:#06x}"),
        Err(e) => anyhow::bail!("upstream C-ECHO health check failed: {e}"),
    }
}
