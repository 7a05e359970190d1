//! DIMSE handlers (component E): the state machines of §4.5, tying the
//! pseudonym client, shield, dataset queue, and upstream associator
//! together behind the two [`dimse::scp::AeHandler`] implementations that
//! back the public and internal listeners.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use dimse::error::status;
use dimse::scp::{AeHandler, RequestContext, ScpResponse};
use dimse::scu;
use dimse::{message, queue};
use shield::Shield;
use tokio::sync::mpsc;

use crate::config::ProxyConfig;

/// Shared state both handlers close over.
pub struct ProxyState {
    pub config: Arc<ProxyConfig>,
    pub shield: Arc<Shield>,
}

/// Monotonic, process-wide DIMSE message id generator. Every outbound
/// association this proxy opens (upstream FIND/MOVE/GET/STORE) stamps one
/// of these, and for MOVE/GET it doubles as the dataset queue's
/// correlation key (see [`dimse::message::move_request`]).
static NEXT_MESSAGE_ID: AtomicU32 = AtomicU32::new(1);

fn next_message_id() -> u16 {
    (NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed) % u16::MAX as u32) as u16 + 1
}

fn client_message_id(command: &InMemDicomObject) -> u16 {
    command
        .get(tags::MESSAGE_ID)
        .and_then(|e| e.to_int::<u16>().ok())
        .unwrap_or(1)
}

/// Handler backing the public listener: client-initiated ECHO/FIND/
/// MOVE/GET/STORE.
pub struct PublicHandler {
    pub state: Arc<ProxyState>,
}

#[async_trait]
impl AeHandler for PublicHandler {
    async fn handle(
        &self,
        ctx: RequestContext,
        command: InMemDicomObject,
        dataset: Option<InMemDicomObject>,
        responses: mpsc::Sender<ScpResponse>,
    ) {
        let span = tracing::info_span!(
            "dimse_operation",
            correlation_id = %ctx.correlation_id,
            calling_ae = %ctx.calling_ae_title,
        );
        let _enter = span.enter();

        let command_field = match dimse::scp::command_field_of(&command) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "could not read Command Field");
                return;
            }
        };

        match command_field {
            dimse::scp::C_ECHO_RQ => self.handle_echo(&command, responses).await,
            dimse::scp::C_FIND_RQ => self.handle_find(&command, dataset, responses).await,
            dimse::scp::C_MOVE_RQ => self.handle_move(&command, dataset, responses).await,
            dimse::scp::C_GET_RQ => self.handle_get(&command, dataset, responses).await,
            dimse::scp::C_STORE_RQ => self.handle_store(&command, dataset, responses).await,
            other => {
                tracing::warn!(command_field = other, "unsupported DIMSE command");
            }
        }
    }
}

impl PublicHandler {
    async fn handle_echo(&self, command: &InMemDicomObject, responses: mpsc::Sender<ScpResponse>) {
        let message_id = client_message_id(command);
        let affected_sop_class = dicom_dictionary_std::uids::VERIFICATION;
        let rsp = message::echo_response(message_id, affected_sop_class, status::SUCCESS);
        let _ = responses.send((rsp, None)).await;
    }

    async fn handle_find(
        &self,
        command: &InMemDicomObject,
        dataset: Option<InMemDicomObject>,
        responses: mpsc::Sender<ScpResponse>,
    ) {
        let message_id = client_message_id(command);
        let affected_sop_class = command
            .get(tags::AFFECTED_SOP_CLASS_UID)
            .and_then(|e| e.to_str().ok())
            .map(|s| s.into_owned())
            .unwrap_or_default();

        let Some(identifier) = dataset else {
            let _ = responses
                .send((
                    message::find_response(message_id, &affected_sop_class, status::FAILURE_PROTOCOL_ERROR, false),
                    None,
                ))
                .await;
            return;
        };

        let level = match message::read_query_retrieve_level(&identifier) {
            Ok(level) => level,
            Err(_) => {
                let _ = responses
                    .send((
                        message::find_response(message_id, &affected_sop_class, status::FAILURE_PROTOCOL_ERROR, false),
                        None,
                    ))
                    .await;
                return;
            }
        };

        let shielded = self.state.shield.shield_query(identifier).await;
        let target = self.state.config.upstream_target(&self.state.config.ingress.aet);
        let upstream_message_id = next_message_id();

        let mut upstream_rx = match scu::find(target, level, shielded.dataset, upstream_message_id).await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!(error = %e, "failed to start upstream C-FIND");
                let _ = responses
                    .send((
                        message::find_response(message_id, &affected_sop_class, e.status_code(), false),
                        None,
                    ))
                    .await;
                return;
            }
        };

        while let Some(result) = upstream_rx.recv().await {
            match result {
                Ok(scu::FindResult { status: s, identifier: Some(ds) }) => {
                    let shielded = self.state.shield.shield_retrieve(ds).await;
                    let rsp = message::find_response(message_id, &affected_sop_class, s, true);
                    if responses.send((rsp, Some(shielded.dataset))).await.is_err() {
                        return;
                    }
                }
                Ok(scu::FindResult { status: s, identifier: None }) => {
                    let _ = responses
                        .send((message::find_response(message_id, &affected_sop_class, s, false), None))
                        .await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "upstream C-FIND failed mid-stream");
                    let _ = responses
                        .send((
                            message::find_response(message_id, &affected_sop_class, e.status_code(), false),
                            None,
                        ))
                        .await;
                    return;
                }
            }
        }
    }

    async fn handle_move(
        &self,
        command: &InMemDicomObject,
        dataset: Option<InMemDicomObject>,
        responses: mpsc::Sender<ScpResponse>,
    ) {
        let message_id = client_message_id(command);
        let affected_sop_class = command
            .get(tags::AFFECTED_SOP_CLASS_UID)
            .and_then(|e| e.to_str().ok())
            .map(|s| s.into_owned())
            .unwrap_or_default();

        let move_destination = command
            .get(tags::MOVE_DESTINATION)
            .and_then(|e| e.to_str().ok())
            .map(|s| s.trim_end_matches('\0').to_string())
            .unwrap_or_default();

        let Some(destination) = self.state.config.resolve_move_destination(&move_destination) else {
            tracing::warn!(%move_destination, "MOVE destination not in ALLOWED_AET, rejecting without contacting upstream");
            let _ = responses
                .send((
                    message::move_response(message_id, &affected_sop_class, status::FAILURE_PROTOCOL_ERROR, 0, 0, 0, 0),
                    None,
                ))
                .await;
            return;
        };
        let destination = destination.clone();

        let Some(identifier) = dataset else {
            let _ = responses
                .send((
                    message::move_response(message_id, &affected_sop_class, status::FAILURE_PROTOCOL_ERROR, 0, 0, 0, 0),
                    None,
                ))
                .await;
            return;
        };
        let level = match message::read_query_retrieve_level(&identifier) {
            Ok(level) => level,
            Err(_) => {
                let _ = responses
                    .send((
                        message::move_response(message_id, &affected_sop_class, status::FAILURE_PROTOCOL_ERROR, 0, 0, 0, 0),
                        None,
                    ))
                    .await;
                return;
            }
        };

        let shielded = self.state.shield.shield_query(identifier).await;
        let upstream_target = self.state.config.upstream_target(&self.state.config.ingress.aet);
        let correlation_id = next_message_id();
        let mut queue_rx = queue::register(correlation_id, self.state.config.queue_capacity);

        let move_future = scu::move_to(
            upstream_target,
            level,
            shielded.dataset,
            correlation_id,
            self.state.config.c_store_endpoint.aet.clone(),
            self.state.config.ingress.aet.clone(),
        );
        tokio::pin!(move_future);

        let store_target = dimse::associator::UpstreamTarget {
            host: destination.ip.clone(),
            port: destination.port,
            called_aet: move_destination.clone(),
            calling_aet: self.state.config.c_store_endpoint.aet.clone(),
            max_pdu: upstream_target_max_pdu(&self.state.config),
        };

        let mut completed = 0u16;
        let mut failed = 0u16;
        let outcome = loop {
            tokio::select! {
                maybe_item = queue_rx.recv() => {
                    match maybe_item {
                        Some(ds) => {
                            let shielded = self.state.shield.shield_retrieve(ds).await;
                            if !relay_to_destination(&store_target, shielded.dataset, &mut completed, &mut failed).await {
                                tracing::warn!("failed to forward moved instance to destination");
                            }
                            let _ = responses
                                .send((
                                    message::move_response(message_id, &affected_sop_class, status::PENDING, 0, completed, failed, 0),
                                    None,
                                ))
                                .await;
                        }
                        None => {}
                    }
                }
                result = &mut move_future => {
                    break result;
                }
            }
        };

        // Drain anything that arrived between the upstream's terminal
        // response and our last poll of the queue.
        while let Ok(ds) = queue_rx.try_recv() {
            let shielded = self.state.shield.shield_retrieve(ds).await;
            let _ = relay_to_destination(&store_target, shielded.dataset, &mut completed, &mut failed).await;
        }
        queue::deregister(correlation_id);

        let final_status = match outcome {
            Ok(outcome) => outcome.status,
            Err(e) => {
                tracing::error!(error = %e, "upstream C-MOVE failed");
                e.status_code()
            }
        };
        let _ = responses
            .send((
                message::move_response(message_id, &affected_sop_class, final_status, 0, completed, failed, 0),
                None,
            ))
            .await;
    }

    /// C-GET is implemented via the same internal-listener indirection as
    /// C-MOVE, since this upstream association's client-side cannot
    /// negotiate the SCP-role extended negotiation a genuine same-
    /// association C-GET sub-operation delivery would need. Sub-operation
    /// instances are relayed inline to this association instead of to a
    /// separate destination.
    async fn handle_get(
        &self,
        command: &InMemDicomObject,
        dataset: Option<InMemDicomObject>,
        responses: mpsc::Sender<ScpResponse>,
    ) {
        let message_id = client_message_id(command);
        let affected_sop_class = command
            .get(tags::AFFECTED_SOP_CLASS_UID)
            .and_then(|e| e.to_str().ok())
            .map(|s| s.into_owned())
            .unwrap_or_default();

        let Some(identifier) = dataset else {
            let _ = responses
                .send((
                    message::get_response(message_id, &affected_sop_class, status::FAILURE_PROTOCOL_ERROR, 0, 0, 0, 0, false),
                    None,
                ))
                .await;
            return;
        };
        let level = match message::read_query_retrieve_level(&identifier) {
            Ok(level) => level,
            Err(_) => {
                let _ = responses
                    .send((
                        message::get_response(message_id, &affected_sop_class, status::FAILURE_PROTOCOL_ERROR, 0, 0, 0, 0, false),
                        None,
                    ))
                    .await;
                return;
            }
        };

        let shielded = self.state.shield.shield_query(identifier).await;
        let upstream_target = self.state.config.upstream_target(&self.state.config.ingress.aet);
        let correlation_id = next_message_id();
        let mut queue_rx = queue::register(correlation_id, self.state.config.queue_capacity);

        let move_future = scu::move_to(
            upstream_target,
            level,
            shielded.dataset,
            correlation_id,
            self.state.config.c_store_endpoint.aet.clone(),
            self.state.config.ingress.aet.clone(),
        );
        tokio::pin!(move_future);

        let mut completed = 0u16;
        let outcome = loop {
            tokio::select! {
                maybe_item = queue_rx.recv() => {
                    if let Some(ds) = maybe_item {
                        let shielded = self.state.shield.shield_retrieve(ds).await;
                        completed += 1;
                        let rsp = message::get_response(message_id, &affected_sop_class, status::PENDING, 0, completed, 0, 0, true);
                        if responses.send((rsp, Some(shielded.dataset))).await.is_err() {
                            queue::deregister(correlation_id);
                            return;
                        }
                    }
                }
                result = &mut move_future => {
                    break result;
                }
            }
        };

        while let Ok(ds) = queue_rx.try_recv() {
            let shielded = self.state.shield.shield_retrieve(ds).await;
            completed += 1;
            let rsp = message::get_response(message_id, &affected_sop_class, status::PENDING, 0, completed, 0, 0, true);
            let _ = responses.send((rsp, Some(shielded.dataset))).await;
        }
        queue::deregister(correlation_id);

        let final_status = match outcome {
            Ok(outcome) => outcome.status,
            Err(e) => {
                tracing::error!(error = %e, "upstream C-GET failed");
                e.status_code()
            }
        };
        let _ = responses
            .send((
                message::get_response(message_id, &affected_sop_class, final_status, 0, completed, 0, 0, false),
                None,
            ))
            .await;
    }

    async fn handle_store(
        &self,
        command: &InMemDicomObject,
        dataset: Option<InMemDicomObject>,
        responses: mpsc::Sender<ScpResponse>,
    ) {
        let message_id = client_message_id(command);
        let sop_class = command
            .get(tags::AFFECTED_SOP_CLASS_UID)
            .and_then(|e| e.to_str().ok())
            .map(|s| s.into_owned())
            .unwrap_or_default();
        let sop_instance = command
            .get(tags::AFFECTED_SOP_INSTANCE_UID)
            .and_then(|e| e.to_str().ok())
            .map(|s| s.into_owned())
            .unwrap_or_default();

        let Some(dataset) = dataset else {
            let _ = responses
                .send((
                    message::store_response(message_id, &sop_class, &sop_instance, status::FAILURE_PROTOCOL_ERROR),
                    None,
                ))
                .await;
            return;
        };

        let dataset = self.state.shield.shield_store(dataset);
        let target = self.state.config.upstream_target(&self.state.config.ingress.aet);
        let upstream_message_id = next_message_id();

        let result = scu::store(target, dataset, sop_class.clone(), sop_instance.clone(), upstream_message_id).await;
        let status_code = match result {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "upstream C-STORE failed");
                e.status_code()
            }
        };
        let _ = responses
            .send((message::store_response(message_id, &sop_class, &sop_instance, status_code), None))
            .await;
    }
}

fn upstream_target_max_pdu(config: &ProxyConfig) -> u32 {
    config.ingress_dimse_config().max_pdu
}

/// Forwards one pseudonymized dataset to the client's declared move
/// destination over a fresh single-instance C-STORE association.
async fn relay_to_destination(
    target: &dimse::associator::UpstreamTarget,
    dataset: InMemDicomObject,
    completed: &mut u16,
    failed: &mut u16,
) -> bool {
    let sop_class = dataset
        .get(tags::SOP_CLASS_UID)
        .and_then(|e| e.to_str().ok())
        .map(|s| s.into_owned())
        .unwrap_or_default();
    let sop_instance = dataset
        .get(tags::SOP_INSTANCE_UID)
        .and_then(|e| e.to_str().ok())
        .map(|s| s.into_owned())
        .unwrap_or_default();
    let message_id = next_message_id();

    match scu::store(target.clone(), dataset, sop_class, sop_instance, message_id).await {
        Ok(status_code) if message::is_success(status_code) => {
            *completed += 1;
            true
        }
        Ok(_) => {
            *failed += 1;
            false
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to relay instance to move destination");
            *failed += 1;
            false
        }
    }
}

/// Handler backing the internal listener: upstream-initiated C-STORE
/// sub-operations arriving as part of a C-MOVE/C-GET this proxy issued.
pub struct InternalHandler {
    pub state: Arc<ProxyState>,
}

#[async_trait]
impl AeHandler for InternalHandler {
    async fn handle(
        &self,
        _ctx: RequestContext,
        command: InMemDicomObject,
        dataset: Option<InMemDicomObject>,
        responses: mpsc::Sender<ScpResponse>,
    ) {
        let message_id = client_message_id(&command);
        let sop_class = command
            .get(tags::AFFECTED_SOP_CLASS_UID)
            .and_then(|e| e.to_str().ok())
            .map(|s| s.into_owned())
            .unwrap_or_default();
        let sop_instance = command
            .get(tags::AFFECTED_SOP_INSTANCE_UID)
            .and_then(|e| e.to_str().ok())
            .map(|s| s.into_owned())
            .unwrap_or_default();

        let Some(dataset) = dataset else {
            let _ = responses
                .send((
                    message::store_response(message_id, &sop_class, &sop_instance, status::FAILURE_PROTOCOL_ERROR),
                    None,
                ))
                .await;
            return;
        };

        match message::read_move_originator_message_id(&command) {
            Some(correlation_id) => match queue::lookup(correlation_id) {
                Some(sender) => {
                    // Shielding happens once, in the MOVE/GET relay loop that
                    // drains this queue — not here, to avoid pseudonymizing
                    // an already-pseudonymized value.
                    if sender.send(dataset).await.is_err() {
                        tracing::warn!(correlation_id, "dataset queue receiver already gone, dropping sub-operation");
                    }
                }
                None => {
                    tracing::warn!(correlation_id, "no dataset queue registered for this MOVE, dropping sub-operation");
                }
            },
            None => {
                tracing::warn!("internal C-STORE sub-operation without a MoveOriginatorMessageID, dropping");
            }
        }

        let _ = responses
            .send((message::store_response(message_id, &sop_class, &sop_instance, status::SUCCESS), None))
            .await;
    }
}

