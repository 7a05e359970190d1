//! Inbound DIMSE listeners (component F): both the public entry point and
//! the internal C-STORE receiver are instances of the same `DimseScp`,
//! configured with a different accepted abstract-syntax set and a
//! different [`AeHandler`]. The wire handling below follows the same
//! PDV-accumulation loop the reference store SCP uses, generalized to any
//! of the five DIMSE verbs and to a streamed sequence of responses instead
//! of exactly one.

use std::net::TcpStream as StdTcpStream;
use std::sync::Arc;

use async_trait::async_trait;
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use dicom_ul::association::server::ServerAssociationOptions;
use dicom_ul::pdu::{PDataValue, PDataValueType};
use dicom_ul::Pdu;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::associator;
use crate::config::DimseConfig;
use crate::error::{DimseError, Result};
use crate::message::command_field;

/// Everything a handler needs to know about the association a request
/// arrived on, without exposing the association itself (responses go back
/// through the channel handed to [`AeHandler::handle`]).
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: Uuid,
    pub peer_addr: String,
    pub calling_ae_title: String,
    pub transfer_syntax: String,
}

/// One pending or terminal response: the command dataset, and the data
/// dataset it carries (if any), encoded in the request's negotiated
/// transfer syntax by the caller when it sends them.
pub type ScpResponse = (InMemDicomObject, Option<InMemDicomObject>);

/// Implemented once per listener role (public vs. internal) to dispatch a
/// fully-assembled inbound DIMSE request. Responses are streamed back
/// through `responses` as they're ready — for C-ECHO/C-STORE this is
/// exactly one send; for C-FIND/C-MOVE it is one send per pending match
/// plus a final terminal status.
#[async_trait]
pub trait AeHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: RequestContext,
        command: InMemDicomObject,
        dataset: Option<InMemDicomObject>,
        responses: mpsc::Sender<ScpResponse>,
    );
}

pub struct DimseScp {
    config: DimseConfig,
    accepted_abstract_syntaxes: Vec<String>,
    handler: Arc<dyn AeHandler>,
}

impl DimseScp {
    pub fn new(config: DimseConfig, accepted_abstract_syntaxes: Vec<String>, handler: Arc<dyn AeHandler>) -> Self {
        Self {
            config,
            accepted_abstract_syntaxes,
            handler,
        }
    }

    /// Runs the accept loop until `shutdown` is cancelled. Each accepted
    /// TCP connection is handed to its own blocking task so `dicom-ul`'s
    /// synchronous association API never blocks the Tokio runtime.
    pub async fn run(self: Arc<Self>, shutdown: tokio_util::sync::CancellationToken) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.bind_addr, self.config.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(DimseError::Network)?;
        tracing::info!(addr = %bind_addr, ae_title = %self.config.local_aet, "DIMSE listener bound");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(addr = %bind_addr, "DIMSE listener shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (socket, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to accept DIMSE connection");
                            continue;
                        }
                    };
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = this.serve(socket, peer_addr).await {
                            tracing::warn!(error = %e, %peer_addr, "DIMSE association ended with error");
                        }
                    });
                }
            }
        }
    }

    async fn serve(&self, socket: tokio::net::TcpStream, peer_addr: std::net::SocketAddr) -> Result<()> {
        let std_stream: StdTcpStream = socket.into_std().map_err(DimseError::Network)?;
        std_stream.set_nonblocking(false).map_err(DimseError::Network)?;

        let correlation_id = Uuid::new_v4();
        let local_aet = self.config.local_aet.clone();
        let abstract_syntaxes = self.accepted_abstract_syntaxes.clone();
        let handler = Arc::clone(&self.handler);
        let rt = Handle::current();

        let span = tracing::info_span!("dimse_association", correlation_id = %correlation_id, %peer_addr);
        let _enter = span.enter();

        tokio::task::spawn_blocking(move || {
            serve_blocking(std_stream, peer_addr, local_aet, abstract_syntaxes, handler, rt, correlation_id)
        })
        .await
        .map_err(|e| DimseError::operation_failed(format!("association task panicked: {e}")))?
    }
}

fn serve_blocking(
    stream: StdTcpStream,
    peer_addr: std::net::SocketAddr,
    local_aet: String,
    abstract_syntaxes: Vec<String>,
    handler: Arc<dyn AeHandler>,
    rt: Handle,
    correlation_id: Uuid,
) -> Result<()> {
    let mut options = ServerAssociationOptions::new()
        .accept_any()
        .ae_title(local_aet)
        .promiscuous(true);

    for uid in &abstract_syntaxes {
        options = options.with_abstract_syntax(uid.clone());
    }
    for ts in TransferSyntaxRegistry.iter() {
        if !ts.is_unsupported() {
            options = options.with_transfer_syntax(ts.uid());
        }
    }

    let mut association = options
        .establish(stream)
        .map_err(|e| DimseError::AssociationRejected(e.to_string()))?;
    let calling_ae_title = association.client_ae_title().to_string();
    tracing::info!(%calling_ae_title, "association established");

    let mut instance_buffer: Vec<u8> = Vec::with_capacity(1024 * 1024);
    let mut pending_command: Option<InMemDicomObject> = None;

    loop {
        let pdu = match association.receive() {
            Ok(pdu) => pdu,
            Err(e) => {
                tracing::info!(error = %e, "association receive ended");
                return Ok(());
            }
        };

        match pdu {
            Pdu::PData { data } => {
                for value in data {
                    match value.value_type {
                        PDataValueType::Command if value.is_last => {
                            let command = InMemDicomObject::read_dataset_with_ts(
                                value.data.as_slice(),
                                associator::command_transfer_syntax(),
                            )
                            .map_err(|e| DimseError::DicomObject(e.to_string()))?;

                            let has_data_set = command
                                .get(tags::COMMAND_DATA_SET_TYPE)
                                .and_then(|e| e.to_int::<u16>().ok())
                                .map(|v| v != 0x0101)
                                .unwrap_or(false);

                            if has_data_set {
                                // The accompanying data set arrives in a
                                // later PDV; hold the command until it does.
                                pending_command = Some(command);
                                continue;
                            }

                            let pc = association
                                .presentation_contexts()
                                .first()
                                .ok_or_else(|| DimseError::ProtocolViolation("no presentation context".into()))?;
                            let ctx = RequestContext {
                                correlation_id,
                                peer_addr: peer_addr.to_string(),
                                calling_ae_title: calling_ae_title.clone(),
                                transfer_syntax: pc.transfer_syntax.clone(),
                            };
                            let pc_id = pc.id;
                            dispatch_and_reply(&mut association, &handler, &rt, ctx, pc_id, command, None)?;
                        }
                        PDataValueType::Command => {
                            // Multi-fragment commands aren't used by any
                            // verb this proxy handles; nothing to buffer.
                        }
                        PDataValueType::Data if value.is_last => {
                            instance_buffer.extend_from_slice(&value.data);

                            let command = pending_command.take().ok_or_else(|| {
                                DimseError::ProtocolViolation("data set arrived without a preceding command".into())
                            })?;

                            let pc = association
                                .presentation_contexts()
                                .iter()
                                .find(|pc| pc.id == value.presentation_context_id)
                                .ok_or_else(|| DimseError::ProtocolViolation("missing presentation context".into()))?
                                .clone();
                            let ts = TransferSyntaxRegistry
                                .get(&pc.transfer_syntax)
                                .ok_or_else(|| DimseError::ProtocolViolation("unsupported transfer syntax".into()))?;

                            let dataset = InMemDicomObject::read_dataset_with_ts(
                                instance_buffer.as_slice(),
                                ts,
                            )
                            .map_err(|e| DimseError::DicomObject(e.to_string()))?;
                            instance_buffer.clear();

                            let ctx = RequestContext {
                                correlation_id,
                                peer_addr: peer_addr.to_string(),
                                calling_ae_title: calling_ae_title.clone(),
                                transfer_syntax: pc.transfer_syntax.clone(),
                            };
                            dispatch_and_reply(&mut association, &handler, &rt, ctx, pc.id, command, Some(dataset))?;
                        }
                        PDataValueType::Data => {
                            instance_buffer.extend_from_slice(&value.data);
                        }
                    }
                }
            }
            Pdu::ReleaseRQ => {
                let _ = association.send(&Pdu::ReleaseRP);
                tracing::info!("association released");
                return Ok(());
            }
            Pdu::AbortRQ { source } => {
                tracing::info!(?source, "association aborted by peer");
                return Ok(());
            }
            other => {
                tracing::warn!(?other, "unexpected PDU, ignoring");
            }
        }
    }
}

/// Dispatches one fully-assembled request to the handler (spawned as a
/// concurrent task on the shared runtime) and writes back each response it
/// streams through the channel, in order, until the channel closes.
fn dispatch_and_reply(
    association: &mut dicom_ul::association::server::ServerAssociation<StdTcpStream>,
    handler: &Arc<dyn AeHandler>,
    rt: &Handle,
    ctx: RequestContext,
    pc_id: u8,
    command: InMemDicomObject,
    dataset: Option<InMemDicomObject>,
) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<ScpResponse>(8);
    let handler = Arc::clone(handler);
    let ts = ctx.transfer_syntax.clone();
    rt.spawn(async move {
        handler.handle(ctx, command, dataset, tx).await;
    });

    let data_ts = TransferSyntaxRegistry
        .get(&ts)
        .ok_or_else(|| DimseError::ProtocolViolation("unsupported transfer syntax".into()))?;

    while let Some((response_command, response_dataset)) = rt.block_on(rx.recv()) {
        let command_is_last = response_dataset.is_none();
        let mut cmd_bytes = Vec::with_capacity(128);
        response_command
            .write_dataset_with_ts(&mut cmd_bytes, associator::command_transfer_syntax())
            .map_err(|e| DimseError::DicomObject(e.to_string()))?;
        association
            .send(&Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: pc_id,
                    value_type: PDataValueType::Command,
                    is_last: command_is_last,
                    data: cmd_bytes,
                }],
            })
            .map_err(|e| DimseError::DicomUl(e.to_string()))?;

        if let Some(response_dataset) = response_dataset {
            let mut data_bytes = Vec::with_capacity(4096);
            response_dataset
                .write_dataset_with_ts(&mut data_bytes, data_ts)
                .map_err(|e| DimseError::DicomObject(e.to_string()))?;
            association
                .send(&Pdu::PData {
                    data: vec![PDataValue {
                        presentation_context_id: pc_id,
                        value_type: PDataValueType::Data,
                        is_last: true,
                        data: data_bytes,
                    }],
                })
                .map_err(|e| DimseError::DicomUl(e.to_string()))?;
        }
    }

    Ok(())
}

/// Returns the DIMSE command field out of an assembled command dataset,
/// used by callers that need to branch on verb before building a handler
/// context (kept here so `scp` and `handlers` agree on the mapping).
pub fn command_field_of(command: &InMemDicomObject) -> Result<u16> {
    command
        .get(tags::COMMAND_FIELD)
        .ok_or_else(|| DimseError::ProtocolViolation("missing Command Field".into()))?
        .to_int::<u16>()
        .map_err(|e| DimseError::ProtocolViolation(format!("malformed Command Field: {e}")))
}

/// Re-exported so callers constructing a [`RequestContext`] match request
/// command fields against the same constants `message` uses.
pub use command_field::*;
