//! Upstream SCU operations: the blocking `dicom-ul` client association API
//! bridged into this crate's async surface via `spawn_blocking`, following
//! the same command/identifier PDU exchange the reference SCU tools use.

use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use dicom_ul::pdu::{PDataValue, PDataValueType};
use dicom_ul::Pdu;
use tokio::sync::mpsc;

use crate::associator::{self, UpstreamAssociation, UpstreamTarget};
use crate::error::{DimseError, Result};
use crate::message;
use crate::types::{AssociatorAction, QueryRetrieveLevel};

/// One response in a C-FIND conversation: the status code and, for pending
/// responses, the matching identifier dataset.
#[derive(Debug)]
pub struct FindResult {
    pub status: u16,
    pub identifier: Option<InMemDicomObject>,
}

/// The terminal outcome of a C-MOVE command exchange. The moved instances
/// themselves arrive separately via the internal C-STORE listener and the
/// dataset queue; this only reflects the upstream's own progress counters.
#[derive(Debug)]
pub struct MoveOutcome {
    pub status: u16,
    pub remaining: u16,
    pub completed: u16,
    pub failed: u16,
    pub warning: u16,
}

/// Sends a C-ECHO and returns the status the upstream reported.
pub async fn echo(target: UpstreamTarget, message_id: u16) -> Result<u16> {
    tokio::task::spawn_blocking(move || echo_blocking(&target, message_id))
        .await
        .map_err(|e| DimseError::operation_failed(format!("echo task panicked: {e}")))?
}

fn echo_blocking(target: &UpstreamTarget, message_id: u16) -> Result<u16> {
    let mut upstream = associator::establish_for_echo(target)?;
    let command = message::echo_request(message_id, dicom_dictionary_std::uids::VERIFICATION);
    send_command(&mut upstream, &command, None)?;
    let (cmd, _) = receive_response(&mut upstream)?;
    let status = message::read_status(&cmd)?;
    release(upstream);
    Ok(status)
}

/// Sends a C-FIND, streaming each response back through the returned
/// channel as it arrives so the caller can relay pending matches to its own
/// client incrementally.
pub async fn find(
    target: UpstreamTarget,
    level: QueryRetrieveLevel,
    identifier: InMemDicomObject,
    message_id: u16,
) -> Result<mpsc::Receiver<Result<FindResult>>> {
    let (tx, rx) = mpsc::channel(16);
    tokio::task::spawn_blocking(move || {
        let outcome = find_blocking(&target, level, identifier, message_id, &tx);
        if let Err(e) = outcome {
            let _ = tx.blocking_send(Err(e));
        }
    });
    Ok(rx)
}

fn find_blocking(
    target: &UpstreamTarget,
    level: QueryRetrieveLevel,
    identifier: InMemDicomObject,
    message_id: u16,
    tx: &mpsc::Sender<Result<FindResult>>,
) -> Result<()> {
    let abstract_syntax = crate::types::model_abstract_syntax(level, AssociatorAction::Find);
    let mut upstream = associator::establish_for_query(target, level, AssociatorAction::Find)?;

    let command = message::find_request(message_id, abstract_syntax);
    send_command(&mut upstream, &command, Some(&identifier))?;

    loop {
        let (cmd, data) = receive_response(&mut upstream)?;
        let response_status = message::read_status(&cmd)?;

        if message::is_pending(response_status) {
            let identifier = data.ok_or_else(|| {
                DimseError::ProtocolViolation("C-FIND pending response carried no identifier".into())
            })?;
            if tx
                .blocking_send(Ok(FindResult {
                    status: response_status,
                    identifier: Some(identifier),
                }))
                .is_err()
            {
                // receiver dropped (client gone); abort the upstream cleanly.
                let _ = upstream.association.abort();
                return Ok(());
            }
        } else {
            let _ = tx.blocking_send(Ok(FindResult {
                status: response_status,
                identifier: None,
            }));
            break;
        }
    }

    release(upstream);
    Ok(())
}

/// Sends a C-GET, streaming each response back through the returned channel
/// as it arrives: pending responses carry the retrieved instance inline on
/// this same association, unlike C-MOVE's separate sub-association delivery.
pub async fn get(
    target: UpstreamTarget,
    level: QueryRetrieveLevel,
    identifier: InMemDicomObject,
    message_id: u16,
) -> Result<mpsc::Receiver<Result<FindResult>>> {
    let (tx, rx) = mpsc::channel(16);
    tokio::task::spawn_blocking(move || {
        let outcome = get_blocking(&target, level, identifier, message_id, &tx);
        if let Err(e) = outcome {
            let _ = tx.blocking_send(Err(e));
        }
    });
    Ok(rx)
}

fn get_blocking(
    target: &UpstreamTarget,
    level: QueryRetrieveLevel,
    identifier: InMemDicomObject,
    message_id: u16,
    tx: &mpsc::Sender<Result<FindResult>>,
) -> Result<()> {
    let abstract_syntax = crate::types::model_abstract_syntax(level, AssociatorAction::Get);
    let mut upstream = associator::establish_for_query(target, level, AssociatorAction::Get)?;

    let command = message::get_request(message_id, abstract_syntax);
    send_command(&mut upstream, &command, Some(&identifier))?;

    loop {
        let (cmd, data) = receive_response(&mut upstream)?;
        let response_status = message::read_status(&cmd)?;

        if message::is_pending(response_status) {
            if tx
                .blocking_send(Ok(FindResult {
                    status: response_status,
                    identifier: data,
                }))
                .is_err()
            {
                let _ = upstream.association.abort();
                return Ok(());
            }
        } else {
            let _ = tx.blocking_send(Ok(FindResult {
                status: response_status,
                identifier: None,
            }));
            break;
        }
    }

    release(upstream);
    Ok(())
}

/// Sends a C-MOVE with move destination `L` (the internal listener's AE
/// title), stamping `originator_aet`/`message_id` as the MoveOriginator
/// fields so sub-operation C-STOREs can be routed back to this call's
/// queue. Returns once the upstream reports a terminal (non-pending)
/// status; callers drain the queue independently.
pub async fn move_to(
    target: UpstreamTarget,
    level: QueryRetrieveLevel,
    identifier: InMemDicomObject,
    message_id: u16,
    move_destination: String,
    originator_aet: String,
) -> Result<MoveOutcome> {
    tokio::task::spawn_blocking(move || {
        move_blocking(&target, level, identifier, message_id, &move_destination, &originator_aet)
    })
    .await
    .map_err(|e| DimseError::operation_failed(format!("move task panicked: {e}")))?
}

fn move_blocking(
    target: &UpstreamTarget,
    level: QueryRetrieveLevel,
    identifier: InMemDicomObject,
    message_id: u16,
    move_destination: &str,
    originator_aet: &str,
) -> Result<MoveOutcome> {
    let abstract_syntax = crate::types::model_abstract_syntax(level, AssociatorAction::Move);
    let mut upstream = associator::establish_for_query(target, level, AssociatorAction::Move)?;

    let command = message::move_request(message_id, abstract_syntax, move_destination, originator_aet);
    send_command(&mut upstream, &command, Some(&identifier))?;

    loop {
        let (cmd, _) = receive_response(&mut upstream)?;
        let response_status = message::read_status(&cmd)?;
        if message::is_pending(response_status) {
            continue;
        }

        let outcome = MoveOutcome {
            status: response_status,
            remaining: read_u16(&cmd, tags::NUMBER_OF_REMAINING_SUB_OPERATIONS),
            completed: read_u16(&cmd, tags::NUMBER_OF_COMPLETED_SUB_OPERATIONS),
            failed: read_u16(&cmd, tags::NUMBER_OF_FAILED_SUB_OPERATIONS),
            warning: read_u16(&cmd, tags::NUMBER_OF_WARNING_SUB_OPERATIONS),
        };
        release(upstream);
        return Ok(outcome);
    }
}

/// Sends a single C-STORE for an already-shielded dataset.
pub async fn store(
    target: UpstreamTarget,
    dataset: InMemDicomObject,
    sop_class: String,
    sop_instance: String,
    message_id: u16,
) -> Result<u16> {
    tokio::task::spawn_blocking(move || {
        store_blocking(&target, dataset, &sop_class, &sop_instance, message_id)
    })
    .await
    .map_err(|e| DimseError::operation_failed(format!("store task panicked: {e}")))?
}

fn store_blocking(
    target: &UpstreamTarget,
    dataset: InMemDicomObject,
    sop_class: &str,
    sop_instance: &str,
    message_id: u16,
) -> Result<u16> {
    let mut upstream = associator::establish_for_store(target, sop_class)?;
    let command = message::store_request(message_id, sop_class, sop_instance);
    send_command(&mut upstream, &command, Some(&dataset))?;
    let (cmd, _) = receive_response(&mut upstream)?;
    let response_status = message::read_status(&cmd)?;
    release(upstream);
    Ok(response_status)
}

fn read_u16(obj: &InMemDicomObject, tag: Tag) -> u16 {
    obj.get(tag).and_then(|e| e.to_int::<u16>().ok()).unwrap_or(0)
}

/// Writes the command dataset (always implicit VR LE) and, if present, the
/// identifier/instance dataset (in the negotiated transfer syntax) as one
/// or two P-DATA-TF PDUs, following the reference SCU tools' framing.
fn send_command(
    upstream: &mut UpstreamAssociation,
    command: &InMemDicomObject,
    dataset: Option<&InMemDicomObject>,
) -> Result<()> {
    let mut cmd_data = Vec::with_capacity(128);
    command
        .write_dataset_with_ts(&mut cmd_data, associator::command_transfer_syntax())
        .map_err(|e| DimseError::DicomObject(e.to_string()))?;

    let pc_id = upstream.presentation_context_id;
    let command_is_last = dataset.is_none();
    upstream
        .association
        .send(&Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: pc_id,
                value_type: PDataValueType::Command,
                is_last: command_is_last,
                data: cmd_data,
            }],
        })
        .map_err(|e| DimseError::DicomUl(e.to_string()))?;

    if let Some(dataset) = dataset {
        let ts = upstream.context()?;
        let mut data = Vec::with_capacity(4096);
        dataset
            .write_dataset_with_ts(&mut data, ts)
            .map_err(|e| DimseError::DicomObject(e.to_string()))?;
        upstream
            .association
            .send(&Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: pc_id,
                    value_type: PDataValueType::Data,
                    is_last: true,
                    data,
                }],
            })
            .map_err(|e| DimseError::DicomUl(e.to_string()))?;
    }

    Ok(())
}

/// Receives one DIMSE response: the command dataset, and the data dataset
/// if the response carries one (either folded into the same P-DATA-TF, per
/// some implementations, or as a following one).
fn receive_response(upstream: &mut UpstreamAssociation) -> Result<(InMemDicomObject, Option<InMemDicomObject>)> {
    let pdu = upstream
        .association
        .receive()
        .map_err(|e| DimseError::DicomUl(e.to_string()))?;

    let data = match pdu {
        Pdu::PData { data } if !data.is_empty() => data,
        Pdu::PData { .. } => {
            return Err(DimseError::ProtocolViolation("empty P-DATA-TF received".into()))
        }
        Pdu::ReleaseRQ => {
            let _ = upstream.association.send(&Pdu::ReleaseRP);
            return Err(DimseError::OperationFailed("upstream released association unexpectedly".into()));
        }
        Pdu::AbortRQ { source } => {
            return Err(DimseError::AssociationRejected(format!("upstream aborted: {source:?}")))
        }
        other => {
            return Err(DimseError::ProtocolViolation(format!("unexpected PDU from upstream: {other:?}")))
        }
    };

    let command_value = data
        .first()
        .ok_or_else(|| DimseError::ProtocolViolation("P-DATA-TF carried no values".into()))?;
    let command = InMemDicomObject::read_dataset_with_ts(
        command_value.data.as_slice(),
        associator::command_transfer_syntax(),
    )
    .map_err(|e| DimseError::DicomObject(e.to_string()))?;

    let has_data_set = command
        .get(tags::COMMAND_DATA_SET_TYPE)
        .and_then(|e| e.to_int::<u16>().ok())
        .map(|v| v != 0x0101)
        .unwrap_or(false);

    if !has_data_set {
        return Ok((command, None));
    }

    let ts = upstream.context()?;
    let dataset = if let Some(second) = data.get(1) {
        InMemDicomObject::read_dataset_with_ts(second.data.as_slice(), ts)
            .map_err(|e| DimseError::DicomObject(e.to_string()))?
    } else {
        let mut reader = upstream.association.receive_pdata();
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut reader, &mut buf)
            .map_err(DimseError::Network)?;
        InMemDicomObject::read_dataset_with_ts(buf.as_slice(), ts)
            .map_err(|e| DimseError::DicomObject(e.to_string()))?
    };

    Ok((command, Some(dataset)))
}

fn release(upstream: UpstreamAssociation) {
    if let Err(e) = upstream.association.release() {
        tracing::warn!(error = %e, "failed to cleanly release upstream association");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_outcome_reads_defaults_when_counters_absent() {
        let cmd = InMemDicomObject::new_empty();
        assert_eq!(read_u16(&cmd, tags::NUMBER_OF_REMAINING_SUB_OPERATIONS), 0);
    }
}
