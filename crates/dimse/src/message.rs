//! DIMSE command dataset builders and readers.
//!
//! DIMSE exchanges a "command" dataset (group 0000 elements) ahead of an
//! optional "data" dataset on every operation. These helpers build and read
//! the command datasets for the five verbs this engine supports, following
//! the same element-by-element construction the reference SCU/SCP tools use.

use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::tags;
use dicom_object::mem::InMemElement;
use dicom_object::InMemDicomObject;

use crate::error::{status, DimseError, Result};

/// DIMSE command field values (PS3.7 E.1).
pub mod command_field {
    pub const C_STORE_RQ: u16 = 0x0001;
    pub const C_STORE_RSP: u16 = 0x8001;
    pub const C_GET_RQ: u16 = 0x0010;
    pub const C_GET_RSP: u16 = 0x8010;
    pub const C_FIND_RQ: u16 = 0x0020;
    pub const C_FIND_RSP: u16 = 0x8020;
    pub const C_MOVE_RQ: u16 = 0x0021;
    pub const C_MOVE_RSP: u16 = 0x8021;
    pub const C_ECHO_RQ: u16 = 0x0030;
    pub const C_ECHO_RSP: u16 = 0x8030;
}

/// Whether a command PDU carries a data set (0x0101 = none, 0x0000/other = yes).
const NO_DATA_SET: u16 = 0x0101;
const HAS_DATA_SET: u16 = 0x0000;

fn ushort(tag: Tag, value: u16) -> InMemElement {
    DataElement::new(tag, VR::US, PrimitiveValue::from(value))
}

fn ui(tag: Tag, value: &str) -> InMemElement {
    DataElement::new(tag, VR::UI, PrimitiveValue::from(value))
}

fn ae(tag: Tag, value: &str) -> InMemElement {
    DataElement::new(tag, VR::AE, PrimitiveValue::from(value))
}

pub fn echo_request(message_id: u16, affected_sop_class: &str) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        ui(tags::AFFECTED_SOP_CLASS_UID, affected_sop_class),
        ushort(tags::COMMAND_FIELD, command_field::C_ECHO_RQ),
        ushort(tags::MESSAGE_ID, message_id),
        ushort(tags::COMMAND_DATA_SET_TYPE, NO_DATA_SET),
    ])
}

pub fn echo_response(message_id: u16, affected_sop_class: &str, status_code: u16) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        ui(tags::AFFECTED_SOP_CLASS_UID, affected_sop_class),
        ushort(tags::COMMAND_FIELD, command_field::C_ECHO_RSP),
        ushort(tags::MESSAGE_ID_BEING_RESPONDED_TO, message_id),
        ushort(tags::COMMAND_DATA_SET_TYPE, NO_DATA_SET),
        ushort(tags::STATUS, status_code),
    ])
}

pub fn find_request(message_id: u16, affected_sop_class: &str) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        ui(tags::AFFECTED_SOP_CLASS_UID, affected_sop_class),
        ushort(tags::COMMAND_FIELD, command_field::C_FIND_RQ),
        ushort(tags::MESSAGE_ID, message_id),
        ushort(tags::PRIORITY, 0),
        ushort(tags::COMMAND_DATA_SET_TYPE, HAS_DATA_SET),
    ])
}

pub fn find_response(
    message_id: u16,
    affected_sop_class: &str,
    status_code: u16,
    carries_identifier: bool,
) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        ui(tags::AFFECTED_SOP_CLASS_UID, affected_sop_class),
        ushort(tags::COMMAND_FIELD, command_field::C_FIND_RSP),
        ushort(tags::MESSAGE_ID_BEING_RESPONDED_TO, message_id),
        ushort(
            tags::COMMAND_DATA_SET_TYPE,
            if carries_identifier { HAS_DATA_SET } else { NO_DATA_SET },
        ),
        ushort(tags::STATUS, status_code),
    ])
}

/// Builds a C-MOVE-RQ command, stamping the real DICOM MoveOriginator
/// fields (0000,1030 / 0000,1031) with our own AE title and `message_id`.
/// The internal C-STORE listener reads these back off each sub-operation
/// to route the stored instance to the queue this MOVE is draining — see
/// the dataset queue's per-operation registry.
pub fn move_request(
    message_id: u16,
    affected_sop_class: &str,
    move_destination: &str,
    originator_aet: &str,
) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        ui(tags::AFFECTED_SOP_CLASS_UID, affected_sop_class),
        ushort(tags::COMMAND_FIELD, command_field::C_MOVE_RQ),
        ushort(tags::MESSAGE_ID, message_id),
        ushort(tags::PRIORITY, 0),
        ae(tags::MOVE_DESTINATION, move_destination),
        ae(tags::MOVE_ORIGINATOR_APPLICATION_ENTITY_TITLE, originator_aet),
        ushort(tags::MOVE_ORIGINATOR_MESSAGE_ID, message_id),
        ushort(tags::COMMAND_DATA_SET_TYPE, HAS_DATA_SET),
    ])
}

/// Reads the MoveOriginatorMessageID (0000,1031) off an inbound C-STORE-RQ
/// command, used by the internal listener to find the queue a sub-operation
/// belongs to. Absent when the C-STORE is a direct client store rather than
/// a MOVE sub-operation.
pub fn read_move_originator_message_id(command: &InMemDicomObject) -> Option<u16> {
    command
        .get(tags::MOVE_ORIGINATOR_MESSAGE_ID)
        .and_then(|e| e.to_int::<u16>().ok())
}

pub fn move_response(
    message_id: u16,
    affected_sop_class: &str,
    status_code: u16,
    remaining: u16,
    completed: u16,
    failed: u16,
    warning: u16,
) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        ui(tags::AFFECTED_SOP_CLASS_UID, affected_sop_class),
        ushort(tags::COMMAND_FIELD, command_field::C_MOVE_RSP),
        ushort(tags::MESSAGE_ID_BEING_RESPONDED_TO, message_id),
        ushort(tags::COMMAND_DATA_SET_TYPE, NO_DATA_SET),
        ushort(tags::STATUS, status_code),
        ushort(tags::NUMBER_OF_REMAINING_SUB_OPERATIONS, remaining),
        ushort(tags::NUMBER_OF_COMPLETED_SUB_OPERATIONS, completed),
        ushort(tags::NUMBER_OF_FAILED_SUB_OPERATIONS, failed),
        ushort(tags::NUMBER_OF_WARNING_SUB_OPERATIONS, warning),
    ])
}

pub fn get_request(message_id: u16, affected_sop_class: &str) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        ui(tags::AFFECTED_SOP_CLASS_UID, affected_sop_class),
        ushort(tags::COMMAND_FIELD, command_field::C_GET_RQ),
        ushort(tags::MESSAGE_ID, message_id),
        ushort(tags::PRIORITY, 0),
        ushort(tags::COMMAND_DATA_SET_TYPE, HAS_DATA_SET),
    ])
}

/// Builds a C-GET-RSP command. `carries_identifier` must be `true` for the
/// pending responses that deliver a retrieved instance alongside this
/// command (the handler attaches the shielded dataset as the PDV that
/// follows) and `false` for the terminal status, mirroring
/// [`find_response`]'s flag so `COMMAND_DATA_SET_TYPE` always agrees with
/// whether a Data PDV actually follows on the wire.
pub fn get_response(
    message_id: u16,
    affected_sop_class: &str,
    status_code: u16,
    remaining: u16,
    completed: u16,
    failed: u16,
    warning: u16,
    carries_identifier: bool,
) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        ui(tags::AFFECTED_SOP_CLASS_UID, affected_sop_class),
        ushort(tags::COMMAND_FIELD, command_field::C_GET_RSP),
        ushort(tags::MESSAGE_ID_BEING_RESPONDED_TO, message_id),
        ushort(
            tags::COMMAND_DATA_SET_TYPE,
            if carries_identifier { HAS_DATA_SET } else { NO_DATA_SET },
        ),
        ushort(tags::STATUS, status_code),
        ushort(tags::NUMBER_OF_REMAINING_SUB_OPERATIONS, remaining),
        ushort(tags::NUMBER_OF_COMPLETED_SUB_OPERATIONS, completed),
        ushort(tags::NUMBER_OF_FAILED_SUB_OPERATIONS, failed),
        ushort(tags::NUMBER_OF_WARNING_SUB_OPERATIONS, warning),
    ])
}

pub fn store_request(
    message_id: u16,
    affected_sop_class: &str,
    affected_sop_instance: &str,
) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        ui(tags::AFFECTED_SOP_CLASS_UID, affected_sop_class),
        ushort(tags::COMMAND_FIELD, command_field::C_STORE_RQ),
        ushort(tags::MESSAGE_ID, message_id),
        ushort(tags::PRIORITY, 0),
        ushort(tags::COMMAND_DATA_SET_TYPE, HAS_DATA_SET),
        ui(tags::AFFECTED_SOP_INSTANCE_UID, affected_sop_instance),
    ])
}

pub fn store_response(
    message_id: u16,
    affected_sop_class: &str,
    affected_sop_instance: &str,
    status_code: u16,
) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        ui(tags::AFFECTED_SOP_CLASS_UID, affected_sop_class),
        ushort(tags::COMMAND_FIELD, command_field::C_STORE_RSP),
        ushort(tags::MESSAGE_ID_BEING_RESPONDED_TO, message_id),
        ushort(tags::COMMAND_DATA_SET_TYPE, NO_DATA_SET),
        ushort(tags::STATUS, status_code),
        ui(tags::AFFECTED_SOP_INSTANCE_UID, affected_sop_instance),
    ])
}

/// Builds a C-STORE-RQ stamped with the MoveOriginator fields a real PACS
/// attaches to a C-MOVE sub-operation (PS3.7 9.3.5), so that test doubles
/// standing in for an upstream PACS can exercise the queue correlation path
/// the internal listener relies on (`read_move_originator_message_id`).
pub fn store_request_with_move_originator(
    message_id: u16,
    affected_sop_class: &str,
    affected_sop_instance: &str,
    originator_aet: &str,
    originator_message_id: u16,
) -> InMemDicomObject {
    let mut command = store_request(message_id, affected_sop_class, affected_sop_instance);
    command.put(ae(tags::MOVE_ORIGINATOR_APPLICATION_ENTITY_TITLE, originator_aet));
    command.put(ushort(tags::MOVE_ORIGINATOR_MESSAGE_ID, originator_message_id));
    command
}

/// Reads the status code out of a command dataset (request or response).
pub fn read_status(command: &InMemDicomObject) -> Result<u16> {
    command
        .get(tags::STATUS)
        .ok_or_else(|| DimseError::OperationFailed("response command has no Status".into()))?
        .to_int::<u16>()
        .map_err(|e| DimseError::OperationFailed(format!("malformed Status element: {e}")))
}

pub fn is_pending(status_code: u16) -> bool {
    status_code == status::PENDING || status_code == status::PENDING_WARNING
}

pub fn is_success(status_code: u16) -> bool {
    status_code == status::SUCCESS
}

/// Reads the QueryRetrieveLevel out of an identifier dataset, failing with
/// a protocol-violation error when absent (§7 error kind 5).
pub fn read_query_retrieve_level(identifier: &InMemDicomObject) -> Result<crate::types::QueryRetrieveLevel> {
    let raw = identifier
        .get(tags::QUERY_RETRIEVE_LEVEL)
        .ok_or_else(|| DimseError::ProtocolViolation("QueryRetrieveLevel is missing".into()))?
        .to_str()
        .map_err(|e| DimseError::ProtocolViolation(format!("malformed QueryRetrieveLevel: {e}")))?;

    crate::types::QueryRetrieveLevel::parse(&raw)
        .ok_or_else(|| DimseError::ProtocolViolation(format!("unknown QueryRetrieveLevel: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_response_roundtrips_status() {
        let rsp = echo_response(7, "1.2.840.10008.1.1", status::SUCCESS);
        assert_eq!(read_status(&rsp).unwrap(), status::SUCCESS);
    }

    #[test]
    fn query_retrieve_level_roundtrip() {
        let mut id = InMemDicomObject::new_empty();
        id.put(DataElement::new(
            tags::QUERY_RETRIEVE_LEVEL,
            VR::CS,
            PrimitiveValue::from("STUDY"),
        ));
        assert_eq!(
            read_query_retrieve_level(&id).unwrap(),
            crate::types::QueryRetrieveLevel::Study
        );
    }

    #[test]
    fn missing_query_retrieve_level_is_protocol_violation() {
        let id = InMemDicomObject::new_empty();
        assert!(matches!(
            read_query_retrieve_level(&id),
            Err(DimseError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn get_response_carries_get_rsp_command_field() {
        let rsp = get_response(3, "1.2.840.10008.5.1.4.1.2.2.1", status::PENDING, 1, 0, 0, 0, true);
        assert_eq!(
            rsp.get(tags::COMMAND_FIELD).unwrap().to_int::<u16>().unwrap(),
            command_field::C_GET_RSP
        );
        assert_eq!(
            rsp.get(tags::COMMAND_DATA_SET_TYPE).unwrap().to_int::<u16>().unwrap(),
            HAS_DATA_SET
        );
    }

    #[test]
    fn get_response_terminal_status_declares_no_data_set() {
        let rsp = get_response(3, "1.2.840.10008.5.1.4.1.2.2.1", status::SUCCESS, 0, 1, 0, 0, false);
        assert_eq!(
            rsp.get(tags::COMMAND_DATA_SET_TYPE).unwrap().to_int::<u16>().unwrap(),
            NO_DATA_SET
        );
    }
}
