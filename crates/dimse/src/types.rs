//! Shared vocabulary for DIMSE operations.

use serde::{Deserialize, Serialize};

/// The hierarchical scope of a C-FIND/C-MOVE/C-GET query, read from the
/// identifier's QueryRetrieveLevel attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryRetrieveLevel {
    Patient,
    Study,
    Series,
    Instances,
}

impl QueryRetrieveLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "PATIENT" => Some(Self::Patient),
            "STUDY" => Some(Self::Study),
            "SERIES" => Some(Self::Series),
            "INSTANCES" | "IMAGE" => Some(Self::Instances),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueryRetrieveLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Patient => "PATIENT",
            Self::Study => "STUDY",
            Self::Series => "SERIES",
            Self::Instances => "INSTANCES",
        };
        write!(f, "{s}")
    }
}

/// What the upstream associator is being asked to do, used to pick the
/// right query/retrieve model SOP class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociatorAction {
    Find,
    Move,
    Get,
}

/// The five DIMSE verbs this relay handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DimseCommand {
    Echo,
    Find,
    Get,
    Move,
    Store,
}

/// Picks the query/retrieve model abstract syntax for an upstream request,
/// per the level/action table: PATIENT uses the Patient Root model, anything
/// narrower uses Study Root (§4.4).
pub fn model_abstract_syntax(level: QueryRetrieveLevel, action: AssociatorAction) -> &'static str {
    use dicom_dictionary_std::uids;
    match (level, action) {
        (QueryRetrieveLevel::Patient, AssociatorAction::Find) => {
            uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND
        }
        (QueryRetrieveLevel::Patient, AssociatorAction::Move) => {
            uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE
        }
        (QueryRetrieveLevel::Patient, AssociatorAction::Get) => {
            uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET
        }
        (_, AssociatorAction::Find) => uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
        (_, AssociatorAction::Move) => uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE,
        (_, AssociatorAction::Get) => uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET,
    }
}

/// Storage SOP classes this relay is willing to carry, both for the
/// inbound listeners (§6) and when opening a single-instance upstream
/// C-STORE association. Not exhaustive of PS3.4 — the set a production
/// deployment actually sees (CT, MR, XA, secondary capture, common SR).
pub const STORAGE_ABSTRACT_SYNTAXES: &[&str] = &[
    "1.2.840.10008.5.1.4.1.1.2",     // CT Image Storage
    "1.2.840.10008.5.1.4.1.1.2.1",   // Enhanced CT Image Storage
    "1.2.840.10008.5.1.4.1.1.4",     // MR Image Storage
    "1.2.840.10008.5.1.4.1.1.4.1",   // Enhanced MR Image Storage
    "1.2.840.10008.5.1.4.1.1.12.1",  // X-Ray Angiographic Image Storage
    "1.2.840.10008.5.1.4.1.1.7",     // Secondary Capture Image Storage
    "1.2.840.10008.5.1.4.1.1.1",     // Computed Radiography Image Storage
    "1.2.840.10008.5.1.4.1.1.6.1",   // Ultrasound Image Storage
    "1.2.840.10008.5.1.4.1.1.88.11", // Basic Text SR
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_query_retrieve_level() {
        assert_eq!(
            QueryRetrieveLevel::parse("STUDY"),
            Some(QueryRetrieveLevel::Study)
        );
        assert_eq!(QueryRetrieveLevel::parse("bogus"), None);
    }

    #[test]
    fn patient_level_selects_patient_root() {
        let uid = model_abstract_syntax(QueryRetrieveLevel::Patient, AssociatorAction::Find);
        assert_eq!(uid, dicom_dictionary_std::uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND);
    }

    #[test]
    fn study_level_selects_study_root() {
        let uid = model_abstract_syntax(QueryRetrieveLevel::Series, AssociatorAction::Move);
        assert_eq!(uid, dicom_dictionary_std::uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE);
    }
}
