//! The upstream associator (component D): picks the right DIMSE model SOP
//! class for a query/retrieve request and establishes the SCU-role
//! association to the configured upstream PACS.
//!
//! Every upstream operation gets its own short-lived association scoped to
//! exactly the abstract syntax it needs, the same way the reference SCU
//! tools (`movescu`, `findscu`, `storescu`) each build a single-context
//! association per run. `dicom-ul`'s client association builder only keeps
//! the first accepted presentation context, so an association is never
//! shared across operations of different SOP classes.

use dicom_transfer_syntax_registry::{entries, TransferSyntaxRegistry};
use dicom_ul::association::client::{ClientAssociation, ClientAssociationOptions};
use dicom_ul::pdu::PresentationContextResult;

use crate::error::{DimseError, Result};
use crate::types::{AssociatorAction, QueryRetrieveLevel};

/// Where the upstream PACS lives and how we present ourselves to it.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    pub host: String,
    pub port: u16,
    pub called_aet: String,
    pub calling_aet: String,
    pub max_pdu: u32,
}

impl UpstreamTarget {
    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// An established upstream association together with the single
/// presentation context negotiated for it.
pub struct UpstreamAssociation {
    pub association: ClientAssociation,
    pub presentation_context_id: u8,
    pub transfer_syntax: String,
}

impl UpstreamAssociation {
    pub fn context(&self) -> Result<&'static dicom_transfer_syntax_registry::TransferSyntax> {
        TransferSyntaxRegistry
            .get(&self.transfer_syntax)
            .ok_or_else(|| DimseError::ProtocolViolation("unsupported transfer syntax negotiated".into()))
    }
}

/// Establishes an association for a query/retrieve operation, selecting the
/// Patient Root or Study Root model per §4.4's level/action table.
pub fn establish_for_query(target: &UpstreamTarget, level: QueryRetrieveLevel, action: AssociatorAction) -> Result<UpstreamAssociation> {
    let abstract_syntax = crate::types::model_abstract_syntax(level, action);
    establish_single_context(target, abstract_syntax)
}

/// Establishes an association for a C-ECHO verification.
pub fn establish_for_echo(target: &UpstreamTarget) -> Result<UpstreamAssociation> {
    establish_single_context(target, dicom_dictionary_std::uids::VERIFICATION)
}

/// Establishes an association for a single C-STORE, offering the instance's
/// own SOP class as the sole abstract syntax.
pub fn establish_for_store(target: &UpstreamTarget, sop_class: &str) -> Result<UpstreamAssociation> {
    establish_single_context(target, sop_class)
}

fn establish_single_context(target: &UpstreamTarget, abstract_syntax: &str) -> Result<UpstreamAssociation> {
    let mut options = ClientAssociationOptions::new()
        .with_abstract_syntax(abstract_syntax)
        .calling_ae_title(target.calling_aet.clone())
        .called_ae_title(target.called_aet.clone())
        .max_pdu_length(target.max_pdu);

    for ts in TransferSyntaxRegistry.iter() {
        if !ts.is_unsupported() {
            options = options.with_transfer_syntax(ts.uid());
        }
    }

    let association = options
        .establish_with(&target.addr())
        .map_err(|e| DimseError::AssociationRejected(e.to_string()))?;

    let pc: &PresentationContextResult = association
        .presentation_contexts()
        .first()
        .ok_or_else(|| DimseError::AssociationRejected("no presentation context accepted".into()))?;

    let transfer_syntax = pc.transfer_syntax.clone();
    let presentation_context_id = pc.id;

    Ok(UpstreamAssociation {
        association,
        presentation_context_id,
        transfer_syntax,
    })
}

/// The implicit VR little endian transfer syntax DIMSE command datasets are
/// always encoded with, regardless of the negotiated data transfer syntax.
pub fn command_transfer_syntax() -> &'static dicom_transfer_syntax_registry::TransferSyntax {
    entries::IMPLICIT_VR_LITTLE_ENDIAN.erased()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_target_formats_addr() {
        let target = UpstreamTarget {
            host: "10.0.0.5".into(),
            port: 11112,
            called_aet: "ANY-SCP".into(),
            calling_aet: "DICOMSHIELD".into(),
            max_pdu: 16_384,
        };
        assert_eq!(target.addr(), "10.0.0.5:11112");
    }
}
