//! Tag tables for the identifying and pseudonymizable attribute lists.

use dicom_core::Tag;
use dicom_dictionary_std::tags;

/// Attributes cleared to the empty string on every traversal through the
/// shield. Present but listed here as cleared; absent attributes are left
/// absent (no element is added).
pub const IDENTIFYING_ATTRIBUTES: &[Tag] = &[
    tags::PATIENT_NAME,
    tags::ISSUER_OF_PATIENT_ID,
    tags::PATIENT_BIRTH_DATE,
    tags::PATIENT_SEX,
    tags::PATIENT_ADDRESS,
    tags::PATIENT_TELEPHONE_NUMBERS,
    tags::ACCESSION_NUMBER,
    tags::INSTITUTION_NAME,
    tags::INSTITUTION_ADDRESS,
    tags::INSTITUTION_CODE_SEQUENCE,
    tags::REFERRING_PHYSICIAN_NAME,
    tags::REFERRING_PHYSICIAN_TELEPHONE_NUMBERS,
];

/// Attributes rewritten forward (pseudonymize) or backward (depseudonymize)
/// through the pseudonym service, keyed by value rather than by tag.
pub const PSEUDONYMIZABLE_ATTRIBUTES: &[(Tag, &str)] = &[
    (tags::PATIENT_ID, "PatientID"),
    (tags::STUDY_ID, "StudyID"),
    (tags::SOP_INSTANCE_UID, "SOPInstanceUID"),
    (tags::STUDY_INSTANCE_UID, "StudyInstanceUID"),
    (tags::SERIES_INSTANCE_UID, "SeriesInstanceUID"),
];
