//! Property tests for the privacy shield (P1-P5 of the design's testable
//! properties), exercised against the public `shield` crate API with a fake
//! pseudonym client so no network traffic is involved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use pseudonym::PseudonymClient;
use shield::{Shield, IDENTIFYING_ATTRIBUTES, LOOKUP_MISS_SENTINEL};

/// A pseudonym client whose behavior is fully scripted: a fixed forward map,
/// its exact inverse, and a flag that records whether it was ever called so
/// P4 (empty-in-empty-out) can assert no HTTP traffic would occur.
struct ScriptedClient {
    forward: Mutex<HashMap<String, String>>,
    called: AtomicBool,
    fail: bool,
}

impl ScriptedClient {
    fn new(forward: HashMap<String, String>) -> Self {
        Self {
            forward: Mutex::new(forward),
            called: AtomicBool::new(false),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            forward: Mutex::new(HashMap::new()),
            called: AtomicBool::new(false),
            fail: true,
        }
    }
}

#[async_trait]
impl PseudonymClient for ScriptedClient {
    async fn pseudonymize(&self, values: HashMap<String, String>) -> HashMap<String, String> {
        if values.is_empty() {
            return HashMap::new();
        }
        self.called.store(true, Ordering::SeqCst);
        if self.fail {
            return HashMap::new();
        }
        let forward = self.forward.lock().unwrap();
        values
            .into_values()
            .filter_map(|v| forward.get(&v).map(|p| (v, p.clone())))
            .collect()
    }

    async fn depseudonymize(&self, values: HashMap<String, String>) -> HashMap<String, String> {
        if values.is_empty() {
            return HashMap::new();
        }
        self.called.store(true, Ordering::SeqCst);
        if self.fail {
            return HashMap::new();
        }
        let forward = self.forward.lock().unwrap();
        let reverse: HashMap<String, String> =
            forward.iter().map(|(o, p)| (p.clone(), o.clone())).collect();
        values
            .into_values()
            .filter_map(|v| reverse.get(&v).map(|o| (v, o.clone())))
            .collect()
    }

    async fn test_connection(&self) -> pseudonym::Result<()> {
        Ok(())
    }
}

fn study_dataset() -> InMemDicomObject {
    let mut ds = InMemDicomObject::new_empty();
    ds.put(DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from("John^Doe")));
    ds.put(DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from("123456")));
    ds.put(DataElement::new(
        tags::ACCESSION_NUMBER,
        VR::SH,
        PrimitiveValue::from("ACC-1"),
    ));
    ds.put(DataElement::new(
        tags::STUDY_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from("1.2.3.4.5.S"),
    ));
    ds.put(DataElement::new(
        tags::SERIES_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from("1.2.3.4.5.E"),
    ));
    ds.put(DataElement::new(
        tags::SOP_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from("1.2.3.4.5.O"),
    ));
    ds
}

fn attribute_value(ds: &InMemDicomObject, tag: dicom_core::Tag) -> Option<String> {
    ds.get(tag).and_then(|e| e.to_str().ok()).map(|s| s.into_owned())
}

#[tokio::test]
async fn p1_clearing_every_identifying_attribute_is_empty_or_absent() {
    let forward = HashMap::from([
        ("123456".to_string(), "PSEUDO-PID".to_string()),
        ("1.2.3.4.5.S".to_string(), "PSEUDO-STUDY".to_string()),
        ("1.2.3.4.5.E".to_string(), "PSEUDO-SERIES".to_string()),
        ("1.2.3.4.5.O".to_string(), "PSEUDO-SOP".to_string()),
    ]);
    let shield = Shield::new(Arc::new(ScriptedClient::new(forward)));
    let shielded = shield.shield_retrieve(study_dataset()).await;

    for &tag in IDENTIFYING_ATTRIBUTES {
        match attribute_value(&shielded.dataset, tag) {
            None => {}
            Some(value) => assert_eq!(value, "", "identifying attribute {tag} was not cleared"),
        }
    }
}

#[tokio::test]
async fn p2_pseudonymizable_attributes_differ_from_originals() {
    let forward = HashMap::from([
        ("123456".to_string(), "PSEUDO-PID".to_string()),
        ("1.2.3.4.5.S".to_string(), "PSEUDO-STUDY".to_string()),
        ("1.2.3.4.5.E".to_string(), "PSEUDO-SERIES".to_string()),
        ("1.2.3.4.5.O".to_string(), "PSEUDO-SOP".to_string()),
    ]);
    let shield = Shield::new(Arc::new(ScriptedClient::new(forward)));
    let shielded = shield.shield_retrieve(study_dataset()).await;

    let pid = attribute_value(&shielded.dataset, tags::PATIENT_ID).unwrap();
    assert_ne!(pid, "123456");
    let study = attribute_value(&shielded.dataset, tags::STUDY_INSTANCE_UID).unwrap();
    assert_ne!(study, "1.2.3.4.5.S");
    let series = attribute_value(&shielded.dataset, tags::SERIES_INSTANCE_UID).unwrap();
    assert_ne!(series, "1.2.3.4.5.E");
    let sop = attribute_value(&shielded.dataset, tags::SOP_INSTANCE_UID).unwrap();
    assert_ne!(sop, "1.2.3.4.5.O");
}

#[tokio::test]
async fn p3_round_trip_through_pseudonymize_then_depseudonymize() {
    let forward = HashMap::from([("123456".to_string(), "PSEUDO-PID".to_string())]);
    let client = Arc::new(ScriptedClient::new(forward));

    let pseudonymized = client
        .pseudonymize(HashMap::from([("PatientID".to_string(), "123456".to_string())]))
        .await;
    assert_eq!(pseudonymized.get("123456").unwrap(), "PSEUDO-PID");

    let recovered = client
        .depseudonymize(HashMap::from([(
            "PatientID".to_string(),
            pseudonymized.get("123456").unwrap().clone(),
        )]))
        .await;
    assert_eq!(recovered.get("PSEUDO-PID").unwrap(), "123456");
}

#[tokio::test]
async fn p4_empty_in_empty_out_never_touches_the_service() {
    let client = Arc::new(ScriptedClient::new(HashMap::new()));
    let shield = Shield::new(Arc::clone(&client) as Arc<dyn PseudonymClient>);

    let shielded = shield.shield_retrieve(InMemDicomObject::new_empty()).await;
    assert!(shielded.dataset.get(tags::PATIENT_ID).is_none());
    assert!(!client.called.load(Ordering::SeqCst));

    let shielded = shield.shield_query(InMemDicomObject::new_empty()).await;
    assert!(shielded.dataset.get(tags::PATIENT_ID).is_none());
    assert!(!client.called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn p5_no_leak_when_pseudonym_service_fails() {
    let shield = Shield::new(Arc::new(ScriptedClient::failing()));
    let shielded = shield.shield_retrieve(study_dataset()).await;

    let pid = attribute_value(&shielded.dataset, tags::PATIENT_ID).unwrap();
    assert_ne!(pid, "123456");
    assert_eq!(pid, LOOKUP_MISS_SENTINEL);

    let study = attribute_value(&shielded.dataset, tags::STUDY_INSTANCE_UID).unwrap();
    assert_ne!(study, "1.2.3.4.5.S");
}

#[tokio::test]
async fn empty_valued_pseudonymizable_attribute_is_left_empty_as_a_query_wildcard() {
    let mut ds = InMemDicomObject::new_empty();
    ds.put(DataElement::new(tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from("")));

    let shield = Shield::new(Arc::new(ScriptedClient::new(HashMap::new())));
    let shielded = shield.shield_query(ds).await;

    let study = attribute_value(&shielded.dataset, tags::STUDY_INSTANCE_UID).unwrap();
    assert_eq!(study, "");
}
