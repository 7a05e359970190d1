//! The privacy shield: the stateless transformer that clears identifying
//! attributes and rewrites pseudonymizable attributes through a
//! [`PseudonymClient`].

mod attributes;
mod error;

pub use attributes::{IDENTIFYING_ATTRIBUTES, PSEUDONYMIZABLE_ATTRIBUTES};
pub use error::{Result, ShieldError};

use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_object::InMemDicomObject;
use pseudonym::PseudonymClient;
use std::collections::HashMap;
use std::sync::Arc;

/// A dataset that has been through [`Shield::shield_query`] or
/// [`Shield::shield_retrieve`], paired with the advisory marker the original
/// system attaches for test observability. The marker is never put on the
/// wire; it only exists so tests can assert a dataset passed through the
/// clearing pass.
#[derive(Debug)]
pub struct Shielded {
    pub dataset: InMemDicomObject,
    pub anonymized: bool,
}

pub struct Shield {
    pseudonym_client: Arc<dyn PseudonymClient>,
}

impl Shield {
    pub fn new(pseudonym_client: Arc<dyn PseudonymClient>) -> Self {
        Self { pseudonym_client }
    }

    /// Requests going **to** the upstream: identifiers the client already
    /// knows (pseudonyms) are translated back to real identifiers so the
    /// upstream PACS can match against them.
    pub async fn shield_query(&self, mut dataset: InMemDicomObject) -> Shielded {
        clear_identifying(&mut dataset);
        let pseudonyms = collect_pseudonymizable(&dataset);
        let originals = self.pseudonym_client.depseudonymize(pseudonyms).await;
        apply_pseudonymizable(&mut dataset, &originals);
        Shielded {
            dataset,
            anonymized: true,
        }
    }

    /// Responses and stored instances coming **from** the upstream, on
    /// their way back to the client: real identifiers are translated
    /// forward into pseudonyms.
    pub async fn shield_retrieve(&self, mut dataset: InMemDicomObject) -> Shielded {
        clear_identifying(&mut dataset);
        let originals = collect_pseudonymizable(&dataset);
        let pseudonyms = self.pseudonym_client.pseudonymize(originals).await;
        apply_pseudonymizable(&mut dataset, &pseudonyms);
        Shielded {
            dataset,
            anonymized: true,
        }
    }

    /// Client-initiated C-STORE: pass-through. See the open question this
    /// implementation records about `shieldStore` in the design ledger —
    /// this is deliberately identity, not a placeholder.
    pub fn shield_store(&self, dataset: InMemDicomObject) -> InMemDicomObject {
        dataset
    }
}

/// The sentinel written for a pseudonymizable attribute whose value the
/// pseudonym service did not return a mapping for.
pub const LOOKUP_MISS_SENTINEL: &str = "None";

fn clear_identifying(dataset: &mut InMemDicomObject) {
    for &tag in IDENTIFYING_ATTRIBUTES {
        if dataset.get(tag).is_some() {
            if tag == dicom_dictionary_std::tags::INSTITUTION_CODE_SEQUENCE {
                dataset.remove_element(tag);
                continue;
            }
            dataset.put(DataElement::new(tag, VR::LO, PrimitiveValue::from("")));
        }
    }
}

/// Gathers the non-empty pseudonymizable attributes present in `dataset`,
/// keyed by their DICOM keyword (the shape the pseudonym client batches on).
fn collect_pseudonymizable(dataset: &InMemDicomObject) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for &(tag, name) in PSEUDONYMIZABLE_ATTRIBUTES {
        if let Some(element) = dataset.get(tag) {
            let value = element.to_str().unwrap_or_default();
            if !value.trim().is_empty() {
                values.insert(name.to_string(), value.into_owned());
            }
        }
    }
    values
}

/// Rewrites each present, non-empty pseudonymizable attribute using its
/// current value as the lookup key into `mapping`. A value absent from the
/// mapping (service failure, or a genuinely unknown identifier) becomes the
/// explicit [`LOOKUP_MISS_SENTINEL`], never the untouched original.
fn apply_pseudonymizable(dataset: &mut InMemDicomObject, mapping: &HashMap<String, String>) {
    for &(tag, _name) in PSEUDONYMIZABLE_ATTRIBUTES {
        let Some(element) = dataset.get(tag) else {
            continue;
        };
        let current = element.to_str().unwrap_or_default();
        if current.trim().is_empty() {
            continue;
        }
        let replacement = mapping
            .get(current.as_ref())
            .cloned()
            .unwrap_or_else(|| LOOKUP_MISS_SENTINEL.to_string());
        let vr = element.vr();
        dataset.put(DataElement::new(tag, vr, PrimitiveValue::from(replacement)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dicom_dictionary_std::tags;
    use std::sync::Mutex;

    /// A fake pseudonym service used by shield unit tests, avoiding any
    /// network dependency for the P1-P5 properties.
    struct FakeClient {
        pseudonymize_response: Mutex<HashMap<String, String>>,
        depseudonymize_response: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl PseudonymClient for FakeClient {
        async fn pseudonymize(&self, values: HashMap<String, String>) -> HashMap<String, String> {
            if values.is_empty() {
                return HashMap::new();
            }
            self.pseudonymize_response.lock().unwrap().clone()
        }

        async fn depseudonymize(
            &self,
            values: HashMap<String, String>,
        ) -> HashMap<String, String> {
            if values.is_empty() {
                return HashMap::new();
            }
            self.depseudonymize_response.lock().unwrap().clone()
        }

        async fn test_connection(&self) -> Result<()> {
            Ok(())
        }
    }

    fn sample_dataset() -> InMemDicomObject {
        let mut ds = InMemDicomObject::new_empty();
        ds.put(DataElement::new(
            tags::PATIENT_NAME,
            VR::PN,
            PrimitiveValue::from("John^Doe"),
        ));
        ds.put(DataElement::new(
            tags::PATIENT_ID,
            VR::LO,
            PrimitiveValue::from("123456"),
        ));
        ds.put(DataElement::new(
            tags::STUDY_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from("1.2.3.4.5"),
        ));
        ds
    }

    #[tokio::test]
    async fn shield_retrieve_clears_identifying_and_pseudonymizes() {
        let client = FakeClient {
            pseudonymize_response: Mutex::new(HashMap::from([
                ("123456".to_string(), "PSEUDO-PID".to_string()),
                ("1.2.3.4.5".to_string(), "PSEUDO-UID".to_string()),
            ])),
            depseudonymize_response: Mutex::new(HashMap::new()),
        };
        let shield = Shield::new(Arc::new(client));

        let shielded = shield.shield_retrieve(sample_dataset()).await;

        assert!(shielded.anonymized);
        let name = shielded
            .dataset
            .get(tags::PATIENT_NAME)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(name, "");

        let pid = shielded
            .dataset
            .get(tags::PATIENT_ID)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(pid, "PSEUDO-PID");
        assert_ne!(pid, "123456");
    }

    #[tokio::test]
    async fn shield_retrieve_sentinels_unmapped_values() {
        let client = FakeClient {
            pseudonymize_response: Mutex::new(HashMap::new()),
            depseudonymize_response: Mutex::new(HashMap::new()),
        };
        let shield = Shield::new(Arc::new(client));

        let shielded = shield.shield_retrieve(sample_dataset()).await;

        let pid = shielded
            .dataset
            .get(tags::PATIENT_ID)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(pid, LOOKUP_MISS_SENTINEL);
        assert_ne!(pid, "123456");
    }

    #[tokio::test]
    async fn empty_dataset_never_calls_service() {
        let client = FakeClient {
            pseudonymize_response: Mutex::new(HashMap::from([(
                "should-not-be-returned".to_string(),
                "x".to_string(),
            )])),
            depseudonymize_response: Mutex::new(HashMap::new()),
        };
        let shield = Shield::new(Arc::new(client));

        let shielded = shield.shield_retrieve(InMemDicomObject::new_empty()).await;
        assert!(shielded.dataset.get(tags::PATIENT_ID).is_none());
    }

    #[test]
    fn shield_store_is_identity() {
        let client = FakeClient {
            pseudonymize_response: Mutex::new(HashMap::new()),
            depseudonymize_response: Mutex::new(HashMap::new()),
        };
        let shield = Shield::new(Arc::new(client));
        let ds = sample_dataset();
        let before = ds.get(tags::PATIENT_NAME).unwrap().to_str().unwrap().into_owned();
        let after = shield.shield_store(ds);
        let after_name = after.get(tags::PATIENT_NAME).unwrap().to_str().unwrap();
        assert_eq!(before, after_name);
    }
}
