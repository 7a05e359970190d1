//! The dataset queue (component C): carries shielded instances between the
//! internal C-STORE receiver and the outbound C-MOVE/C-GET relay loop.
//!
//! Kept as a process-wide registry of *per-operation* bounded channels
//! rather than one global FIFO (see the design notes this implementation
//! recorded about concurrent MOVE/GET interleaving): every in-flight
//! retrieval registers a fresh channel keyed by a correlation id before it
//! sends its C-MOVE/C-GET upstream, and the internal listener routes each
//! arriving sub-operation to that channel using the MoveOriginatorMessageID
//! DICOM stamps onto it.

use dicom_object::InMemDicomObject;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Default channel capacity when a caller doesn't override it via
/// `QUEUE_CAPACITY` (see the config's ambient fields).
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

static REGISTRY: Lazy<Mutex<HashMap<u16, mpsc::Sender<InMemDicomObject>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// The sending half handed to the internal C-STORE listener's caller via
/// [`register`]; also usable directly by a caller that enqueues inline.
pub type QueueSender = mpsc::Sender<InMemDicomObject>;
/// The receiving half the MOVE/GET relay loop drains.
pub type QueueReceiver = mpsc::Receiver<InMemDicomObject>;

/// Registers a new per-operation queue under `correlation_id` (the
/// MoveOriginatorMessageID this proxy stamped on the outbound C-MOVE/C-GET),
/// returning the receiving half. The sending half is retained in the
/// process-wide registry so the internal listener can look it up.
pub fn register(correlation_id: u16, capacity: usize) -> QueueReceiver {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    REGISTRY.lock().unwrap().insert(correlation_id, tx);
    rx
}

/// Looks up the sender for `correlation_id`, used by the internal C-STORE
/// listener to route a sub-operation's dataset to its owning MOVE/GET. A
/// miss means the C-STORE wasn't a tracked sub-operation (e.g. a direct
/// client store that hit the internal listener by mistake, or a MOVE whose
/// relay already finished and deregistered).
pub fn lookup(correlation_id: u16) -> Option<QueueSender> {
    REGISTRY.lock().unwrap().get(&correlation_id).cloned()
}

/// Removes the queue for `correlation_id` once its MOVE/GET relay has
/// finished draining it (success, client abort, or upstream failure). Idle
/// registrations would otherwise accumulate for the life of the process.
pub fn deregister(correlation_id: u16) {
    REGISTRY.lock().unwrap().remove(&correlation_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicom_core::{DataElement, PrimitiveValue, VR};
    use dicom_dictionary_std::tags;

    fn sample() -> InMemDicomObject {
        let mut ds = InMemDicomObject::new_empty();
        ds.put(DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3")));
        ds
    }

    #[tokio::test]
    async fn register_lookup_and_drain_roundtrip() {
        let correlation_id = 4242;
        let mut rx = register(correlation_id, 4);

        let tx = lookup(correlation_id).expect("sender should be registered");
        tx.send(sample()).await.unwrap();

        let received = rx.recv().await.expect("queue should yield the enqueued dataset");
        assert_eq!(
            received.get(tags::SOP_INSTANCE_UID).unwrap().to_str().unwrap(),
            "1.2.3"
        );

        deregister(correlation_id);
        assert!(lookup(correlation_id).is_none());
    }

    #[test]
    fn lookup_miss_on_unknown_correlation_id() {
        assert!(lookup(99999).is_none());
    }
}
