//! Kubernetes event emission for Machine state changes.
//!
//! One `Recorder` per reconcile, scoped to the Machine being reconciled, in
//! the shape the broader operator ecosystem uses: `Reporter` identifies
//! this controller, `Recorder::new` binds it to one object reference, and
//! each state transition publishes a named `Event`.

use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};

pub fn recorder_for<K>(client: Client, reporter: Reporter, obj: &K) -> Recorder
where
    K: Resource<DynamicType = ()>,
{
    Recorder::new(client, reporter, obj.object_ref(&()))
}

pub async fn publish(recorder: &Recorder, reason: &str, note: impl Into<String>) {
    let _ = recorder
        .publish(Event {
            type_: EventType::Normal,
            reason: reason.to_string(),
            note: Some(note.into()),
            action: "Reconciling".to_string(),
            secondary: None,
        })
        .await;
}

pub async fn publish_warning(recorder: &Recorder, reason: &str, note: impl Into<String>) {
    let _ = recorder
        .publish(Event {
            type_: EventType::Warning,
            reason: reason.to_string(),
            note: Some(note.into()),
            action: "Reconciling".to_string(),
            secondary: None,
        })
        .await;
}

pub const CREATED: &str = "Created";
pub const INSTANCE_FOUND: &str = "InstanceFound";
pub const LABELS_ANNOTATIONS_TAINTS_UPDATED: &str = "LabelsAnnotationsTaintsUpdated";
pub const PROVIDER_ID_UPDATED: &str = "ProviderIDUpdated";
pub const RECONCILING_ERROR: &str = "ReconcilingError";
