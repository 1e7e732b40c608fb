use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Node;

use crate::ownership;
use crate::{Delta, Outcome, REMOVED_LABEL_MARKER};

/// Brings a node's labels into agreement with the desired label set.
///
/// Labels this operator added earlier that are gone from the desired set are
/// deleted and released. Every desired label is written and claimed, even
/// over a third-party value; a label already owned with the desired value is
/// left alone. Labels never claimed and not desired are not touched. The
/// node is only mutated when something changes; the caller persists it.
pub fn reconcile(node: &mut Node, desired: &BTreeMap<String, String>) -> Outcome {
    let mut owned = ownership::owned_labels(node);
    let mut labels = node.metadata.labels.clone().unwrap_or_default();
    let mut delta = Delta::new();

    // A label we added was dropped from the config: delete and release it.
    for key in owned.clone() {
        if !desired.contains_key(&key) {
            labels.remove(&key);
            owned.remove(&key);
            delta.insert(key, REMOVED_LABEL_MARKER.to_string());
        }
    }

    for (key, value) in desired {
        // Already ours with the desired value, skip.
        if owned.contains(key) && labels.get(key) == Some(value) {
            continue;
        }
        owned.insert(key.clone());
        labels.insert(key.clone(), value.clone());
        delta.insert(key.clone(), value.clone());
    }

    if delta.is_empty() {
        return Outcome::Unchanged;
    }
    node.metadata.labels = Some(labels);
    ownership::record_owned_labels(node, &owned);
    Outcome::Updated(delta)
}
