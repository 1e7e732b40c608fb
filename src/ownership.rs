use k8s_openapi::api::core::v1::{Node, Taint};
use std::collections::BTreeSet;

use crate::taints::{self, taint_string};
use crate::{
    Error, Result, ADDED_LABELS_ANNOTATION, ADDED_TAINTS_ANNOTATION, ANNOTATION_VALUE_SEPARATOR,
};

/// Label keys this operator previously wrote to the node, decoded from the
/// ownership annotation. Absent or empty annotation means nothing is owned.
pub fn owned_labels(node: &Node) -> BTreeSet<String> {
    decode(node, ADDED_LABELS_ANNOTATION)
}

/// Records the owned label keys on the node, sorted and comma-joined.
pub fn record_owned_labels(node: &mut Node, owned: &BTreeSet<String>) {
    record(node, ADDED_LABELS_ANNOTATION, owned.iter().cloned());
}

/// Taints this operator previously wrote to the node, re-parsed from their
/// stored string forms. The annotation is writable by anyone with node
/// access, so a stored entry that no longer parses as a single addition is
/// an error rather than a panic.
pub fn owned_taints(node: &Node) -> Result<Vec<Taint>> {
    let mut owned = Vec::new();
    for entry in decode(node, ADDED_TAINTS_ANNOTATION) {
        let (mut added, removed) = taints::parse_taints(std::slice::from_ref(&entry))
            .map_err(|_| Error::InvalidOwnedTaint(entry.clone()))?;
        if added.len() != 1 || !removed.is_empty() {
            return Err(Error::InvalidOwnedTaint(entry));
        }
        owned.push(added.remove(0));
    }
    Ok(owned)
}

/// Records the owned taints on the node as their sorted string forms.
pub fn record_owned_taints(node: &mut Node, owned: &[Taint]) {
    record(node, ADDED_TAINTS_ANNOTATION, owned.iter().map(taint_string));
}

fn decode(node: &Node, annotation: &str) -> BTreeSet<String> {
    match node
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotation))
    {
        // "".split(',') yields one empty entry, so guard the empty value.
        Some(value) if !value.is_empty() => value
            .split(ANNOTATION_VALUE_SEPARATOR)
            .map(str::to_string)
            .collect(),
        _ => BTreeSet::new(),
    }
}

fn record<I>(node: &mut Node, annotation: &str, values: I)
where
    I: IntoIterator<Item = String>,
{
    let sorted: BTreeSet<String> = values.into_iter().collect();
    let joined = sorted
        .into_iter()
        .collect::<Vec<_>>()
        .join(ANNOTATION_VALUE_SEPARATOR);
    node.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(annotation.to_string(), joined);
}
