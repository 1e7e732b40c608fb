use k8s_openapi::api::core::v1::{Node, Taint};

use crate::ownership;
use crate::taints::{self, taint_string, taints_match};
use crate::{Delta, Outcome, Result};

/// Brings a node's taints into agreement with the desired taint directives.
///
/// Directives are `key=value:effect` forms to add and `-`-suffixed forms to
/// remove; a taint slot is its (key, effect) pair. Taints this operator
/// added earlier that no longer appear among the additions are removed as
/// well, so dropping a directive from the config undoes it. Third-party
/// taints are preserved unless a directive names their slot. Parse failures
/// abort the pass; the caller persists the mutated node.
pub fn reconcile(node: &mut Node, directives: &[String]) -> Result<Outcome> {
    let (to_add, mut to_remove) = taints::parse_taints(directives)?;

    // Release owned slots: explicitly when a removal directive names them,
    // implicitly when no addition claims them anymore.
    for owned_taint in ownership::owned_taints(node)? {
        if to_remove.iter().any(|r| taints_match(r, &owned_taint)) {
            continue;
        }
        if !to_add.iter().any(|a| taints_match(a, &owned_taint)) {
            to_remove.push(owned_taint);
        }
    }

    let current: Vec<Taint> = node
        .spec
        .as_ref()
        .and_then(|spec| spec.taints.clone())
        .unwrap_or_default();

    let mut delta = Delta::new();

    // Keep only removals whose slot is physically present; a slot that is
    // already gone is not an error.
    let mut net_remove = Vec::with_capacity(to_remove.len());
    for removal in to_remove {
        if taints::taint_exists(&current, &removal) {
            delta.insert(taint_string(&removal), "removed".to_string());
            net_remove.push(removal);
        }
    }

    // Classify additions against the live taints: identical taint is a
    // no-op, same slot with another value is a change, new slot an add.
    let mut net_add = Vec::with_capacity(to_add.len());
    'additions: for addition in &to_add {
        for existing in &current {
            if taints_match(existing, addition) {
                if taint_string(existing) != taint_string(addition) {
                    delta.insert(taint_string(addition), "changed".to_string());
                    net_add.push(addition.clone());
                }
                continue 'additions;
            }
        }
        delta.insert(taint_string(addition), "added".to_string());
        net_add.push(addition.clone());
    }

    if net_add.is_empty() && net_remove.is_empty() {
        return Ok(Outcome::Unchanged);
    }

    // Removals were pre-filtered against the live taints, so reorganizing
    // cannot report missing slots here.
    let (_, new_taints, _) = taints::reorganize_taints(&current, false, &net_add, &net_remove);
    node.spec.get_or_insert_with(Default::default).taints = if new_taints.is_empty() {
        None
    } else {
        Some(new_taints)
    };
    ownership::record_owned_taints(node, &to_add);
    Ok(Outcome::Updated(delta))
}
