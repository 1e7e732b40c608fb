use k8s_openapi::api::core::v1::Taint;
use std::collections::BTreeSet;

use crate::validation;
use crate::{Error, Result};

pub const NO_SCHEDULE: &str = "NoSchedule";
pub const PREFER_NO_SCHEDULE: &str = "PreferNoSchedule";
pub const NO_EXECUTE: &str = "NoExecute";

/// Summary of what [`reorganize_taints`] did to a node's taint list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaintOperation {
    /// Taints were both added and removed, or `overwrite` forced a rewrite.
    Modified,
    /// Taints were only added.
    Tainted,
    /// Nothing was added; removals, if any, may still have applied.
    Untainted,
}

/// Splits taint directives into taints to add and taints to remove (the
/// `-`-suffixed directives). Additions must carry an effect and be unique by
/// (key, effect); removals keep only key and effect, never a value.
pub fn parse_taints(directives: &[String]) -> Result<(Vec<Taint>, Vec<Taint>)> {
    let mut to_add = Vec::new();
    let mut to_remove = Vec::new();
    let mut seen_slots: BTreeSet<(String, String)> = BTreeSet::new();

    for directive in directives {
        if let Some(stripped) = directive.strip_suffix('-') {
            let parsed = parse_taint(stripped)?;
            to_remove.push(Taint {
                key: parsed.key,
                effect: parsed.effect,
                value: None,
                time_added: None,
            });
        } else {
            let taint = parse_taint(directive)?;
            if taint.effect.is_empty() {
                return Err(Error::InvalidTaintSpec(directive.clone()));
            }
            if !seen_slots.insert((taint.key.clone(), taint.effect.clone())) {
                return Err(Error::DuplicateTaint(taint_string(&taint)));
            }
            to_add.push(taint);
        }
    }

    Ok((to_add, to_remove))
}

/// Parses a single taint whose form must be `<key>=<value>:<effect>`,
/// `<key>:<effect>` or `<key>`. A value is only legal alongside an effect:
/// without one, the whole string is taken as the key and must validate as
/// a qualified name.
fn parse_taint(spec: &str) -> Result<Taint> {
    let parts: Vec<&str> = spec.split(':').collect();
    let mut key = parts[0];
    let mut value = "";
    let mut effect = String::new();

    match parts.len() {
        1 => {}
        2 => {
            validate_taint_effect(parts[1])?;
            effect = parts[1].to_string();

            let kv: Vec<&str> = parts[0].split('=').collect();
            if kv.len() > 2 {
                return Err(Error::InvalidTaintSpec(spec.to_string()));
            }
            key = kv[0];
            if kv.len() == 2 {
                value = kv[1];
                let errs = validation::label_value_errors(value);
                if !errs.is_empty() {
                    return Err(Error::InvalidTaintSpec(format!(
                        "{}, {}",
                        spec,
                        errs.join("; ")
                    )));
                }
            }
        }
        _ => return Err(Error::InvalidTaintSpec(spec.to_string())),
    }

    let errs = validation::qualified_name_errors(key);
    if !errs.is_empty() {
        return Err(Error::InvalidTaintSpec(format!(
            "{}, {}",
            spec,
            errs.join("; ")
        )));
    }

    Ok(Taint {
        key: key.to_string(),
        value: if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        },
        effect,
        time_added: None,
    })
}

fn validate_taint_effect(effect: &str) -> Result<()> {
    if effect != NO_SCHEDULE && effect != PREFER_NO_SCHEDULE && effect != NO_EXECUTE {
        return Err(Error::InvalidTaintEffect(effect.to_string()));
    }
    Ok(())
}

/// Canonical string form of a taint: `<key>=<value>:<effect>`,
/// `<key>=<value>`, `<key>:<effect>` or `<key>` depending on which parts
/// are present.
pub fn taint_string(taint: &Taint) -> String {
    let value = taint.value.as_deref().unwrap_or("");
    match (value.is_empty(), taint.effect.is_empty()) {
        (true, true) => taint.key.clone(),
        (true, false) => format!("{}:{}", taint.key, taint.effect),
        (false, true) => format!("{}={}", taint.key, value),
        (false, false) => format!("{}={}:{}", taint.key, value, taint.effect),
    }
}

/// Slot equality: two taints are the same taint iff key and effect both
/// match. The value never participates.
pub fn taints_match(left: &Taint, right: &Taint) -> bool {
    left.key == right.key && left.effect == right.effect
}

/// Whether any taint in the list occupies the same slot as `candidate`.
pub fn taint_exists(taints: &[Taint], candidate: &Taint) -> bool {
    taints.iter().any(|t| taints_match(t, candidate))
}

/// Symmetric difference of two taint lists by slot identity.
pub fn taint_set_diff<'a>(
    left: &'a [Taint],
    right: &'a [Taint],
) -> (Vec<&'a Taint>, Vec<&'a Taint>) {
    let only_left = left.iter().filter(|t| !taint_exists(right, t)).collect();
    let only_right = right.iter().filter(|t| !taint_exists(left, t)).collect();
    (only_left, only_right)
}

/// Removes every taint occupying the same slot as `to_delete`. The flag
/// reports whether anything was actually removed.
pub fn delete_taint(taints: &[Taint], to_delete: &Taint) -> (Vec<Taint>, bool) {
    let kept: Vec<Taint> = taints
        .iter()
        .filter(|t| !taints_match(t, to_delete))
        .cloned()
        .collect();
    let deleted = kept.len() != taints.len();
    (kept, deleted)
}

/// Removes every taint with the given key, regardless of effect.
pub fn delete_taints_by_key(taints: &[Taint], key: &str) -> (Vec<Taint>, bool) {
    let kept: Vec<Taint> = taints.iter().filter(|t| t.key != key).cloned().collect();
    let deleted = kept.len() != taints.len();
    (kept, deleted)
}

/// Rebuilds a node's taint list: starts from `to_add`, keeps every current
/// taint whose slot is not claimed by an addition, then applies removals.
/// An effect-less removal deletes by key across all effects. Removals that
/// delete nothing are collected as [`Error::TaintNotFound`] without aborting
/// the rest; the rebuilt list is valid either way.
pub fn reorganize_taints(
    current: &[Taint],
    overwrite: bool,
    to_add: &[Taint],
    to_remove: &[Taint],
) -> (TaintOperation, Vec<Taint>, Vec<Error>) {
    let mut new_taints: Vec<Taint> = to_add.to_vec();
    for old in current {
        if !taint_exists(&new_taints, old) {
            new_taints.push(old.clone());
        }
    }
    let added = new_taints.len() != current.len();

    let mut errors = Vec::new();
    let mut deleted = false;
    for removal in to_remove {
        let (kept, removed) = if !removal.effect.is_empty() {
            delete_taint(&new_taints, removal)
        } else {
            delete_taints_by_key(&new_taints, &removal.key)
        };
        new_taints = kept;
        deleted |= removed;
        if !removed {
            errors.push(Error::TaintNotFound(taint_string(removal)));
        }
    }

    let operation = if (added && deleted) || overwrite {
        TaintOperation::Modified
    } else if added {
        TaintOperation::Tainted
    } else {
        TaintOperation::Untainted
    };

    (operation, new_taints, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taint(key: &str, value: Option<&str>, effect: &str) -> Taint {
        Taint {
            key: key.to_string(),
            value: value.map(str::to_string),
            effect: effect.to_string(),
            time_added: None,
        }
    }

    fn specs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_taints_valid_specs() {
        // Full form, value-less form, and empty-value form as additions.
        let (add, remove) =
            parse_taints(&specs(&["foo=abc:NoSchedule", "bar:NoExecute", "qux=:NoSchedule"]))
                .unwrap();
        assert_eq!(
            add,
            vec![
                taint("foo", Some("abc"), NO_SCHEDULE),
                taint("bar", None, NO_EXECUTE),
                taint("qux", None, NO_SCHEDULE),
            ]
        );
        assert!(remove.is_empty());

        // Removals keep key and effect only; a bare key removal drops the
        // effect entirely.
        let (add, remove) =
            parse_taints(&specs(&["foo=abc:NoSchedule-", "bar:NoExecute-", "qux-"])).unwrap();
        assert!(add.is_empty());
        assert_eq!(
            remove,
            vec![
                taint("foo", None, NO_SCHEDULE),
                taint("bar", None, NO_EXECUTE),
                taint("qux", None, ""),
            ]
        );

        // Same key under two different effects is not a duplicate.
        let (add, _) =
            parse_taints(&specs(&["dedicated=gpu:NoSchedule", "dedicated=gpu:NoExecute"]))
                .unwrap();
        assert_eq!(add.len(), 2);
    }

    #[test]
    fn parse_taints_invalid_specs() {
        let invalid: &[&[&str]] = &[
            &[""],
            &["foo=abc"],                          // addition without an effect
            &["foo"],                              // ditto
            &["foo=abc-"],                         // removal value requires an effect
            &["foo=abc=xyz:NoSchedule"],           // too many '='
            &["foo=abc:xyz:NoSchedule"],           // too many ':'
            &["foo=abc:XYZ"],                      // unknown effect
            &["foo=abc:XYZ-"],                     // unknown effect on removal
            &["-foo=abc:NoSchedule"],              // key fails validation
            &["foo=a bc:NoSchedule"],              // value fails validation
            &["foo=abc:NoSchedule", "foo=xyz:NoSchedule"], // duplicate slot
        ];
        for case in invalid {
            assert!(
                parse_taints(&specs(case)).is_err(),
                "{:?} should fail to parse",
                case
            );
        }

        // Duplicate slot detection only applies to additions.
        assert!(parse_taints(&specs(&["foo:NoSchedule", "foo:NoSchedule-"])).is_ok());
    }

    #[test]
    fn taint_string_forms() {
        assert_eq!(
            taint_string(&taint("foo", Some("abc"), NO_SCHEDULE)),
            "foo=abc:NoSchedule"
        );
        assert_eq!(taint_string(&taint("foo", None, NO_SCHEDULE)), "foo:NoSchedule");
        assert_eq!(taint_string(&taint("foo", Some("abc"), "")), "foo=abc");
        assert_eq!(taint_string(&taint("foo", None, "")), "foo");
    }

    #[test]
    fn taint_exists_matches_slot_not_value() {
        let taints = vec![
            taint("foo", Some("abc"), NO_SCHEDULE),
            taint("bar", None, NO_EXECUTE),
        ];
        assert!(taint_exists(&taints, &taint("foo", Some("other"), NO_SCHEDULE)));
        assert!(taint_exists(&taints, &taint("bar", Some("any"), NO_EXECUTE)));
        assert!(!taint_exists(&taints, &taint("foo", Some("abc"), NO_EXECUTE)));
        assert!(!taint_exists(&taints, &taint("baz", None, NO_SCHEDULE)));
        // An empty effect only matches an empty effect.
        assert!(!taint_exists(&taints, &taint("foo", None, "")));
    }

    #[test]
    fn delete_taint_by_slot() {
        let taints = vec![
            taint("foo", Some("abc"), NO_SCHEDULE),
            taint("foo", Some("abc"), NO_EXECUTE),
        ];
        let (kept, deleted) = delete_taint(&taints, &taint("foo", None, NO_SCHEDULE));
        assert!(deleted);
        assert_eq!(kept, vec![taint("foo", Some("abc"), NO_EXECUTE)]);

        let (kept, deleted) = delete_taint(&taints, &taint("absent", None, NO_SCHEDULE));
        assert!(!deleted);
        assert_eq!(kept, taints);
    }

    #[test]
    fn delete_taints_by_key_ignores_effect() {
        let taints = vec![
            taint("foo", Some("abc"), NO_SCHEDULE),
            taint("foo", None, NO_EXECUTE),
            taint("bar", None, NO_SCHEDULE),
        ];
        let (kept, deleted) = delete_taints_by_key(&taints, "foo");
        assert!(deleted);
        assert_eq!(kept, vec![taint("bar", None, NO_SCHEDULE)]);

        let (kept, deleted) = delete_taints_by_key(&taints, "absent");
        assert!(!deleted);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn taint_set_diff_by_slot() {
        let left = vec![
            taint("foo", Some("v1"), NO_SCHEDULE),
            taint("bar", None, NO_EXECUTE),
        ];
        let right = vec![
            taint("foo", Some("v2"), NO_SCHEDULE), // same slot, other value
            taint("baz", None, NO_SCHEDULE),
        ];
        let (only_left, only_right) = taint_set_diff(&left, &right);
        assert_eq!(only_left, vec![&left[1]]);
        assert_eq!(only_right, vec![&right[1]]);
    }

    #[test]
    fn reorganize_adds_and_removes() {
        let current = vec![taint("old", Some("v"), NO_SCHEDULE)];

        // Pure addition.
        let (op, taints, errs) = reorganize_taints(
            &current,
            false,
            &[taint("new", Some("v"), NO_EXECUTE)],
            &[],
        );
        assert_eq!(op, TaintOperation::Tainted);
        assert_eq!(taints.len(), 2);
        assert!(errs.is_empty());

        // Add one, remove another.
        let (op, taints, errs) = reorganize_taints(
            &current,
            false,
            &[taint("new", Some("v"), NO_EXECUTE)],
            &[taint("old", None, NO_SCHEDULE)],
        );
        assert_eq!(op, TaintOperation::Modified);
        assert_eq!(taints, vec![taint("new", Some("v"), NO_EXECUTE)]);
        assert!(errs.is_empty());

        // Pure removal.
        let (op, taints, errs) =
            reorganize_taints(&current, false, &[], &[taint("old", None, NO_SCHEDULE)]);
        assert_eq!(op, TaintOperation::Untainted);
        assert!(taints.is_empty());
        assert!(errs.is_empty());

        // Effect-less removal deletes across effects.
        let two_effects = vec![
            taint("old", Some("v"), NO_SCHEDULE),
            taint("old", Some("v"), NO_EXECUTE),
        ];
        let (_, taints, errs) =
            reorganize_taints(&two_effects, false, &[], &[taint("old", None, "")]);
        assert!(taints.is_empty());
        assert!(errs.is_empty());
    }

    #[test]
    fn reorganize_reports_missing_removals_without_aborting() {
        let current = vec![taint("old", Some("v"), NO_SCHEDULE)];
        let (op, taints, errs) = reorganize_taints(
            &current,
            false,
            &[taint("new", None, NO_SCHEDULE)],
            &[taint("ghost", None, NO_EXECUTE), taint("old", None, NO_SCHEDULE)],
        );
        // The missing slot is reported but the rest still applies.
        assert_eq!(errs.len(), 1);
        assert_eq!(op, TaintOperation::Modified);
        assert_eq!(taints, vec![taint("new", None, NO_SCHEDULE)]);
    }

    #[test]
    fn reorganize_overwrite_is_always_modified() {
        let current = vec![taint("foo", Some("v1"), NO_SCHEDULE)];
        let (op, taints, errs) = reorganize_taints(
            &current,
            true,
            &[taint("foo", Some("v2"), NO_SCHEDULE)],
            &[],
        );
        assert_eq!(op, TaintOperation::Modified);
        assert_eq!(taints, vec![taint("foo", Some("v2"), NO_SCHEDULE)]);
        assert!(errs.is_empty());
    }

    #[test]
    fn reorganize_value_change_claims_the_slot() {
        // An addition for an occupied slot replaces the old value because the
        // rebuilt list starts from the additions.
        let current = vec![
            taint("foo", Some("v1"), NO_SCHEDULE),
            taint("bar", None, NO_EXECUTE),
        ];
        let (_, taints, _) = reorganize_taints(
            &current,
            false,
            &[taint("foo", Some("v2"), NO_SCHEDULE)],
            &[],
        );
        assert_eq!(
            taints,
            vec![
                taint("foo", Some("v2"), NO_SCHEDULE),
                taint("bar", None, NO_EXECUTE),
            ]
        );
    }
}
