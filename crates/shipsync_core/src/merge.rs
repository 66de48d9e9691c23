use std::collections::BTreeSet;

use crate::parser::ParameterMap;
use crate::policy::ExclusionPolicy;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeResult {
    pub merged: ParameterMap,
    /// Keys whose value the feed actually changed, for the edit summary.
    pub updated_keys: BTreeSet<String>,
}

/// Overlay `incoming` onto `existing`; hand-authored keys the feed lacks survive.
///
/// `title` and deletion markers (`no`, or `yes` for delete-if-yes keys) are
/// merged but never reported as updates.
pub fn merge(
    existing: &ParameterMap,
    incoming: &ParameterMap,
    policy: &ExclusionPolicy,
) -> MergeResult {
    let mut merged = existing.clone();
    let mut updated_keys = BTreeSet::new();

    for (key, value) in incoming {
        if policy.is_excluded(key) {
            continue;
        }
        let changed = existing.get(key) != Some(value);
        if changed && key != "title" && !policy.marks_deletion(key, value) {
            updated_keys.insert(key.clone());
        }
        merged.insert(key.clone(), value.clone());
    }

    MergeResult {
        merged,
        updated_keys,
    }
}
