use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Which parameters the bot may touch, and how `yes`/`no` values are treated.
///
/// Fields missing from a config file fall back to the managed defaults.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExclusionPolicy {
    /// Supplied upstream but never allowed to overwrite the page value.
    pub excluded: BTreeSet<String>,
    /// Parameters where a literal `no` is a real value rather than "absent".
    pub keep_if_no: BTreeSet<String>,
    /// Parameters where `yes` means the parameter should disappear.
    pub delete_if_yes: BTreeSet<String>,
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self {
            excluded: ["damage_res", "loyalty", "version_added"]
                .into_iter()
                .map(ToString::to_string)
                .collect(),
            keep_if_no: BTreeSet::new(),
            delete_if_yes: ["warp_drive"].into_iter().map(ToString::to_string).collect(),
        }
    }
}

impl ExclusionPolicy {
    pub fn empty() -> Self {
        Self {
            excluded: BTreeSet::new(),
            keep_if_no: BTreeSet::new(),
            delete_if_yes: BTreeSet::new(),
        }
    }

    pub fn is_excluded(&self, key: &str) -> bool {
        self.excluded.contains(key)
    }

    /// True when `value` marks `key` for removal rather than update.
    pub fn marks_deletion(&self, key: &str, value: &str) -> bool {
        let value = value.trim();
        (value.eq_ignore_ascii_case("no") && !self.keep_if_no.contains(key))
            || (value.eq_ignore_ascii_case("yes") && self.delete_if_yes.contains(key))
    }
}
