use std::collections::BTreeSet;

use anyhow::{Context, Result};
use regex::Regex;

use crate::error::UpdateError;
use crate::merge::merge;
use crate::parser::{InfoboxTemplate, ParameterMap};
use crate::policy::ExclusionPolicy;
use crate::sanitize::sanitize;
use crate::serializer::{render, replace_block};

pub const DEFAULT_IGNORE_MARKER: &str = "ketchupbot-ignore";
pub const SUMMARY_PREFIX: &str = "Automated ship data update.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    UpToDate,
    Changed(PageChange),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageChange {
    pub new_text: String,
    pub summary: String,
    pub updated_keys: BTreeSet<String>,
    pub removed_keys: BTreeSet<String>,
    pub old_block: String,
    pub new_block: String,
}

/// The pure part of a record update: page text plus feed data in, new page
/// text (or "nothing to do") out. Performs no I/O.
#[derive(Debug, Clone)]
pub struct Reconciler {
    template: InfoboxTemplate,
    policy: ExclusionPolicy,
    ignore_marker: Regex,
}

impl Reconciler {
    pub fn new(template: InfoboxTemplate, policy: ExclusionPolicy, ignore_marker: &str) -> Result<Self> {
        let pattern = format!(r"(?i)<!--\s*{}\s*-->", regex::escape(ignore_marker.trim()));
        let ignore_marker = Regex::new(&pattern)
            .with_context(|| format!("failed to compile ignore marker pattern for {ignore_marker}"))?;
        Ok(Self {
            template,
            policy,
            ignore_marker,
        })
    }

    pub fn template(&self) -> &InfoboxTemplate {
        &self.template
    }

    pub fn policy(&self) -> &ExclusionPolicy {
        &self.policy
    }

    pub fn has_ignore_flag(&self, page: &str) -> bool {
        self.ignore_marker.is_match(page)
    }

    pub fn reconcile(
        &self,
        page: &str,
        incoming: &ParameterMap,
    ) -> Result<Reconciliation, UpdateError> {
        if self.has_ignore_flag(page) {
            return Err(UpdateError::IgnoreFlagPresent);
        }

        let block = self.template.extract_block(page)?;
        let parsed = self.template.parse(block)?;
        let merged = merge(&parsed, incoming, &self.policy);
        let sanitized = sanitize(&merged.merged, &parsed, &self.policy);
        if sanitized.sanitized == parsed {
            return Ok(Reconciliation::UpToDate);
        }

        let new_block = render(&self.template, &sanitized.sanitized);
        let new_text = replace_block(&self.template, page, &new_block);
        if new_text == page {
            return Ok(Reconciliation::UpToDate);
        }

        Ok(Reconciliation::Changed(PageChange {
            summary: edit_summary(&merged.updated_keys, &sanitized.removed_keys),
            new_text,
            updated_keys: merged.updated_keys,
            removed_keys: sanitized.removed_keys,
            old_block: block.to_string(),
            new_block: new_block.replace("$$", "$"),
        }))
    }
}

/// `Automated ship data update.` followed by the removed, then updated, keys.
pub fn edit_summary(updated: &BTreeSet<String>, removed: &BTreeSet<String>) -> String {
    let mut summary = SUMMARY_PREFIX.to_string();
    if !removed.is_empty() {
        let keys: Vec<&str> = removed.iter().map(String::as_str).collect();
        summary.push_str(&format!(" Removed parameters: {}.", keys.join(", ")));
    }
    let updated: Vec<&str> = updated
        .iter()
        .filter(|key| !removed.contains(*key))
        .map(String::as_str)
        .collect();
    if !updated.is_empty() {
        summary.push_str(&format!(" Updated parameters: {}.", updated.join(", ")));
    }
    summary
}
