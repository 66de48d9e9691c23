use std::collections::BTreeMap;
use std::ops::Range;

use anyhow::{Context, Result, bail};
use regex::Regex;

use crate::error::UpdateError;
use crate::tokenizer;

/// Infobox parameters keyed by name; iteration is alphabetical.
pub type ParameterMap = BTreeMap<String, String>;

pub const DEFAULT_TEMPLATE_NAME: &str = "Ship Infobox";

/// Outermost template plus one level of nested templates inside a value.
const MAX_TEMPLATE_DEPTH: usize = 2;

/// Locates and parses one named template (by default `{{Ship Infobox}}`).
///
/// Header matching ignores case and treats spaces and underscores in the name
/// as interchangeable, the same way MediaWiki resolves template titles.
#[derive(Debug, Clone)]
pub struct InfoboxTemplate {
    name: String,
    header: Regex,
    gallery: Regex,
}

impl InfoboxTemplate {
    pub fn new(name: &str) -> Result<Self> {
        let words: Vec<String> = name
            .split([' ', '_'])
            .filter(|word| !word.is_empty())
            .map(regex::escape)
            .collect();
        if words.is_empty() {
            bail!("template name cannot be empty");
        }
        let pattern = format!(r"(?i)\{{\{{\s*{}", words.join("[ _]+"));
        let header = Regex::new(&pattern)
            .with_context(|| format!("failed to compile header pattern for template {name}"))?;
        let gallery =
            Regex::new(r"(?s)<gallery.*?>.*?</gallery>").context("failed to compile gallery pattern")?;

        Ok(Self {
            name: name.trim().to_string(),
            header,
            gallery,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Byte range of the first well-formed instance of this template in `page`.
    pub fn locate(&self, page: &str) -> Option<Range<usize>> {
        self.header.find_iter(page).find_map(|header| {
            let rest = &page[header.end()..];
            let continues_name = rest
                .chars()
                .next()
                .is_some_and(|next| next.is_alphanumeric() || next == '_' || next == '-');
            if continues_name {
                return None;
            }
            closing_offset(page, header.end()).map(|end| header.start()..end)
        })
    }

    /// The raw `{{Template ... }}` text of the first instance in `page`.
    pub fn extract_block<'a>(&self, page: &'a str) -> Result<&'a str, UpdateError> {
        self.locate(page)
            .map(|range| &page[range])
            .ok_or_else(|| UpdateError::NotFound(self.name.clone()))
    }

    /// Parse a template block into its named parameters.
    ///
    /// Positional fields (no `=`) are ignored, keys and values are trimmed and a
    /// later duplicate replaces an earlier one. A gallery `image` is restored
    /// verbatim from `template_text`, since its inner pipes split the value.
    pub fn parse(&self, template_text: &str) -> Result<ParameterMap, UpdateError> {
        let body = template_text
            .strip_prefix("{{")
            .and_then(|inner| inner.strip_suffix("}}"))
            .unwrap_or(template_text);

        let mut parameters = ParameterMap::new();
        for field in tokenizer::split(body).into_iter().skip(1) {
            if let Some((key, value)) = field.split_once('=') {
                parameters.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        if let Some(image) = parameters.get_mut("image")
            && image.starts_with("<gallery")
        {
            let gallery = self.gallery.find(template_text).ok_or_else(|| {
                UpdateError::MalformedTemplate("gallery in image parameter is not closed".to_string())
            })?;
            *image = gallery.as_str().to_string();
        }

        Ok(parameters)
    }
}

/// Scan forward from just after a template header for the matching `}}`.
///
/// `{{{param}}}` references are skipped whole. Returns the end offset (exclusive)
/// or `None` when the template is unclosed or nests deeper than allowed.
fn closing_offset(page: &str, from: usize) -> Option<usize> {
    let bytes = page.as_bytes();
    let mut depth = 1usize;
    let mut cursor = from;

    while cursor < bytes.len() {
        let rest = &bytes[cursor..];
        if rest.starts_with(b"{{{") {
            let close = find_bytes(&rest[3..], b"}}}")?;
            cursor += 3 + close + 3;
        } else if rest.starts_with(b"{{") {
            depth += 1;
            if depth > MAX_TEMPLATE_DEPTH {
                return None;
            }
            cursor += 2;
        } else if rest.starts_with(b"}}") {
            depth -= 1;
            cursor += 2;
            if depth == 0 {
                return Some(cursor);
            }
        } else {
            cursor += 1;
        }
    }
    None
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
