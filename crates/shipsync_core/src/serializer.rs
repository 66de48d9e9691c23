use crate::parser::{InfoboxTemplate, ParameterMap};

/// Render parameters as a canonical multi-line template block.
///
/// Every `$` is doubled; [`replace_block`] reads `$$` back as one `$`.
pub fn render(template: &InfoboxTemplate, data: &ParameterMap) -> String {
    let mut output = format!("{{{{{}\n", template.name());
    for (key, value) in data {
        output.push_str(&format!("|{key} = {value}\n"));
    }
    output.push_str("}}");
    output.replace('$', "$$")
}

/// Replace the first instance of `template` in `page` with `new_block`.
///
/// Returns the page unchanged when no instance is found.
pub fn replace_block(template: &InfoboxTemplate, page: &str, new_block: &str) -> String {
    let Some(range) = template.locate(page) else {
        return page.to_string();
    };
    let replacement = new_block.replace("$$", "$");
    let mut output = String::with_capacity(page.len() - range.len() + replacement.len());
    output.push_str(&page[..range.start]);
    output.push_str(&replacement);
    output.push_str(&page[range.end..]);
    output
}

#[cfg(test)]
mod tests {
    use super::{render, replace_block};
    use crate::parser::{DEFAULT_TEMPLATE_NAME, InfoboxTemplate, ParameterMap};

    fn infobox() -> InfoboxTemplate {
        InfoboxTemplate::new(DEFAULT_TEMPLATE_NAME).expect("template")
    }

    fn map(pairs: &[(&str, &str)]) -> ParameterMap {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn render_orders_keys_alphabetically() {
        let rendered = render(&infobox(), &map(&[("shields", "40,000"), ("hull", "38,000")]));
        assert_eq!(
            rendered,
            "{{Ship Infobox\n|hull = 38,000\n|shields = 40,000\n}}"
        );
    }

    #[test]
    fn render_of_empty_map_is_bare_template() {
        assert_eq!(render(&infobox(), &ParameterMap::new()), "{{Ship Infobox\n}}");
    }

    #[test]
    fn render_escapes_dollar_and_replace_unescapes_it() {
        let template = infobox();
        let rendered = render(&template, &map(&[("cost", "$5")]));
        assert_eq!(rendered, "{{Ship Infobox\n|cost = $$5\n}}");

        let replaced = replace_block(&template, "a {{Ship Infobox|cost=1}} b", &rendered);
        assert_eq!(replaced, "a {{Ship Infobox\n|cost = $5\n}} b");
    }

    #[test]
    fn replace_block_leaves_page_without_template_untouched() {
        let page = "Just prose, no infobox.";
        assert_eq!(replace_block(&infobox(), page, "{{Ship Infobox\n}}"), page);
    }

    #[test]
    fn replace_block_only_touches_first_instance() {
        let page = "{{Ship Infobox|a=1}}\n{{Ship Infobox|a=2}}";
        assert_eq!(
            replace_block(&infobox(), page, "{{Ship Infobox\n|a = 9\n}}"),
            "{{Ship Infobox\n|a = 9\n}}\n{{Ship Infobox|a=2}}"
        );
    }

    #[test]
    fn canonical_page_round_trips_byte_for_byte() {
        let template = infobox();
        let page = "Lead text.\n{{Ship Infobox\n|cost = $12\n|hull = 38,000\n|image = <gallery>\nA.png|Front\n</gallery>\n|title = The Deity\n}}\n== History ==\nText.";
        let block = template.extract_block(page).expect("block");
        let parsed = template.parse(block).expect("parse");
        let rendered = render(&template, &parsed);
        assert_eq!(replace_block(&template, page, &rendered), page);
    }
}
