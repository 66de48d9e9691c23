#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    OpenLink,
    CloseLink,
    OpenTemplate,
    CloseTemplate,
    Pipe,
}

impl Marker {
    fn at(rest: &[u8]) -> Option<Self> {
        if rest.starts_with(b"[[") {
            Some(Self::OpenLink)
        } else if rest.starts_with(b"]]") {
            Some(Self::CloseLink)
        } else if rest.starts_with(b"{{") {
            Some(Self::OpenTemplate)
        } else if rest.starts_with(b"}}") {
            Some(Self::CloseTemplate)
        } else if rest.first() == Some(&b'|') {
            Some(Self::Pipe)
        } else {
            None
        }
    }

    fn len(self) -> usize {
        match self {
            Self::Pipe => 1,
            _ => 2,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Scope {
    links: usize,
    templates: usize,
}

impl Scope {
    fn is_top_level(self) -> bool {
        self.links == 0 && self.templates == 0
    }

    fn enter(&mut self, marker: Marker) {
        match marker {
            Marker::OpenLink => self.links += 1,
            Marker::CloseLink => self.links = self.links.saturating_sub(1),
            Marker::OpenTemplate => self.templates += 1,
            Marker::CloseTemplate => self.templates = self.templates.saturating_sub(1),
            Marker::Pipe => {}
        }
    }
}

/// Split `text` into top-level `|`-delimited segments.
///
/// The first segment is whatever preceded the first separator (for a template
/// body, its name); callers that want fields must drop it. A `|` inside a
/// `[[ ]]` link or `{{ }}` template does not split, so `[[Page|Label]]` or a
/// nested `{{Sub|x}}` stays inside one field.
///
/// Each bracket kind keeps its own depth counter. A closer without an opener
/// is ordinary text (the counter does not go negative); an opener that is
/// never closed keeps the rest of the input in a single segment. Lone `[`,
/// `]`, `{` and `}` are plain characters. Unbalanced input is not repaired.
pub fn split(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut scope = Scope::default();
    let mut segment_start = 0usize;
    let mut cursor = 0usize;

    while cursor < bytes.len() {
        match Marker::at(&bytes[cursor..]) {
            Some(Marker::Pipe) if scope.is_top_level() => {
                segments.push(text[segment_start..cursor].to_string());
                cursor += 1;
                segment_start = cursor;
            }
            Some(marker) => {
                scope.enter(marker);
                cursor += marker.len();
            }
            None => cursor += 1,
        }
    }

    segments.push(text[segment_start..].to_string());
    segments
}
