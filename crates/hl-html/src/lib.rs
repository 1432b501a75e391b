//! HTML tokenization into an `hl-dom` document tree.
//!
//! A forgiving byte scanner: comments, doctypes and processing instructions
//! are skipped, unmatched end tags are ignored, and script/style bodies are
//! kept as raw text children so downstream scans can reject them by parent
//! tag.

use hl_dom::Document;
use hl_dom::NodeId;

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Parses raw HTML into a document tree rooted at an `html` element.
#[derive(Debug, Default)]
pub struct HtmlParser;

impl HtmlParser {
    pub fn parse(&self, input: &str) -> Document {
        let mut doc = Document::new();
        let mut open: Vec<(String, NodeId)> = vec![("html".to_owned(), doc.root())];
        let bytes = input.as_bytes();
        let mut idx = 0_usize;

        while idx < bytes.len() {
            if bytes[idx] != b'<' {
                let next = find_byte(bytes, idx, b'<').unwrap_or(bytes.len());
                append_text(&mut doc, &mut open, &decode_entities(&input[idx..next]));
                idx = next;
                continue;
            }

            if starts_with(bytes, idx, b"<!--") {
                idx = skip_comment(bytes, idx);
                continue;
            }

            if starts_with(bytes, idx, b"<!") {
                idx = skip_to_gt(bytes, idx.saturating_add(2));
                continue;
            }

            if starts_with(bytes, idx, b"<?") {
                idx = skip_to_gt(bytes, idx.saturating_add(2));
                continue;
            }

            let Some((tag, next_idx)) = parse_tag(input, idx) else {
                append_text(&mut doc, &mut open, "<");
                idx = idx.saturating_add(1);
                continue;
            };

            if tag.is_end {
                close_tag(&mut open, &tag.name);
                idx = next_idx;
                continue;
            }

            if tag.name == "html" {
                // The implicit root already exists.
                idx = next_idx;
                continue;
            }

            let element = doc.create_element(&tag.name);
            for (name, value) in &tag.attrs {
                let _ = doc.set_attr(element, name, value);
            }
            if let Some((_, parent)) = open.last() {
                let _ = doc.append_child(*parent, element);
            }

            if !tag.self_closing && (tag.name == "script" || tag.name == "style") {
                let (raw, after_raw) = read_raw_text_until_end_tag(input, next_idx, &tag.name);
                if !raw.is_empty() {
                    let text = doc.create_text(raw);
                    let _ = doc.append_child(element, text);
                }
                idx = after_raw;
                continue;
            }

            if !tag.self_closing && !VOID_TAGS.contains(&tag.name.as_str()) {
                open.push((tag.name, element));
            }
            idx = next_idx;
        }

        doc
    }
}

fn append_text(doc: &mut Document, open: &mut [(String, NodeId)], text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some((_, parent)) = open.last() {
        let node = doc.create_text(text);
        let _ = doc.append_child(*parent, node);
    }
}

fn close_tag(open: &mut Vec<(String, NodeId)>, name: &str) {
    if name == "html" {
        return;
    }
    match open.iter().rposition(|(open_name, _)| open_name == name) {
        Some(position) if position > 0 => open.truncate(position),
        _ => {}
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedTag {
    name: String,
    attrs: Vec<(String, String)>,
    is_end: bool,
    self_closing: bool,
}

fn parse_tag(input: &str, start: usize) -> Option<(ParsedTag, usize)> {
    let bytes = input.as_bytes();
    if bytes.get(start).copied() != Some(b'<') {
        return None;
    }

    let mut idx = start.saturating_add(1);
    let mut is_end = false;
    if bytes.get(idx).copied() == Some(b'/') {
        is_end = true;
        idx = idx.saturating_add(1);
    }

    idx = skip_spaces(bytes, idx);
    let name_start = idx;
    while idx < bytes.len() && is_tag_name_char(bytes[idx]) {
        idx = idx.saturating_add(1);
    }
    if idx == name_start {
        return None;
    }
    let name = input[name_start..idx].to_ascii_lowercase();

    let mut attrs = Vec::new();
    let mut self_closing = false;
    loop {
        idx = skip_spaces(bytes, idx);
        match bytes.get(idx).copied() {
            None => return None,
            Some(b'>') => return Some((
                ParsedTag {
                    name,
                    attrs,
                    is_end,
                    self_closing,
                },
                idx.saturating_add(1),
            )),
            Some(b'/') => {
                self_closing = true;
                idx = idx.saturating_add(1);
            }
            Some(_) => {
                let (attr, next_idx) = parse_attribute(input, idx)?;
                if let Some(attr) = attr {
                    attrs.push(attr);
                }
                idx = next_idx;
            }
        }
    }
}

#[allow(clippy::type_complexity)]
fn parse_attribute(input: &str, start: usize) -> Option<(Option<(String, String)>, usize)> {
    let bytes = input.as_bytes();
    let name_start = start;
    let mut idx = start;
    while idx < bytes.len() && is_attr_name_char(bytes[idx]) {
        idx = idx.saturating_add(1);
    }
    if idx == name_start {
        // Unparseable byte inside the tag; step over it.
        return Some((None, idx.saturating_add(1)));
    }
    let name = input[name_start..idx].to_ascii_lowercase();

    idx = skip_spaces(bytes, idx);
    if bytes.get(idx).copied() != Some(b'=') {
        return Some((Some((name, String::new())), idx));
    }
    idx = skip_spaces(bytes, idx.saturating_add(1));

    match bytes.get(idx).copied() {
        Some(quote @ (b'"' | b'\'')) => {
            let value_start = idx.saturating_add(1);
            let mut end = value_start;
            while end < bytes.len() && bytes[end] != quote {
                end = end.saturating_add(1);
            }
            let value = decode_entities(&input[value_start..end]);
            Some((Some((name, value)), end.min(bytes.len()).saturating_add(1)))
        }
        _ => {
            let value_start = idx;
            while idx < bytes.len() && !bytes[idx].is_ascii_whitespace() && bytes[idx] != b'>' {
                idx = idx.saturating_add(1);
            }
            let value = decode_entities(&input[value_start..idx]);
            Some((Some((name, value)), idx))
        }
    }
}

fn read_raw_text_until_end_tag<'a>(input: &'a str, start: usize, tag_name: &str) -> (&'a str, usize) {
    let bytes = input.as_bytes();
    let tag_bytes = tag_name.as_bytes();
    let mut idx = start;

    while idx < bytes.len() {
        if bytes[idx] == b'<'
            && bytes.get(idx.saturating_add(1)).copied() == Some(b'/')
            && starts_with_ignore_ascii_case(bytes, idx.saturating_add(2), tag_bytes)
        {
            let after = skip_to_gt(bytes, idx.saturating_add(2 + tag_bytes.len()));
            return (&input[start..idx], after);
        }
        idx = idx.saturating_add(1);
    }

    (&input[start..], bytes.len())
}

fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_owned();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let mut replaced = false;
        for (entity, ch) in [
            ("&amp;", '&'),
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&quot;", '"'),
            ("&apos;", '\''),
            ("&#39;", '\''),
            ("&nbsp;", ' '),
        ] {
            if rest.starts_with(entity) {
                out.push(ch);
                rest = &rest[entity.len()..];
                replaced = true;
                break;
            }
        }
        if !replaced {
            out.push('&');
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}

fn skip_comment(bytes: &[u8], start: usize) -> usize {
    find_subslice(bytes, start.saturating_add(4), b"-->")
        .map(|end| end.saturating_add(3))
        .unwrap_or(bytes.len())
}

fn skip_to_gt(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() {
        if bytes[idx] == b'>' {
            return idx.saturating_add(1);
        }
        idx = idx.saturating_add(1);
    }
    bytes.len()
}

fn skip_spaces(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx = idx.saturating_add(1);
    }
    idx
}

fn is_tag_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b':')
}

fn is_attr_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b':')
}

fn starts_with(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    let end = idx.saturating_add(pattern.len());
    end <= bytes.len() && bytes[idx..end] == *pattern
}

fn starts_with_ignore_ascii_case(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    let end = idx.saturating_add(pattern.len());
    if end > bytes.len() {
        return false;
    }
    bytes[idx..end]
        .iter()
        .zip(pattern.iter())
        .all(|(left, right)| left.eq_ignore_ascii_case(right))
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

fn find_byte(bytes: &[u8], from: usize, byte: u8) -> Option<usize> {
    bytes[from..]
        .iter()
        .position(|candidate| *candidate == byte)
        .map(|offset| from + offset)
}

#[cfg(test)]
mod tests {
    use super::HtmlParser;

    #[test]
    fn parses_nested_elements_and_text() {
        let parser = HtmlParser;
        let doc = parser.parse("<body><p>Hello <em>there</em> world</p></body>");

        assert_eq!(doc.text_content(doc.root()), "Hello there world");
        let text_nodes = doc.text_nodes();
        assert_eq!(text_nodes.len(), 3);
        assert_eq!(doc.parent_tag(text_nodes[1]), Some("em"));
    }

    #[test]
    fn keeps_script_body_as_raw_text_child() {
        let parser = HtmlParser;
        let doc = parser.parse("<body>Hi<script>var x = \"<p>\";</script>Bye</body>");

        let scripted = doc
            .text_nodes()
            .into_iter()
            .find(|node| doc.parent_tag(*node) == Some("script"));
        assert!(scripted.is_some());
        let scripted = scripted.unwrap_or_else(|| unreachable!());
        assert_eq!(doc.text(scripted), Some("var x = \"<p>\";"));
    }

    #[test]
    fn parses_attributes_and_classes() {
        let parser = HtmlParser;
        let doc = parser.parse("<div id=\"main\" class=\"wide dark\">x</div>");

        let div = doc
            .walk()
            .into_iter()
            .find(|node| doc.tag(*node) == Some("div"));
        assert!(div.is_some());
        let div = div.unwrap_or_else(|| unreachable!());
        assert_eq!(doc.attr(div, "id"), Some("main"));
        assert!(doc.has_class(div, "dark"));
        assert!(!doc.has_class(div, "light"));
    }

    #[test]
    fn skips_comments_and_doctype() {
        let parser = HtmlParser;
        let doc = parser.parse("<!DOCTYPE html><!-- note --><p>kept</p>");
        assert_eq!(doc.text_content(doc.root()), "kept");
    }

    #[test]
    fn decodes_basic_entities() {
        let parser = HtmlParser;
        let doc = parser.parse("<p>a &amp; b &lt;c&gt;</p>");
        assert_eq!(doc.text_content(doc.root()), "a & b <c>");
    }

    #[test]
    fn ignores_unmatched_end_tags() {
        let parser = HtmlParser;
        let doc = parser.parse("</div><p>still here</p></span>");
        assert_eq!(doc.text_content(doc.root()), "still here");
    }

    #[test]
    fn void_elements_do_not_swallow_following_text() {
        let parser = HtmlParser;
        let doc = parser.parse("<p>one<br>two</p>");
        let p = doc
            .walk()
            .into_iter()
            .find(|node| doc.tag(*node) == Some("p"));
        assert!(p.is_some());
        let p = p.unwrap_or_else(|| unreachable!());
        assert_eq!(doc.children(p).len(), 3);
        assert_eq!(doc.text_content(p), "onetwo");
    }
}
