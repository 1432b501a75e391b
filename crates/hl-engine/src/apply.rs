//! Marker Applicator: wraps resolved spans in styled marker elements and
//! strips them back out without disturbing sibling text.

use hl_dom::Document;
use hl_dom::DomRange;
use hl_dom::NodeId;
use hl_storage::MarkKind;
use tracing::debug;
use tracing::warn;

/// Reserved class carried by every marker element.
pub const MARKER_CLASS: &str = "hylyt-mark";
/// Attribute distinguishing blur markers from highlight markers.
pub const MARKER_KIND_ATTR: &str = "data-hylyt-kind";
/// CSS filter applied by blur markers.
pub const BLUR_FILTER: &str = "blur(6px)";

/// Visual treatment of one marker element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerStyle {
    pub kind: MarkKind,
    pub color: String,
}

impl MarkerStyle {
    pub fn highlight(color: &str) -> Self {
        Self {
            kind: MarkKind::Highlight,
            color: color.to_owned(),
        }
    }

    pub fn blur() -> Self {
        Self {
            kind: MarkKind::Blur,
            color: String::new(),
        }
    }

    fn css(&self) -> String {
        match self.kind {
            MarkKind::Highlight => format!("background-color: {}", self.color),
            MarkKind::Blur => format!("filter: {BLUR_FILTER}"),
        }
    }
}

/// Wraps exactly `len` chars of a text node, starting at `start`, in a new
/// marker element carrying `id`.
///
/// Bounds are validated up front; on violation nothing is mutated and the
/// call reports failure. The primary strategy wraps a boundary range; when
/// the range is rejected, a manual split of the text node into
/// before/match/after segments is tried instead. Both failing leaves the
/// attached tree unchanged.
pub fn apply_marker(
    doc: &mut Document,
    node: NodeId,
    start: usize,
    len: usize,
    style: &MarkerStyle,
    id: &str,
) -> bool {
    let total = doc.text_char_len(node);
    let end = match start.checked_add(len) {
        Some(end) => end,
        None => return false,
    };
    if !doc.is_text(node) || len == 0 || end > total {
        debug!(node, start, len, total, "marker span rejected: out of bounds");
        return false;
    }

    let wrapper = new_marker_element(doc, style, id);
    let range = DomRange::in_text_node(node, start, len);
    match doc.surround_range(&range, wrapper) {
        Ok(()) => true,
        Err(error) => {
            debug!(code = error.code, "range wrap failed; trying manual split");
            manual_split_wrap(doc, node, start, len, wrapper).is_ok()
        }
    }
}

fn new_marker_element(doc: &mut Document, style: &MarkerStyle, id: &str) -> NodeId {
    let wrapper = doc.create_element("span");
    let _ = doc.set_attr(wrapper, "class", MARKER_CLASS);
    let _ = doc.set_attr(wrapper, "id", id);
    let _ = doc.set_attr(wrapper, MARKER_KIND_ATTR, style.kind.as_str());
    let _ = doc.set_attr(wrapper, "style", &style.css());
    wrapper
}

/// Fallback wrap: split the node into before/match/after text nodes, then
/// swap the match segment for the wrapper. The splits preserve text content,
/// so an abort mid-way never loses document text.
fn manual_split_wrap(
    doc: &mut Document,
    node: NodeId,
    start: usize,
    len: usize,
    wrapper: NodeId,
) -> hl_core::HlResult<()> {
    let target = doc.split_text(node, start)?;
    let _rest = doc.split_text(target, len)?;
    let parent = doc.parent(target).ok_or_else(|| {
        hl_core::HlError::new("dom.node_detached", format!("node {target} has no parent"))
    })?;
    doc.insert_before(parent, wrapper, target)?;
    doc.remove_child(parent, target)?;
    doc.append_child(wrapper, target)?;
    Ok(())
}

/// Marker elements of the given kind (or all markers), in document order.
pub fn find_markers(doc: &Document, kind: Option<MarkKind>) -> Vec<NodeId> {
    doc.elements_with_class(MARKER_CLASS)
        .into_iter()
        .filter(|marker| match kind {
            None => true,
            Some(kind) => doc.attr(*marker, MARKER_KIND_ATTR) == Some(kind.as_str()),
        })
        .collect()
}

/// The marker element currently carrying `id`, if any.
pub fn marker_for_id(doc: &Document, id: &str) -> Option<NodeId> {
    doc.elements_with_class(MARKER_CLASS)
        .into_iter()
        .find(|marker| doc.attr(*marker, "id") == Some(id))
}

/// Unwraps every marker of the given kind (or all), restores plain text
/// nodes, merges adjacent fragments back together, and flattens any nested
/// markers left behind by resolution races. Safe to call repeatedly.
pub fn clear_markers(doc: &mut Document, kind: Option<MarkKind>) {
    for marker in find_markers(doc, kind) {
        unwrap_marker(doc, marker);
    }
    let root = doc.root();
    let _ = doc.normalize(root);
    flatten_nested_markers(doc);
}

/// Removes the single marker carrying `id`; true if one was found.
pub fn remove_marker(doc: &mut Document, id: &str) -> bool {
    let Some(marker) = marker_for_id(doc, id) else {
        return false;
    };
    unwrap_marker(doc, marker);
    let root = doc.root();
    let _ = doc.normalize(root);
    true
}

/// Post-condition repair: a marker applied inside another marker is
/// unwrapped so no two marker elements nest.
pub fn flatten_nested_markers(doc: &mut Document) {
    let nested: Vec<NodeId> = doc
        .elements_with_class(MARKER_CLASS)
        .into_iter()
        .filter(|marker| doc.has_ancestor_with_class(*marker, MARKER_CLASS))
        .collect();
    if nested.is_empty() {
        return;
    }

    warn!(count = nested.len(), "found nested markers; flattening");
    for marker in nested {
        unwrap_marker(doc, marker);
    }
    let root = doc.root();
    let _ = doc.normalize(root);
}

fn unwrap_marker(doc: &mut Document, marker: NodeId) {
    let Some(parent) = doc.parent(marker) else {
        return;
    };
    let text = doc.text_content(marker);
    let replacement = doc.create_text(&text);
    let _ = doc.replace_child(parent, replacement, marker);
}

#[cfg(test)]
mod tests {
    use super::MarkerStyle;
    use super::apply_marker;
    use super::clear_markers;
    use super::find_markers;
    use super::flatten_nested_markers;
    use super::manual_split_wrap;
    use super::marker_for_id;
    use super::new_marker_element;
    use super::remove_marker;
    use hl_html::HtmlParser;
    use hl_storage::MarkKind;

    #[test]
    fn marker_roundtrip_restores_text_exactly() {
        let parser = HtmlParser;
        let mut doc = parser.parse("<p>the quick brown fox</p>");
        let original = doc.text_content(doc.root());
        let node = doc.text_nodes()[0];

        let applied = apply_marker(&mut doc, node, 4, 5, &MarkerStyle::highlight("#ffff00"), "m1");
        assert!(applied);
        let marker = marker_for_id(&doc, "m1");
        assert!(marker.is_some());
        let marker = marker.unwrap_or_else(|| unreachable!());
        assert_eq!(doc.text_content(marker), "quick");
        assert_eq!(doc.text_content(doc.root()), original);

        clear_markers(&mut doc, None);
        assert!(find_markers(&doc, None).is_empty());
        assert_eq!(doc.text_content(doc.root()), original);
        assert_eq!(doc.text_nodes().len(), 1);
    }

    #[test]
    fn manual_split_wrap_matches_range_wrapping() {
        let parser = HtmlParser;
        let mut doc = parser.parse("<p>one two three</p>");
        let original = doc.text_content(doc.root());
        let node = doc.text_nodes()[0];
        let paragraph = doc.parent(node).unwrap_or_else(|| unreachable!());

        let wrapper = new_marker_element(&mut doc, &MarkerStyle::highlight("#ffff00"), "m1");
        let wrapped = manual_split_wrap(&mut doc, node, 4, 3, wrapper);
        assert!(wrapped.is_ok());

        let marker = marker_for_id(&doc, "m1").unwrap_or_else(|| unreachable!());
        assert_eq!(doc.text_content(marker), "two");
        assert_eq!(doc.text_content(doc.root()), original);
        // The node split into before/marker/after under the same parent.
        let children = doc.children(paragraph);
        assert_eq!(children.len(), 3);
        assert_eq!(doc.text(children[0]), Some("one "));
        assert_eq!(children[1], marker);
        assert_eq!(doc.text(children[2]), Some(" three"));

        clear_markers(&mut doc, None);
        assert_eq!(doc.text_content(doc.root()), original);
        assert_eq!(doc.text_nodes().len(), 1);
    }

    #[test]
    fn out_of_bounds_span_leaves_node_untouched() {
        let parser = HtmlParser;
        let mut doc = parser.parse("<p>12345678</p>");
        let node = doc.text_nodes()[0];
        let revision = doc.revision();

        let applied = apply_marker(&mut doc, node, 5, 10, &MarkerStyle::blur(), "m1");
        assert!(!applied);
        assert_eq!(doc.text(node), Some("12345678"));
        assert_eq!(doc.revision(), revision);
        assert_eq!(doc.text_content(doc.root()), "12345678");
    }

    #[test]
    fn zero_length_span_is_rejected() {
        let parser = HtmlParser;
        let mut doc = parser.parse("<p>abc</p>");
        let node = doc.text_nodes()[0];
        assert!(!apply_marker(
            &mut doc,
            node,
            1,
            0,
            &MarkerStyle::blur(),
            "m1"
        ));
    }

    #[test]
    fn blur_markers_carry_filter_style() {
        let parser = HtmlParser;
        let mut doc = parser.parse("<p>hide me</p>");
        let node = doc.text_nodes()[0];

        assert!(apply_marker(&mut doc, node, 0, 4, &MarkerStyle::blur(), "b1"));
        let marker = marker_for_id(&doc, "b1").unwrap_or_else(|| unreachable!());
        assert_eq!(doc.attr(marker, "style"), Some("filter: blur(6px)"));
        assert_eq!(doc.attr(marker, "data-hylyt-kind"), Some("blur"));
    }

    #[test]
    fn clear_markers_by_kind_leaves_other_kind() {
        let parser = HtmlParser;
        let mut doc = parser.parse("<p>alpha beta</p>");
        let node = doc.text_nodes()[0];
        assert!(apply_marker(
            &mut doc,
            node,
            0,
            5,
            &MarkerStyle::highlight("#0f0"),
            "h1"
        ));
        // The tail text node created by the first wrap.
        let tail = doc.text_nodes()[1];
        assert!(apply_marker(&mut doc, tail, 1, 4, &MarkerStyle::blur(), "b1"));

        clear_markers(&mut doc, Some(MarkKind::Blur));
        assert!(marker_for_id(&doc, "b1").is_none());
        assert!(marker_for_id(&doc, "h1").is_some());
        assert_eq!(doc.text_content(doc.root()), "alpha beta");
    }

    #[test]
    fn clear_markers_twice_is_idempotent() {
        let parser = HtmlParser;
        let mut doc = parser.parse("<p>some text here</p>");
        let node = doc.text_nodes()[0];
        assert!(apply_marker(
            &mut doc,
            node,
            5,
            4,
            &MarkerStyle::highlight("#ff0"),
            "m1"
        ));

        clear_markers(&mut doc, None);
        let after_first = doc.text_content(doc.root());
        let nodes_after_first = doc.text_nodes().len();
        let revision = doc.revision();

        clear_markers(&mut doc, None);
        assert_eq!(doc.text_content(doc.root()), after_first);
        assert_eq!(doc.text_nodes().len(), nodes_after_first);
        assert_eq!(doc.revision(), revision);
    }

    #[test]
    fn nested_markers_are_flattened() {
        let parser = HtmlParser;
        let mut doc = parser.parse(
            "<p><span class=\"hylyt-mark\" id=\"outer\" data-hylyt-kind=\"highlight\">one \
             <span class=\"hylyt-mark\" id=\"inner\" data-hylyt-kind=\"highlight\">two</span>\
             </span></p>",
        );

        flatten_nested_markers(&mut doc);
        assert!(marker_for_id(&doc, "inner").is_none());
        let outer = marker_for_id(&doc, "outer");
        assert!(outer.is_some());
        assert_eq!(doc.text_content(doc.root()), "one two");
    }

    #[test]
    fn remove_marker_targets_one_id() {
        let parser = HtmlParser;
        let mut doc = parser.parse("<p>one two</p>");
        let node = doc.text_nodes()[0];
        assert!(apply_marker(
            &mut doc,
            node,
            0,
            3,
            &MarkerStyle::highlight("#ff0"),
            "m1"
        ));

        assert!(remove_marker(&mut doc, "m1"));
        assert!(!remove_marker(&mut doc, "m1"));
        assert_eq!(doc.text_content(doc.root()), "one two");
    }
}
