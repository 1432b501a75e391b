//! Text Locator: finds every occurrence of a target string, in document
//! order, anchored to concrete text nodes.

use crate::apply::MARKER_CLASS;
use hl_dom::Document;
use hl_dom::NodeId;

const SKIPPED_PARENT_TAGS: &[&str] = &["noscript", "script", "style"];

/// One concrete location of the target string.
///
/// `node` is a handle into the live tree and is stale after any mutation;
/// never keep an `Occurrence` across a mutation boundary, and always rescan
/// before applying the next marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub node: NodeId,
    pub start_offset: usize,
    pub matched_text: String,
}

/// Scans the whole document for `search_text`, in depth-first pre-order.
///
/// Whitespace-only text nodes, script/style bodies and text already inside a
/// marker element are skipped. Single tokens made of word characters and
/// hyphens match on word boundaries; longer phrases match as plain
/// substrings. The `case_insensitive` flag is a caller-driven fallback,
/// meant for a second scan after a case-sensitive one found nothing. An
/// empty target yields an empty list rather than an error.
pub fn find_occurrences(
    doc: &Document,
    search_text: &str,
    case_insensitive: bool,
) -> Vec<Occurrence> {
    let needle = search_text.trim();
    if needle.is_empty() {
        return Vec::new();
    }

    let word_boundary = use_word_boundaries(needle);
    let pattern: Vec<char> = needle.chars().collect();
    let mut out = Vec::new();

    for node in doc.text_nodes() {
        let Some(text) = doc.text(node) else {
            continue;
        };
        if text.trim().is_empty() {
            continue;
        }
        if let Some(tag) = doc.parent_tag(node) {
            if SKIPPED_PARENT_TAGS.contains(&tag) {
                continue;
            }
        }
        if doc.has_ancestor_with_class(node, MARKER_CLASS) {
            continue;
        }
        // Cheap containment check before the char-window scan.
        if !case_insensitive && !text.contains(needle) {
            continue;
        }

        scan_text(node, text, &pattern, word_boundary, case_insensitive, &mut out);
    }

    out
}

/// Word-boundary semantics only make sense for a single bare token; phrases
/// with spaces or punctuation already carry enough specificity.
fn use_word_boundaries(needle: &str) -> bool {
    needle
        .chars()
        .all(|ch| ch.is_alphanumeric() || ch == '_' || ch == '-')
}

fn scan_text(
    node: NodeId,
    text: &str,
    pattern: &[char],
    word_boundary: bool,
    case_insensitive: bool,
    out: &mut Vec<Occurrence>,
) {
    let hay: Vec<char> = text.chars().collect();
    let len = pattern.len();
    if len == 0 || hay.len() < len {
        return;
    }

    let mut idx = 0_usize;
    while idx + len <= hay.len() {
        let window = &hay[idx..idx + len];
        let hit = chars_match(window, pattern, case_insensitive)
            && (!word_boundary || (boundary_before(&hay, idx) && boundary_after(&hay, idx + len)));
        if hit {
            out.push(Occurrence {
                node,
                start_offset: idx,
                matched_text: window.iter().collect(),
            });
            // Matches never overlap; resume past this one.
            idx += len;
        } else {
            idx += 1;
        }
    }
}

fn chars_match(window: &[char], pattern: &[char], case_insensitive: bool) -> bool {
    window.iter().zip(pattern.iter()).all(|(left, right)| {
        if case_insensitive {
            left.to_lowercase().eq(right.to_lowercase())
        } else {
            left == right
        }
    })
}

fn boundary_before(hay: &[char], idx: usize) -> bool {
    idx == 0 || !is_word_char(hay[idx - 1])
}

fn boundary_after(hay: &[char], end: usize) -> bool {
    end >= hay.len() || !is_word_char(hay[end])
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

#[cfg(test)]
mod tests {
    use super::find_occurrences;
    use hl_html::HtmlParser;

    #[test]
    fn finds_all_occurrences_in_document_order() {
        let doc = HtmlParser.parse("<p>the cat sat on the cat mat</p>");
        let occurrences = find_occurrences(&doc, "cat", false);

        assert_eq!(occurrences.len(), 2);
        assert_eq!(occurrences[0].start_offset, 4);
        assert_eq!(occurrences[1].start_offset, 19);
        assert_eq!(occurrences[0].node, occurrences[1].node);
        assert!(occurrences.iter().all(|occ| occ.matched_text == "cat"));
    }

    #[test]
    fn single_words_match_on_word_boundaries() {
        let doc = HtmlParser.parse("<p>a cat in a category of cats</p>");
        let occurrences = find_occurrences(&doc, "cat", false);
        assert_eq!(occurrences.len(), 1);
        assert_eq!(occurrences[0].start_offset, 2);
    }

    #[test]
    fn phrases_match_as_plain_substrings() {
        let doc = HtmlParser.parse("<p>concatenate: the cat sat</p>");
        let occurrences = find_occurrences(&doc, "cat s", false);
        assert_eq!(occurrences.len(), 1);
    }

    #[test]
    fn occurrences_span_multiple_blocks_in_order() {
        let doc = HtmlParser.parse("<p>alpha x</p><div>x beta</div><p>x</p>");
        let occurrences = find_occurrences(&doc, "x", false);
        assert_eq!(occurrences.len(), 3);
        let nodes: Vec<_> = occurrences.iter().map(|occ| occ.node).collect();
        let mut sorted = nodes.clone();
        sorted.sort_unstable();
        assert_eq!(nodes, sorted);
    }

    #[test]
    fn skips_script_style_and_whitespace_nodes() {
        let doc = HtmlParser.parse(
            "<p>target</p><script>target = 1;</script><style>.target{}</style><p>  </p>",
        );
        let occurrences = find_occurrences(&doc, "target", false);
        assert_eq!(occurrences.len(), 1);
    }

    #[test]
    fn skips_text_inside_existing_markers() {
        let doc = HtmlParser.parse(
            "<p><span class=\"hylyt-mark\" id=\"m1\">word</span> and word again</p>",
        );
        let occurrences = find_occurrences(&doc, "word", false);
        assert_eq!(occurrences.len(), 1);
    }

    #[test]
    fn empty_search_yields_empty_list() {
        let doc = HtmlParser.parse("<p>anything</p>");
        assert!(find_occurrences(&doc, "", false).is_empty());
        assert!(find_occurrences(&doc, "   ", false).is_empty());
    }

    #[test]
    fn case_insensitive_flag_widens_matching() {
        let doc = HtmlParser.parse("<p>Hello there</p>");
        assert!(find_occurrences(&doc, "hello", false).is_empty());
        let relaxed = find_occurrences(&doc, "hello", true);
        assert_eq!(relaxed.len(), 1);
        assert_eq!(relaxed[0].matched_text, "Hello");
    }
}
