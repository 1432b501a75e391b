//! Occurrence Resolver: decides which occurrence a user meant at capture
//! time, and which live occurrence best matches a stored record on a page
//! that has drifted since.

use crate::locate::Occurrence;
use crate::locate::find_occurrences;
use hl_dom::Document;
use hl_dom::NodeId;
use hl_storage::MarkRecord;
use tracing::debug;
use tracing::warn;

/// Offsets reported by a live selection drift a little when surrounding
/// text nodes were merged or split; anchor matching tolerates this much.
pub const OFFSET_DRIFT_TOLERANCE: usize = 5;
/// Chars of surrounding text captured on each side of a match.
pub const CONTEXT_CHARS: usize = 20;

/// Where the user's selection starts: a node handle plus a char offset
/// interpreted against that node's text (or its cumulative descendant text
/// when the node is an element).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveSelection {
    pub node: NodeId,
    pub offset: usize,
}

/// Maps a live selection onto an index into `occurrences`.
///
/// Strategies run in order of confidence: same anchor node with a nearby
/// offset, then selection container enclosing an occurrence at a covered
/// offset, then nearest occurrence by layout geometry. When all three come
/// up empty the first occurrence is assumed and a warning is logged, since
/// a wrong ordinal only degrades reapplication, never capture.
pub fn resolve_ordinal(
    doc: &Document,
    occurrences: &[Occurrence],
    selection: &LiveSelection,
) -> usize {
    if occurrences.is_empty() {
        return 0;
    }
    if let Some(index) = by_anchor_node(occurrences, selection) {
        return index;
    }
    if let Some(index) = by_containment(doc, occurrences, selection) {
        return index;
    }
    if let Some(index) = by_visual_proximity(doc, occurrences, selection) {
        return index;
    }
    warn!(
        node = selection.node,
        offset = selection.offset,
        "selection matched no occurrence; assuming the first"
    );
    0
}

/// Among occurrences in the selection's own node, the one whose start
/// offset is nearest the selection wins; an exact hit has drift zero and
/// always beats a merely tolerated one. Ties go to the earlier occurrence.
fn by_anchor_node(occurrences: &[Occurrence], selection: &LiveSelection) -> Option<usize> {
    occurrences
        .iter()
        .enumerate()
        .filter(|(_, occ)| occ.node == selection.node)
        .map(|(index, occ)| (occ.start_offset.abs_diff(selection.offset), index))
        .filter(|(drift, _)| *drift <= OFFSET_DRIFT_TOLERANCE)
        .min()
        .map(|(_, index)| index)
}

/// Fires when the selection anchors on an element enclosing an occurrence's
/// text node and the selection offset, taken against the element's
/// cumulative text, lands inside the matched span.
fn by_containment(
    doc: &Document,
    occurrences: &[Occurrence],
    selection: &LiveSelection,
) -> Option<usize> {
    for (index, occ) in occurrences.iter().enumerate() {
        if !doc.is_ancestor(selection.node, occ.node) {
            continue;
        }
        let Some(base) = doc.offset_within(selection.node, occ.node) else {
            continue;
        };
        let span_start = base + occ.start_offset;
        let span_end = span_start + hl_dom::char_count(&occ.matched_text);
        if selection.offset >= span_start && selection.offset < span_end {
            return Some(index);
        }
    }
    None
}

fn by_visual_proximity(
    doc: &Document,
    occurrences: &[Occurrence],
    selection: &LiveSelection,
) -> Option<usize> {
    let anchor = if doc.is_text(selection.node) {
        doc.span_rect(selection.node, selection.offset, 1)
    } else {
        doc.node_rect(selection.node)
    };
    let anchor = anchor?;

    let mut best: Option<(usize, f32)> = None;
    for (index, occ) in occurrences.iter().enumerate() {
        let Some(rect) =
            doc.span_rect(occ.node, occ.start_offset, hl_dom::char_count(&occ.matched_text))
        else {
            continue;
        };
        let distance = anchor.center_distance(&rect);
        let closer = match best {
            None => true,
            Some((_, current)) => distance < current,
        };
        if closer {
            best = Some((index, distance));
        }
    }
    best.map(|(index, _)| index)
}

/// Captures the text immediately around an occurrence within its own node.
/// Either side may be `None` when the match sits flush against the node
/// edge.
pub fn surrounding_context(doc: &Document, occ: &Occurrence) -> (Option<String>, Option<String>) {
    let Some(text) = doc.text(occ.node) else {
        return (None, None);
    };
    let chars: Vec<char> = text.chars().collect();
    let start = occ.start_offset.min(chars.len());
    let end = (start + hl_dom::char_count(&occ.matched_text)).min(chars.len());

    let before_start = start.saturating_sub(CONTEXT_CHARS);
    let before: String = chars[before_start..start].iter().collect();
    let after_end = (end + CONTEXT_CHARS).min(chars.len());
    let after: String = chars[end..after_end].iter().collect();

    (
        (!before.is_empty()).then_some(before),
        (!after.is_empty()).then_some(after),
    )
}

/// Picks the live occurrence a stored record should reattach to.
///
/// A stored ordinal still within range wins outright. Otherwise the stored
/// context strings are scored against each candidate's live surroundings
/// and the best-scoring candidate is taken, earliest on ties. With no
/// usable context the first occurrence is the fallback.
pub fn pick_occurrence<'a>(
    doc: &Document,
    occurrences: &'a [Occurrence],
    record: &MarkRecord,
) -> Option<&'a Occurrence> {
    if occurrences.is_empty() {
        return None;
    }
    if let Some(ordinal) = record.ordinal {
        if let Some(occ) = occurrences.get(ordinal) {
            return Some(occ);
        }
        debug!(
            ordinal,
            live = occurrences.len(),
            "stored ordinal out of range; falling back to context"
        );
    }

    if record.context_before.is_some() || record.context_after.is_some() {
        let mut best: Option<(usize, u32)> = None;
        for (index, occ) in occurrences.iter().enumerate() {
            let (live_before, live_after) = surrounding_context(doc, occ);
            let score =
                context_score(record.context_before.as_deref(), live_before.as_deref(), true)
                    + context_score(record.context_after.as_deref(), live_after.as_deref(), false);
            let better = match best {
                None => score > 0,
                Some((_, current)) => score > current,
            };
            if better {
                best = Some((index, score));
            }
        }
        if let Some((index, _)) = best {
            return occurrences.get(index);
        }
    }

    occurrences.first()
}

/// 2 for an edge-aligned match, 1 for a loose containment, 0 otherwise.
/// Before-context aligns at the live text's end, after-context at its start.
fn context_score(recorded: Option<&str>, live: Option<&str>, before: bool) -> u32 {
    let (Some(recorded), Some(live)) = (recorded, live) else {
        return 0;
    };
    if recorded.is_empty() {
        return 0;
    }
    let aligned = if before {
        live.ends_with(recorded) || recorded.ends_with(live)
    } else {
        live.starts_with(recorded) || recorded.starts_with(live)
    };
    if aligned {
        2
    } else if live.contains(recorded) || recorded.contains(live) {
        1
    } else {
        0
    }
}

/// Scans for the record's text with progressively weaker targets: exact,
/// case-insensitive, the phrase minus trailing words, and finally just the
/// first word case-insensitively. An empty result means the text is gone
/// from the page.
pub fn locate_with_fallbacks(doc: &Document, text: &str) -> Vec<Occurrence> {
    let exact = find_occurrences(doc, text, false);
    if !exact.is_empty() {
        return exact;
    }
    let relaxed = find_occurrences(doc, text, true);
    if !relaxed.is_empty() {
        debug!(text, "exact scan empty; matched case-insensitively");
        return relaxed;
    }

    let mut words: Vec<&str> = text.split_whitespace().collect();
    let multi_word = words.len() > 1;
    while words.len() > 1 {
        words.pop();
        let shortened = words.join(" ");
        let partial = find_occurrences(doc, &shortened, false);
        if !partial.is_empty() {
            warn!(text, shortened, "matched a shortened form of the stored text");
            return partial;
        }
    }

    if multi_word {
        if let Some(first) = words.first() {
            let loose = find_occurrences(doc, first, true);
            if !loose.is_empty() {
                warn!(text, first, "matched only the first word of the stored text");
                return loose;
            }
        }
    }

    Vec::new()
}
