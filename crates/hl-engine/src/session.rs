//! Per-page session driver: ties the locator, resolver and applicator to
//! the persisted settings and the popup/background message protocol.

use crate::apply::MarkerStyle;
use crate::apply::apply_marker;
use crate::apply::clear_markers;
use crate::apply::flatten_nested_markers;
use crate::locate::find_occurrences;
use crate::resolve::LiveSelection;
use crate::resolve::locate_with_fallbacks;
use crate::resolve::pick_occurrence;
use crate::resolve::resolve_ordinal;
use crate::resolve::surrounding_context;
use hl_core::HlError;
use hl_core::HlResult;
use hl_dom::Document;
use hl_ipc::ActionMessage;
use hl_storage::DEFAULT_HIGHLIGHT_COLOR;
use hl_storage::MarkKind;
use hl_storage::MarkRecord;
use hl_storage::MarkStore;
use hl_storage::SettingsChange;
use tracing::warn;

/// In-memory mirror of the settings a page session acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub enabled: bool,
    pub highlight_mode: bool,
    pub highlight_color: String,
    pub text_to_blur: String,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            enabled: true,
            highlight_mode: false,
            highlight_color: DEFAULT_HIGHLIGHT_COLOR.to_owned(),
            text_to_blur: String::new(),
        }
    }
}

impl SessionState {
    pub fn from_store(store: &MarkStore) -> HlResult<Self> {
        Ok(Self {
            enabled: store.enabled()?,
            highlight_mode: store.highlight_mode()?,
            highlight_color: store.highlight_color()?,
            text_to_blur: store.blur_text()?,
        })
    }

    pub fn apply_settings_change(&mut self, change: &SettingsChange) {
        match change {
            SettingsChange::Enabled(enabled) => self.enabled = *enabled,
            SettingsChange::BlurText(text) => self.text_to_blur = text.clone(),
            SettingsChange::HighlightMode(on) => self.highlight_mode = *on,
            SettingsChange::HighlightColor(color) => self.highlight_color = color.clone(),
        }
    }

    /// Mutation batches are only worth processing while the session is
    /// enabled and has a blur target.
    pub fn should_observe(&self) -> bool {
        self.enabled && !self.text_to_blur.trim().is_empty()
    }
}

/// Outcome of reattaching a page's stored marks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapplySummary {
    pub applied: usize,
    pub skipped: usize,
}

/// Turns a live selection into a persistable record and wraps the chosen
/// occurrence in place.
///
/// The selected text is normalized before matching. The occurrence the
/// selection points at is resolved to an ordinal, the surrounding text is
/// captured for later disambiguation, and the marker is applied before the
/// record is returned.
pub fn capture_mark(
    doc: &mut Document,
    selection: &LiveSelection,
    raw_text: &str,
    color: &str,
    kind: MarkKind,
    id: &str,
) -> HlResult<MarkRecord> {
    let mut record = MarkRecord::new(id, raw_text, color, kind);
    if record.text.is_empty() {
        return Err(HlError::new(
            "engine.empty_mark_text",
            "selection contains no markable text",
        ));
    }

    let mut occurrences = find_occurrences(doc, &record.text, false);
    if occurrences.is_empty() {
        occurrences = find_occurrences(doc, &record.text, true);
    }
    if occurrences.is_empty() {
        return Err(HlError::new(
            "engine.text_not_found",
            format!("text {:?} does not occur on the page", record.text),
        ));
    }

    let ordinal = resolve_ordinal(doc, &occurrences, selection);
    let occ = occurrences.get(ordinal).cloned().ok_or_else(|| {
        HlError::new(
            "engine.ordinal_out_of_range",
            format!("resolved ordinal {ordinal} exceeds {} occurrences", occurrences.len()),
        )
    })?;
    let (before, after) = surrounding_context(doc, &occ);
    record.ordinal = Some(ordinal);
    record.total_at_capture = Some(occurrences.len());
    record.context_before = before;
    record.context_after = after;

    let style = style_for(&record);
    let len = hl_dom::char_count(&occ.matched_text);
    if !apply_marker(doc, occ.node, occ.start_offset, len, &style, id) {
        return Err(HlError::new(
            "engine.apply_failed",
            format!("could not wrap occurrence {ordinal} of {:?}", record.text),
        ));
    }
    Ok(record)
}

/// Reattaches stored records to the current page content.
///
/// Existing markers are cleared first so the pass is idempotent. Each
/// record is located fresh against the already-partially-marked tree, so
/// handles never go stale across applications. Records whose text has left
/// the page are skipped with a warning rather than failing the batch.
pub fn reapply(doc: &mut Document, records: &[MarkRecord]) -> ReapplySummary {
    clear_markers(doc, None);
    let mut summary = ReapplySummary::default();

    for record in records {
        let occurrences = locate_with_fallbacks(doc, &record.text);
        let Some(occ) = pick_occurrence(doc, &occurrences, record).cloned() else {
            warn!(
                id = record.id.as_str(),
                text = record.text.as_str(),
                "stored mark no longer matches the page; skipping"
            );
            summary.skipped += 1;
            continue;
        };
        let style = style_for(record);
        let len = hl_dom::char_count(&occ.matched_text);
        if apply_marker(doc, occ.node, occ.start_offset, len, &style, &record.id) {
            summary.applied += 1;
        } else {
            warn!(id = record.id.as_str(), "marker application failed; skipping");
            summary.skipped += 1;
        }
    }

    flatten_nested_markers(doc);
    summary
}

/// Loads the page's records and reapplies them.
pub fn reapply_from_store(
    store: &MarkStore,
    page_url: &str,
    doc: &mut Document,
) -> HlResult<ReapplySummary> {
    let records = store.load_marks(page_url)?;
    Ok(reapply(doc, &records))
}

/// Blurs every occurrence of `text` on the page and reports how many were
/// wrapped.
///
/// Old blur markers are cleared first. The document is rescanned after
/// every wrap since wrapping splits text nodes; the scan skips text already
/// inside a marker, so each pass finds only the remaining occurrences.
pub fn apply_blur(doc: &mut Document, text: &str) -> usize {
    clear_markers(doc, Some(MarkKind::Blur));
    let style = MarkerStyle::blur();
    let mut applied = 0_usize;

    loop {
        let occurrences = find_occurrences(doc, text, false);
        let Some(occ) = occurrences.first().cloned() else {
            break;
        };
        let id = format!("hylyt-blur-{applied}");
        let len = hl_dom::char_count(&occ.matched_text);
        if !apply_marker(doc, occ.node, occ.start_offset, len, &style, &id) {
            warn!(
                node = occ.node,
                offset = occ.start_offset,
                "blur wrap failed; stopping the pass"
            );
            break;
        }
        applied += 1;
    }
    applied
}

/// Applies one protocol message to the session, the store and the page.
/// Returns the acknowledgement to send back, when the message expects one.
pub fn handle_message(
    state: &mut SessionState,
    store: &MarkStore,
    doc: &mut Document,
    message: &ActionMessage,
) -> HlResult<Option<ActionMessage>> {
    match message {
        ActionMessage::ExtensionStateChanged { enabled } => {
            state.enabled = *enabled;
            store.set_enabled(*enabled)?;
            if *enabled {
                if state.should_observe() {
                    let text = state.text_to_blur.clone();
                    apply_blur(doc, &text);
                }
            } else {
                clear_markers(doc, None);
            }
            Ok(None)
        }
        ActionMessage::ApplyBlur { text } => {
            let trimmed = text.trim().to_owned();
            state.text_to_blur = trimmed.clone();
            store.set_blur_text(&trimmed)?;
            if state.enabled && !trimmed.is_empty() {
                apply_blur(doc, &trimmed);
            }
            Ok(Some(ActionMessage::Ack { success: true }))
        }
        ActionMessage::RemoveBlur => {
            state.text_to_blur.clear();
            store.set_blur_text("")?;
            clear_markers(doc, Some(MarkKind::Blur));
            Ok(Some(ActionMessage::Ack { success: true }))
        }
        ActionMessage::Ack { .. } => Ok(None),
    }
}

/// Re-runs the blur pass after a batch of page mutations. Returns the
/// number of spans wrapped, zero when the session has nothing to observe.
pub fn process_mutation_batch(state: &SessionState, doc: &mut Document) -> usize {
    if !state.should_observe() {
        return 0;
    }
    let text = state.text_to_blur.clone();
    apply_blur(doc, &text)
}

fn style_for(record: &MarkRecord) -> MarkerStyle {
    match record.kind {
        MarkKind::Highlight => MarkerStyle::highlight(&record.color),
        MarkKind::Blur => MarkerStyle::blur(),
    }
}

#[cfg(test)]
mod tests {
    use super::ReapplySummary;
    use super::SessionState;
    use super::apply_blur;
    use super::capture_mark;
    use super::handle_message;
    use super::process_mutation_batch;
    use super::reapply;
    use crate::apply::find_markers;
    use crate::apply::marker_for_id;
    use crate::locate::find_occurrences;
    use crate::resolve::LiveSelection;
    use hl_html::HtmlParser;
    use hl_ipc::ActionMessage;
    use hl_storage::MarkKind;
    use hl_storage::MarkStore;
    use hl_storage::StoreConfig;
    use std::time::SystemTime;
    use std::time::UNIX_EPOCH;

    fn temp_store(label: &str) -> MarkStore {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|value| value.as_nanos())
            .unwrap_or_default();
        let root = std::env::temp_dir().join(format!("hylytool-engine-test-{label}-{stamp}"));
        MarkStore::new(StoreConfig::default()).with_persistent_root(root)
    }

    #[test]
    fn capture_records_ordinal_and_context() {
        let mut doc = HtmlParser.parse("<p>the cat sat on the cat mat</p>");
        let occurrences = find_occurrences(&doc, "cat", false);
        let selection = LiveSelection {
            node: occurrences[1].node,
            offset: 20,
        };

        let record = capture_mark(&mut doc, &selection, "cat", "#ffff00", MarkKind::Highlight, "m1");
        let record = record.unwrap_or_else(|_| unreachable!());
        assert_eq!(record.ordinal, Some(1));
        assert_eq!(record.total_at_capture, Some(2));
        assert_eq!(record.context_before.as_deref(), Some("the cat sat on the "));
        assert_eq!(record.context_after.as_deref(), Some(" mat"));

        // Only the second occurrence is wrapped.
        let marker = marker_for_id(&doc, "m1").unwrap_or_else(|| unreachable!());
        assert_eq!(doc.text_content(marker), "cat");
        assert_eq!(find_markers(&doc, None).len(), 1);
        let remaining = find_occurrences(&doc, "cat", false);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].start_offset, 4);
    }

    #[test]
    fn capture_rejects_text_missing_from_page() {
        let mut doc = HtmlParser.parse("<p>something else</p>");
        let node = doc.text_nodes()[0];
        let selection = LiveSelection { node, offset: 0 };

        let result = capture_mark(&mut doc, &selection, "absent", "#fff", MarkKind::Highlight, "m1");
        match result {
            Err(error) => assert_eq!(error.code, "engine.text_not_found"),
            Ok(_) => unreachable!(),
        }
        assert!(find_markers(&doc, None).is_empty());
    }

    #[test]
    fn reapply_survives_inserted_content() {
        // Capture against the original page.
        let mut doc = HtmlParser.parse("<p>sing hello world</p><p>say hello world</p>");
        let occurrences = find_occurrences(&doc, "hello world", false);
        let selection = LiveSelection {
            node: occurrences[1].node,
            offset: 4,
        };
        let record =
            capture_mark(&mut doc, &selection, "hello world", "#ff0", MarkKind::Highlight, "m1");
        let record = record.unwrap_or_else(|_| unreachable!());

        // Revisit: a banner now precedes the old content, and the first
        // occurrence is gone, so the ordinal no longer fits.
        let mut revisit = HtmlParser.parse("<div>breaking news</div><p>say hello world</p>");
        let summary = reapply(&mut revisit, &[record]);
        assert_eq!(summary, ReapplySummary { applied: 1, skipped: 0 });
        let marker = marker_for_id(&revisit, "m1").unwrap_or_else(|| unreachable!());
        assert_eq!(revisit.text_content(marker), "hello world");
    }

    #[test]
    fn reapply_skips_vanished_text() {
        let mut doc = HtmlParser.parse("<p>here today</p>");
        let occurrences = find_occurrences(&doc, "today", false);
        let selection = LiveSelection {
            node: occurrences[0].node,
            offset: 5,
        };
        let record =
            capture_mark(&mut doc, &selection, "today", "#ff0", MarkKind::Highlight, "m1");
        let record = record.unwrap_or_else(|_| unreachable!());

        let mut revisit = HtmlParser.parse("<p>gone tomorrow</p>");
        let summary = reapply(&mut revisit, &[record]);
        assert_eq!(summary, ReapplySummary { applied: 0, skipped: 1 });
        assert!(find_markers(&revisit, None).is_empty());
    }

    #[test]
    fn blur_wraps_every_occurrence() {
        let mut doc = HtmlParser.parse("<p>secret one</p><div>another secret here</div>");
        let wrapped = apply_blur(&mut doc, "secret");
        assert_eq!(wrapped, 2);
        assert_eq!(find_markers(&doc, Some(MarkKind::Blur)).len(), 2);
        // Re-running is idempotent.
        assert_eq!(apply_blur(&mut doc, "secret"), 2);
        assert_eq!(find_markers(&doc, Some(MarkKind::Blur)).len(), 2);
        assert_eq!(
            doc.text_content(doc.root()),
            "secret oneanother secret here"
        );
    }

    #[test]
    fn blur_message_roundtrip_through_store() {
        let store = temp_store("blur-roundtrip");
        let mut state = SessionState::default();
        let mut doc = HtmlParser.parse("<p>hide the token now, token later</p>");

        let reply = handle_message(
            &mut state,
            &store,
            &mut doc,
            &ActionMessage::ApplyBlur {
                text: "  token  ".to_owned(),
            },
        );
        assert_eq!(reply, Ok(Some(ActionMessage::Ack { success: true })));
        assert_eq!(state.text_to_blur, "token");
        assert_eq!(store.blur_text(), Ok("token".to_owned()));
        assert_eq!(find_markers(&doc, Some(MarkKind::Blur)).len(), 2);

        let reply = handle_message(&mut state, &store, &mut doc, &ActionMessage::RemoveBlur);
        assert_eq!(reply, Ok(Some(ActionMessage::Ack { success: true })));
        assert!(state.text_to_blur.is_empty());
        assert_eq!(store.blur_text(), Ok(String::new()));
        assert!(find_markers(&doc, None).is_empty());
        assert_eq!(doc.text_content(doc.root()), "hide the token now, token later");
    }

    #[test]
    fn disabling_clears_markers_and_enabling_restores_blur() {
        let store = temp_store("toggle");
        let mut state = SessionState::default();
        let mut doc = HtmlParser.parse("<p>watch this word closely</p>");

        state.text_to_blur = "word".to_owned();
        assert_eq!(process_mutation_batch(&state, &mut doc), 1);

        let reply = handle_message(
            &mut state,
            &store,
            &mut doc,
            &ActionMessage::ExtensionStateChanged { enabled: false },
        );
        assert_eq!(reply, Ok(None));
        assert!(find_markers(&doc, None).is_empty());
        assert_eq!(process_mutation_batch(&state, &mut doc), 0);

        let reply = handle_message(
            &mut state,
            &store,
            &mut doc,
            &ActionMessage::ExtensionStateChanged { enabled: true },
        );
        assert_eq!(reply, Ok(None));
        assert_eq!(find_markers(&doc, Some(MarkKind::Blur)).len(), 1);
    }

    #[test]
    fn settings_notifications_drive_state_transitions() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut store = temp_store("observer");
        let log: Rc<RefCell<Vec<hl_storage::SettingsChange>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        store.subscribe(Box::new(move |change| sink.borrow_mut().push(change.clone())));

        assert!(store.set_blur_text("badge").is_ok());
        assert!(store.set_enabled(false).is_ok());
        assert!(store.set_highlight_color("#00ff00").is_ok());

        let mut state = SessionState::default();
        for change in log.borrow().iter() {
            state.apply_settings_change(change);
        }
        assert_eq!(state.text_to_blur, "badge");
        assert!(!state.enabled);
        assert_eq!(state.highlight_color, "#00ff00");
        assert!(!state.should_observe());
    }

    #[test]
    fn session_state_defaults_and_store_mirror() {
        let state = SessionState::default();
        assert!(state.enabled);
        assert!(!state.should_observe());

        let store = temp_store("mirror");
        let loaded = SessionState::from_store(&store).unwrap_or_else(|_| unreachable!());
        assert_eq!(loaded, state);
    }
}
