//! Page marking engine: locates target text in a parsed page, resolves
//! which occurrence a stored mark refers to, and applies or clears the
//! marker elements that blur or highlight it.
//!
//! The flow at capture time is locate, resolve, apply, persist; at revisit
//! time it is load, locate with fallbacks, pick, apply. All mutation goes
//! through the applicator so failed wraps never leave the page text
//! altered.

pub mod apply;
pub mod locate;
pub mod resolve;
pub mod session;

pub use apply::BLUR_FILTER;
pub use apply::MARKER_CLASS;
pub use apply::MARKER_KIND_ATTR;
pub use apply::MarkerStyle;
pub use apply::apply_marker;
pub use apply::clear_markers;
pub use apply::find_markers;
pub use apply::flatten_nested_markers;
pub use apply::marker_for_id;
pub use apply::remove_marker;
pub use locate::Occurrence;
pub use locate::find_occurrences;
pub use resolve::CONTEXT_CHARS;
pub use resolve::LiveSelection;
pub use resolve::OFFSET_DRIFT_TOLERANCE;
pub use resolve::locate_with_fallbacks;
pub use resolve::pick_occurrence;
pub use resolve::resolve_ordinal;
pub use resolve::surrounding_context;
pub use session::ReapplySummary;
pub use session::SessionState;
pub use session::apply_blur;
pub use session::capture_mark;
pub use session::handle_message;
pub use session::process_mutation_batch;
pub use session::reapply;
pub use session::reapply_from_store;
