//! Persisted mark records and their storage codec.
//!
//! Records serialize as tab-separated `field=hex(value)` pairs so that
//! unknown fields from newer versions decode cleanly; only `id`, `text` and
//! `color` are required.

use crate::decode_hex_string;
use crate::encode_hex_string;
use hl_core::HlError;
use hl_core::HlResult;

/// Normalized mark text is capped at this many chars.
pub const MAX_MARK_TEXT_CHARS: usize = 100;

/// What a marker does to the wrapped span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkKind {
    Blur,
    Highlight,
}

impl MarkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blur => "blur",
            Self::Highlight => "highlight",
        }
    }

    pub fn from_kind_name(value: &str) -> Option<Self> {
        match value {
            "blur" => Some(Self::Blur),
            "highlight" => Some(Self::Highlight),
            _ => None,
        }
    }
}

/// One user-created mark, as persisted per page.
///
/// `ordinal` addresses a position in the occurrence list computed for the
/// same normalized text, never a node identity; `total_at_capture` is kept
/// only for sanity checks and fallbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkRecord {
    pub id: String,
    pub text: String,
    pub color: String,
    pub kind: MarkKind,
    pub ordinal: Option<usize>,
    pub total_at_capture: Option<usize>,
    pub context_before: Option<String>,
    pub context_after: Option<String>,
}

impl MarkRecord {
    pub fn new(id: &str, text: &str, color: &str, kind: MarkKind) -> Self {
        Self {
            id: id.to_owned(),
            text: normalize_mark_text(text),
            color: color.to_owned(),
            kind,
            ordinal: None,
            total_at_capture: None,
            context_before: None,
            context_after: None,
        }
    }

    pub fn encode(&self) -> String {
        let mut fields: Vec<String> = vec![
            encode_field("id", &self.id),
            encode_field("text", &self.text),
            encode_field("color", &self.color),
            encode_field("kind", self.kind.as_str()),
        ];
        if let Some(ordinal) = self.ordinal {
            fields.push(encode_field("ordinal", &ordinal.to_string()));
        }
        if let Some(total) = self.total_at_capture {
            fields.push(encode_field("total", &total.to_string()));
        }
        if let Some(before) = &self.context_before {
            fields.push(encode_field("before", before));
        }
        if let Some(after) = &self.context_after {
            fields.push(encode_field("after", after));
        }
        fields.join("\t")
    }

    pub fn decode(input: &str) -> HlResult<Self> {
        let mut id: Option<String> = None;
        let mut text: Option<String> = None;
        let mut color: Option<String> = None;
        let mut kind = MarkKind::Highlight;
        let mut ordinal: Option<usize> = None;
        let mut total_at_capture: Option<usize> = None;
        let mut context_before: Option<String> = None;
        let mut context_after: Option<String> = None;

        for field in input.split('\t') {
            if field.is_empty() {
                continue;
            }
            let (name, value_hex) = field.split_once('=').ok_or_else(|| {
                HlError::new(
                    "storage.record_format_invalid",
                    format!("record field `{field}` has no `=` separator"),
                )
            })?;
            let value = decode_hex_string(value_hex)?;
            match name {
                "id" => id = Some(value),
                "text" => text = Some(value),
                "color" => color = Some(value),
                "kind" => {
                    if let Some(parsed) = MarkKind::from_kind_name(&value) {
                        kind = parsed;
                    }
                }
                "ordinal" => ordinal = value.parse().ok(),
                "total" => total_at_capture = value.parse().ok(),
                "before" => context_before = Some(value),
                "after" => context_after = Some(value),
                // Unknown fields are tolerated for schema evolution.
                _ => {}
            }
        }

        let id = id.ok_or_else(|| {
            HlError::new("storage.record_field_missing", "record has no `id` field")
        })?;
        let text = text.ok_or_else(|| {
            HlError::new("storage.record_field_missing", "record has no `text` field")
        })?;
        let color = color.ok_or_else(|| {
            HlError::new("storage.record_field_missing", "record has no `color` field")
        })?;

        Ok(Self {
            id,
            text,
            color,
            kind,
            ordinal,
            total_at_capture,
            context_before,
            context_after,
        })
    }
}

/// Trims, collapses internal whitespace to single spaces and caps length.
pub fn normalize_mark_text(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_MARK_TEXT_CHARS).collect()
}

fn encode_field(name: &str, value: &str) -> String {
    format!("{name}={}", encode_hex_string(value))
}
