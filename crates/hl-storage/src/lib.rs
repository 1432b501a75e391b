//! Mark persistence: per-page key-value partitions plus global settings.
//!
//! Marks live in one partition file per page URL; the toggle and color
//! settings live in a shared settings partition under their historical key
//! names. Settings writes fan out to registered change observers so live
//! sessions can track mode and color without a reload.

mod record;

pub use record::MAX_MARK_TEXT_CHARS;
pub use record::MarkKind;
pub use record::MarkRecord;
pub use record::normalize_mark_text;

use hl_core::HlError;
use hl_core::HlResult;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use url::Url;

pub const SETTING_ENABLED: &str = "enabled";
/// Historical key name for the blur target text.
pub const SETTING_BLUR_TEXT: &str = "item";
pub const SETTING_HIGHLIGHT_MODE: &str = "highlightMode";
pub const SETTING_HIGHLIGHT_COLOR: &str = "highlightColor";
pub const DEFAULT_HIGHLIGHT_COLOR: &str = "#ffff00";

const MARK_KEY_PREFIX: &str = "mark.";
const SETTINGS_FILE: &str = "settings.kv";

/// Durable storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub partition_by_page: bool,
    pub ephemeral_mode: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            partition_by_page: true,
            ephemeral_mode: false,
        }
    }
}

/// One settings write, as delivered to change observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsChange {
    Enabled(bool),
    BlurText(String),
    HighlightMode(bool),
    HighlightColor(String),
}

type SettingsObserver = Box<dyn Fn(&SettingsChange)>;

/// Entry point for mark and settings persistence.
pub struct MarkStore {
    config: StoreConfig,
    persistent_root: Option<PathBuf>,
    observers: Vec<SettingsObserver>,
}

impl fmt::Debug for MarkStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkStore")
            .field("config", &self.config)
            .field("persistent_root", &self.persistent_root)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl MarkStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            persistent_root: None,
            observers: Vec::new(),
        }
    }

    pub fn with_persistent_root(mut self, root: PathBuf) -> Self {
        self.persistent_root = Some(root);
        self
    }

    pub fn persistent_root(&self) -> Option<&Path> {
        self.persistent_root.as_deref()
    }

    /// Registers a callback fired after every settings write.
    pub fn subscribe(&mut self, observer: SettingsObserver) {
        self.observers.push(observer);
    }

    fn notify(&self, change: &SettingsChange) {
        for observer in &self.observers {
            observer(change);
        }
    }

    pub fn enabled(&self) -> HlResult<bool> {
        // The content side treats an absent key as enabled.
        Ok(self.setting(SETTING_ENABLED)?.as_deref() != Some("false"))
    }

    pub fn set_enabled(&self, enabled: bool) -> HlResult<()> {
        self.set_setting(SETTING_ENABLED, bool_str(enabled))?;
        self.notify(&SettingsChange::Enabled(enabled));
        Ok(())
    }

    pub fn blur_text(&self) -> HlResult<String> {
        Ok(self.setting(SETTING_BLUR_TEXT)?.unwrap_or_default())
    }

    pub fn set_blur_text(&self, text: &str) -> HlResult<()> {
        self.set_setting(SETTING_BLUR_TEXT, text)?;
        self.notify(&SettingsChange::BlurText(text.to_owned()));
        Ok(())
    }

    pub fn highlight_mode(&self) -> HlResult<bool> {
        Ok(self.setting(SETTING_HIGHLIGHT_MODE)?.as_deref() == Some("true"))
    }

    pub fn set_highlight_mode(&self, on: bool) -> HlResult<()> {
        self.set_setting(SETTING_HIGHLIGHT_MODE, bool_str(on))?;
        self.notify(&SettingsChange::HighlightMode(on));
        Ok(())
    }

    pub fn highlight_color(&self) -> HlResult<String> {
        Ok(self
            .setting(SETTING_HIGHLIGHT_COLOR)?
            .unwrap_or_else(|| DEFAULT_HIGHLIGHT_COLOR.to_owned()))
    }

    pub fn set_highlight_color(&self, color: &str) -> HlResult<()> {
        self.set_setting(SETTING_HIGHLIGHT_COLOR, color)?;
        self.notify(&SettingsChange::HighlightColor(color.to_owned()));
        Ok(())
    }

    pub fn save_mark(&self, page_url: &str, record: &MarkRecord) -> HlResult<()> {
        let path = self.page_partition_path(page_url)?;
        let mut map = read_partition_map(&path)?;
        map.insert(format!("{MARK_KEY_PREFIX}{}", record.id), record.encode());
        write_partition_map(&path, &map)
    }

    /// Loads every decodable mark for the page, in stable id order.
    /// Undecodable entries are skipped, not fatal; a stale record costs one
    /// mark, not the page.
    pub fn load_marks(&self, page_url: &str) -> HlResult<Vec<MarkRecord>> {
        let path = self.page_partition_path(page_url)?;
        let map = read_partition_map(&path)?;
        Ok(map
            .iter()
            .filter(|(key, _)| key.starts_with(MARK_KEY_PREFIX))
            .filter_map(|(_, value)| MarkRecord::decode(value).ok())
            .collect())
    }

    pub fn remove_mark(&self, page_url: &str, id: &str) -> HlResult<()> {
        let path = self.page_partition_path(page_url)?;
        let mut map = read_partition_map(&path)?;
        map.remove(&format!("{MARK_KEY_PREFIX}{id}"));
        if map.is_empty() {
            return remove_partition_file(&path);
        }
        write_partition_map(&path, &map)
    }

    pub fn clear_marks(&self, page_url: &str) -> HlResult<()> {
        let path = self.page_partition_path(page_url)?;
        remove_partition_file(&path)
    }

    fn setting(&self, key: &str) -> HlResult<Option<String>> {
        let path = self.settings_path()?;
        let map = read_partition_map(&path)?;
        Ok(map.get(key).cloned())
    }

    fn set_setting(&self, key: &str, value: &str) -> HlResult<()> {
        let path = self.settings_path()?;
        let mut map = read_partition_map(&path)?;
        map.insert(key.to_owned(), value.to_owned());
        write_partition_map(&path, &map)
    }

    fn settings_path(&self) -> HlResult<PathBuf> {
        Ok(self.storage_root()?.join(SETTINGS_FILE))
    }

    fn page_partition_path(&self, page_url: &str) -> HlResult<PathBuf> {
        let partition = if self.config.partition_by_page {
            partition_for_page(page_url)
        } else {
            "global".to_owned()
        };
        Ok(self
            .storage_root()?
            .join("pages")
            .join(format!("{partition}.kv")))
    }

    fn storage_root(&self) -> HlResult<&Path> {
        if self.config.ephemeral_mode {
            return Err(HlError::new(
                "storage.persistence_disabled",
                "persistent storage is disabled in ephemeral mode",
            ));
        }

        self.persistent_root.as_deref().ok_or_else(|| {
            HlError::new(
                "storage.persistence_unconfigured",
                "persistent storage root is not configured",
            )
        })
    }
}

/// Derives a stable partition name from a page URL: host plus path when the
/// URL parses, the sanitized raw string otherwise.
pub fn partition_for_page(page_url: &str) -> String {
    match Url::parse(page_url) {
        Ok(url) => {
            let host = url.host_str().unwrap_or("unknown");
            sanitize_partition_name(&format!("{host}{}", url.path()))
        }
        Err(_) => sanitize_partition_name(page_url),
    }
}

fn sanitize_partition_name(input: &str) -> String {
    let mut out = String::new();
    for ch in input.trim().to_ascii_lowercase().chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }

    if out.is_empty() {
        "unknown".to_owned()
    } else {
        out
    }
}

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

fn remove_partition_file(path: &Path) -> HlResult<()> {
    if path.exists() {
        fs::remove_file(path).map_err(|error| {
            HlError::new(
                "storage.partition_remove_failed",
                format!("failed removing partition file `{}`: {error}", path.display()),
            )
        })?;
    }
    Ok(())
}

fn read_partition_map(path: &Path) -> HlResult<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let content = fs::read_to_string(path).map_err(|error| {
        HlError::new(
            "storage.partition_read_failed",
            format!("failed to read partition file `{}`: {error}", path.display()),
        )
    })?;

    let mut map = BTreeMap::new();
    for (index, line) in content.lines().enumerate() {
        if line.is_empty() {
            continue;
        }

        let (key_hex, value_hex) = line.split_once('\t').ok_or_else(|| {
            HlError::new(
                "storage.partition_format_invalid",
                format!(
                    "invalid record format at `{}` line {}",
                    path.display(),
                    index + 1
                ),
            )
        })?;

        let key = decode_hex_string(key_hex)?;
        let value = decode_hex_string(value_hex)?;
        map.insert(key, value);
    }

    Ok(map)
}

fn write_partition_map(path: &Path, map: &BTreeMap<String, String>) -> HlResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| {
            HlError::new(
                "storage.partition_dir_create_failed",
                format!(
                    "failed to create partition directory `{}`: {error}",
                    parent.display()
                ),
            )
        })?;
    }

    let mut encoded = String::new();
    for (key, value) in map {
        encoded.push_str(&encode_hex_string(key));
        encoded.push('\t');
        encoded.push_str(&encode_hex_string(value));
        encoded.push('\n');
    }

    fs::write(path, encoded).map_err(|error| {
        HlError::new(
            "storage.partition_write_failed",
            format!("failed to write partition file `{}`: {error}", path.display()),
        )
    })
}

pub(crate) fn encode_hex_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len().saturating_mul(2));
    for byte in value.as_bytes() {
        out.push(hex_char(byte >> 4));
        out.push(hex_char(byte & 0x0f));
    }
    out
}

pub(crate) fn decode_hex_string(value: &str) -> HlResult<String> {
    if value.len() % 2 != 0 {
        return Err(HlError::new(
            "storage.hex_invalid",
            "hex field length must be even",
        ));
    }

    let mut bytes = Vec::with_capacity(value.len() / 2);
    let chars: Vec<char> = value.chars().collect();
    let mut index = 0_usize;
    while index < chars.len() {
        let high = decode_hex_nibble(chars[index])?;
        let low = decode_hex_nibble(chars[index + 1])?;
        bytes.push((high << 4) | low);
        index += 2;
    }

    String::from_utf8(bytes).map_err(|error| {
        HlError::new(
            "storage.utf8_invalid",
            format!("stored field is not valid UTF-8: {error}"),
        )
    })
}

fn hex_char(value: u8) -> char {
    match value {
        0..=9 => (b'0' + value) as char,
        10..=15 => (b'a' + (value - 10)) as char,
        _ => '0',
    }
}

fn decode_hex_nibble(ch: char) -> HlResult<u8> {
    match ch {
        '0'..='9' => Ok((ch as u8) - b'0'),
        'a'..='f' => Ok((ch as u8) - b'a' + 10),
        'A'..='F' => Ok((ch as u8) - b'A' + 10),
        _ => Err(HlError::new(
            "storage.hex_invalid",
            format!("invalid hex character `{ch}`"),
        )),
    }
}
