//! Action messages exchanged between the popup, background and content
//! sides, with a length-prefixed framing codec and in-memory endpoints.

use hl_core::HlError;
use hl_core::HlResult;
use std::sync::mpsc;
use std::time::Duration;

const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024;
const FRAME_PREFIX_BYTES: usize = 4;
const MESSAGE_TAG_STATE_CHANGED: u8 = 1;
const MESSAGE_TAG_APPLY_BLUR: u8 = 2;
const MESSAGE_TAG_REMOVE_BLUR: u8 = 3;
const MESSAGE_TAG_ACK: u8 = 4;

/// Messaging peer roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Popup,
    Background,
    Content,
}

impl PeerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Popup => "popup",
            Self::Background => "background",
            Self::Content => "content",
        }
    }

    pub fn from_role_name(value: &str) -> Option<Self> {
        match value {
            "popup" => Some(Self::Popup),
            "background" => Some(Self::Background),
            "content" => Some(Self::Content),
            _ => None,
        }
    }
}

/// Inbound actions for the content side, plus the acknowledgment reply.
///
/// `ApplyBlur` and `RemoveBlur` must be answered with an `Ack`;
/// `ExtensionStateChanged` is fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionMessage {
    ExtensionStateChanged { enabled: bool },
    ApplyBlur { text: String },
    RemoveBlur,
    Ack { success: bool },
}

/// Per-endpoint messaging limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub role: PeerRole,
    pub max_message_bytes: usize,
}

impl ChannelConfig {
    pub fn hardened(role: PeerRole) -> HlResult<Self> {
        let config = Self {
            role,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> HlResult<()> {
        if self.max_message_bytes == 0 {
            return Err(HlError::new(
                "ipc.max_message_bytes_invalid",
                "channel max_message_bytes must be greater than zero",
            ));
        }

        if self.max_message_bytes > (1024 * 1024) {
            return Err(HlError::new(
                "ipc.max_message_bytes_too_large",
                "channel max_message_bytes exceeds hard limit (1 MiB)",
            ));
        }

        Ok(())
    }
}

/// In-memory endpoint that applies framing and message-size checks.
pub struct LocalEndpoint {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    config: ChannelConfig,
}

impl LocalEndpoint {
    pub fn role(&self) -> PeerRole {
        self.config.role
    }

    pub fn send(&self, message: &ActionMessage) -> HlResult<()> {
        let frame = encode_message(message, self.config.max_message_bytes)?;
        self.tx.send(frame).map_err(|error| {
            HlError::new(
                "ipc.send_failed",
                format!(
                    "failed to send message from {} endpoint: {error}",
                    self.config.role.as_str()
                ),
            )
        })
    }

    pub fn recv_timeout(&self, timeout: Duration) -> HlResult<ActionMessage> {
        let frame = self.rx.recv_timeout(timeout).map_err(|error| {
            HlError::new(
                "ipc.recv_failed",
                format!(
                    "failed to receive message for {} endpoint: {error}",
                    self.config.role.as_str()
                ),
            )
        })?;
        decode_message(&frame, self.config.max_message_bytes)
    }
}

/// Creates paired in-memory endpoints.
pub fn local_channel_pair(
    left: ChannelConfig,
    right: ChannelConfig,
) -> HlResult<(LocalEndpoint, LocalEndpoint)> {
    left.validate()?;
    right.validate()?;

    let (left_to_right_tx, left_to_right_rx) = mpsc::channel();
    let (right_to_left_tx, right_to_left_rx) = mpsc::channel();

    Ok((
        LocalEndpoint {
            tx: left_to_right_tx,
            rx: right_to_left_rx,
            config: left,
        },
        LocalEndpoint {
            tx: right_to_left_tx,
            rx: left_to_right_rx,
            config: right,
        },
    ))
}

/// Encodes an action message as a length-prefixed frame.
pub fn encode_message(message: &ActionMessage, max_message_bytes: usize) -> HlResult<Vec<u8>> {
    let payload = encode_message_payload(message)?;
    encode_frame(&payload, max_message_bytes)
}

/// Decodes a length-prefixed action message frame.
pub fn decode_message(frame: &[u8], max_message_bytes: usize) -> HlResult<ActionMessage> {
    let payload = decode_frame(frame, max_message_bytes)?;
    decode_message_payload(&payload)
}

fn encode_frame(payload: &[u8], max_message_bytes: usize) -> HlResult<Vec<u8>> {
    if payload.len() > max_message_bytes {
        return Err(HlError::new(
            "ipc.message_too_large",
            format!(
                "payload exceeds max_message_bytes ({} > {})",
                payload.len(),
                max_message_bytes
            ),
        ));
    }

    let len_u32 = u32::try_from(payload.len()).map_err(|_| {
        HlError::new(
            "ipc.message_too_large",
            "payload length does not fit in 32-bit frame prefix",
        )
    })?;

    let mut out = Vec::with_capacity(FRAME_PREFIX_BYTES + payload.len());
    out.extend_from_slice(&len_u32.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

fn decode_frame(frame: &[u8], max_message_bytes: usize) -> HlResult<Vec<u8>> {
    if frame.len() < FRAME_PREFIX_BYTES {
        return Err(HlError::new(
            "ipc.frame_too_short",
            "frame is shorter than the 4-byte length prefix",
        ));
    }

    let mut len_bytes = [0_u8; FRAME_PREFIX_BYTES];
    len_bytes.copy_from_slice(&frame[..FRAME_PREFIX_BYTES]);
    let payload_len = u32::from_be_bytes(len_bytes) as usize;
    if payload_len > max_message_bytes {
        return Err(HlError::new(
            "ipc.message_too_large",
            format!(
                "decoded payload exceeds max_message_bytes ({payload_len} > {max_message_bytes})"
            ),
        ));
    }

    let expected = FRAME_PREFIX_BYTES + payload_len;
    if frame.len() != expected {
        return Err(HlError::new(
            "ipc.frame_length_mismatch",
            format!(
                "frame length mismatch: expected {expected} bytes, got {}",
                frame.len()
            ),
        ));
    }

    Ok(frame[FRAME_PREFIX_BYTES..].to_vec())
}

fn encode_message_payload(message: &ActionMessage) -> HlResult<Vec<u8>> {
    match message {
        ActionMessage::ExtensionStateChanged { enabled } => {
            Ok(vec![MESSAGE_TAG_STATE_CHANGED, u8::from(*enabled)])
        }
        ActionMessage::ApplyBlur { text } => {
            let text_bytes = text.as_bytes();
            let text_len = u16::try_from(text_bytes.len()).map_err(|_| {
                HlError::new(
                    "ipc.message_text_too_large",
                    format!(
                        "blur text exceeds 16-bit size limit ({} bytes)",
                        text_bytes.len()
                    ),
                )
            })?;

            let mut out = Vec::with_capacity(1 + 2 + text_bytes.len());
            out.push(MESSAGE_TAG_APPLY_BLUR);
            out.extend_from_slice(&text_len.to_be_bytes());
            out.extend_from_slice(text_bytes);
            Ok(out)
        }
        ActionMessage::RemoveBlur => Ok(vec![MESSAGE_TAG_REMOVE_BLUR]),
        ActionMessage::Ack { success } => Ok(vec![MESSAGE_TAG_ACK, u8::from(*success)]),
    }
}

fn decode_message_payload(payload: &[u8]) -> HlResult<ActionMessage> {
    if payload.is_empty() {
        return Err(HlError::new(
            "ipc.message_empty",
            "action message payload is empty",
        ));
    }

    let mut offset = 0_usize;
    let tag = read_u8(payload, &mut offset, "tag")?;
    let message = match tag {
        MESSAGE_TAG_STATE_CHANGED => ActionMessage::ExtensionStateChanged {
            enabled: read_bool(payload, &mut offset, "enabled")?,
        },
        MESSAGE_TAG_APPLY_BLUR => ActionMessage::ApplyBlur {
            text: read_string_u16(payload, &mut offset, "text")?,
        },
        MESSAGE_TAG_REMOVE_BLUR => ActionMessage::RemoveBlur,
        MESSAGE_TAG_ACK => ActionMessage::Ack {
            success: read_bool(payload, &mut offset, "success")?,
        },
        other => {
            return Err(HlError::new(
                "ipc.message_tag_unknown",
                format!("unknown action message tag `{other}`"),
            ));
        }
    };

    if offset != payload.len() {
        return Err(HlError::new(
            "ipc.message_trailing_bytes",
            format!(
                "action message payload has trailing bytes (decoded {offset} of {})",
                payload.len()
            ),
        ));
    }

    Ok(message)
}

fn read_u8(payload: &[u8], offset: &mut usize, field: &str) -> HlResult<u8> {
    if *offset >= payload.len() {
        return Err(HlError::new(
            "ipc.message_truncated",
            format!("missing `{field}` in action message payload"),
        ));
    }

    let value = payload[*offset];
    *offset += 1;
    Ok(value)
}

fn read_bool(payload: &[u8], offset: &mut usize, field: &str) -> HlResult<bool> {
    match read_u8(payload, offset, field)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(HlError::new(
            "ipc.message_field_invalid",
            format!("invalid `{field}` flag `{other}`; expected 0 or 1"),
        )),
    }
}

fn read_u16(payload: &[u8], offset: &mut usize, field: &str) -> HlResult<u16> {
    let bytes = read_exact(payload, offset, 2, field)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_string_u16(payload: &[u8], offset: &mut usize, field: &str) -> HlResult<String> {
    let len = usize::from(read_u16(payload, offset, field)?);
    let bytes = read_exact(payload, offset, len, field)?;
    String::from_utf8(bytes.to_vec()).map_err(|error| {
        HlError::new(
            "ipc.message_utf8_invalid",
            format!("action message field `{field}` is not valid UTF-8: {error}"),
        )
    })
}

fn read_exact<'a>(
    payload: &'a [u8],
    offset: &mut usize,
    len: usize,
    field: &str,
) -> HlResult<&'a [u8]> {
    let end = offset.saturating_add(len);
    if end > payload.len() {
        return Err(HlError::new(
            "ipc.message_truncated",
            format!("action message payload ended while reading `{field}` (need {len} bytes)"),
        ));
    }

    let out = &payload[*offset..end];
    *offset = end;
    Ok(out)
}
