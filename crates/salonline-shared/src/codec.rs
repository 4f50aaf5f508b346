//! Raw message text <-> typed content.
//!
//! The inbox stores plain strings. Two conventions are embedded in them:
//! a leading [`RESOLUTION_SENTINEL`] marks the operator's "resolved" message,
//! and bracketed tags such as `[image:https://cdn/x.png]` carry an attachment.
//! Both are decoded exactly once, here, so nothing downstream re-parses text.

use crate::constants::RESOLUTION_SENTINEL;
use crate::types::{Attachment, AttachmentKind};

/// Result of decoding one raw message string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBody {
    pub text: String,
    pub attachment: Option<Attachment>,
    pub is_resolution_marker: bool,
}

/// Decode a raw message body as stored by the inbox.
pub fn decode(raw: &str) -> DecodedBody {
    let (payload, is_resolution_marker) = match raw.trim_start().strip_prefix(RESOLUTION_SENTINEL) {
        Some(rest) => (rest.strip_prefix(&[' ', '\n'][..]).unwrap_or(rest), true),
        None => (raw, false),
    };

    let (text, attachment) = match find_attachment_tag(payload) {
        Some((start, end, attachment)) => {
            let mut text = String::with_capacity(payload.len());
            text.push_str(payload[..start].trim());
            let tail = payload[end..].trim();
            if !text.is_empty() && !tail.is_empty() {
                text.push(' ');
            }
            text.push_str(tail);
            (text, Some(attachment))
        }
        None => (payload.trim().to_string(), None),
    };

    DecodedBody {
        text,
        attachment,
        is_resolution_marker,
    }
}

/// Encode an outgoing message body, appending the attachment tag if any.
pub fn encode(text: &str, attachment: Option<&Attachment>) -> String {
    let text = text.trim();
    match attachment {
        Some(a) if text.is_empty() => format!("[{}:{}]", a.kind.tag(), a.url),
        Some(a) => format!("{text} [{}:{}]", a.kind.tag(), a.url),
        None => text.to_string(),
    }
}

/// Raw text of an operator message that resolves a ticket.
pub fn resolution(note: &str) -> String {
    let note = note.trim();
    if note.is_empty() {
        RESOLUTION_SENTINEL.to_string()
    } else {
        format!("{RESOLUTION_SENTINEL} {note}")
    }
}

/// Locate the first well-formed attachment tag. Returns its byte range.
fn find_attachment_tag(s: &str) -> Option<(usize, usize, Attachment)> {
    let mut from = 0;
    while let Some(offset) = s[from..].find('[') {
        let start = from + offset;
        let body = &s[start + 1..];
        for kind in AttachmentKind::ALL {
            let Some(rest) = body
                .strip_prefix(kind.tag())
                .and_then(|r| r.strip_prefix(':'))
            else {
                continue;
            };
            let Some(close) = rest.find(']') else {
                continue;
            };
            let url = rest[..close].trim();
            if url.is_empty() {
                continue;
            }
            let end = start + 1 + kind.tag().len() + 1 + close + 1;
            return Some((
                start,
                end,
                Attachment {
                    kind,
                    url: url.to_string(),
                },
            ));
        }
        from = start + 1;
    }
    None
}
