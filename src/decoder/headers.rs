//! RFC 5322 header block handling for item classification.
//!
//! Only what the decoder needs to build its item tree lives here: unfolding,
//! lookup, deleted flags, Gmail labels, sender and date. Subjects and MIME
//! structure are left to `mail-parser`.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Mozilla `X-Mozilla-Status` bit for expunged (deleted) messages.
const MOZILLA_EXPUNGED: u32 = 0x0008;

/// Unfolded header block: `(lowercase_name, value)` pairs in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderBlock {
    fields: Vec<(String, String)>,
}

impl HeaderBlock {
    /// Parse the header block at the start of `message`.
    ///
    /// Returns `None` when the first line is not a header field, which is how
    /// unclassifiable items are detected.
    pub fn parse(message: &[u8]) -> Option<Self> {
        let end = find_header_end(message).unwrap_or(message.len());
        let text = decode_header_bytes(&message[..end]);

        let first = text.lines().next()?;
        if !is_field_line(first) {
            return None;
        }

        let mut fields: Vec<(String, String)> = Vec::new();
        for line in text.lines() {
            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some(last) = fields.last_mut() {
                    last.1.push(' ');
                    last.1.push_str(line.trim());
                }
            } else if let Some(colon) = line.find(':') {
                let name = line[..colon].trim().to_lowercase();
                let value = line[colon + 1..].trim().to_string();
                fields.push((name, value));
            }
        }
        Some(Self { fields })
    }

    /// First value of a header (name is matched case-insensitively).
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.fields
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Lowercased `type/subtype` of the top-level `Content-Type`.
    pub fn content_type(&self) -> String {
        self.get("content-type")
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_lowercase())
            .unwrap_or_else(|| "text/plain".to_string())
    }

    /// Whether the message carries a vCard as its top-level body.
    pub fn is_vcard(&self) -> bool {
        matches!(
            self.content_type().as_str(),
            "text/vcard" | "text/x-vcard" | "text/directory"
        )
    }

    /// Deleted flag from `X-Status: D` or the Mozilla expunged bit.
    pub fn is_deleted(&self) -> bool {
        if self.get("x-status").is_some_and(|s| s.contains('D')) {
            return true;
        }
        self.get("x-mozilla-status")
            .and_then(|s| u32::from_str_radix(s.trim(), 16).ok())
            .is_some_and(|flags| flags & MOZILLA_EXPUNGED != 0)
    }

    /// Folder path from the first Gmail label (`"Work/Projects"` → `["Work", "Projects"]`).
    pub fn label_path(&self) -> Vec<String> {
        self.get("x-gmail-labels")
            .and_then(|labels| labels.split(',').map(str::trim).find(|l| !l.is_empty()))
            .map(|label| {
                label
                    .split('/')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Bare sender address from the `From:` header.
    pub fn sender(&self) -> String {
        let raw = self.get("from").unwrap_or_default().trim();
        match (raw.rfind('<'), raw.rfind('>')) {
            (Some(start), Some(end)) if end > start => raw[start + 1..end].trim().to_string(),
            _ => raw.to_string(),
        }
    }

    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.get("date").and_then(parse_date)
    }
}

/// A header field line starts with a non-empty name free of whitespace, then `:`.
fn is_field_line(line: &str) -> bool {
    match line.find(':') {
        Some(0) | None => false,
        Some(colon) => !line[..colon].contains(char::is_whitespace),
    }
}

/// Decode raw header bytes: UTF-8 when valid, Windows-1252 otherwise.
fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Byte offset where the header block ends (start of the first blank line).
pub fn find_header_end(data: &[u8]) -> Option<usize> {
    for i in 0..data.len().saturating_sub(1) {
        if data[i] == b'\n' && data[i + 1] == b'\n' {
            return Some(i);
        }
        if i + 3 < data.len() && &data[i..i + 4] == b"\r\n\r\n" {
            return Some(i);
        }
    }
    None
}

/// Parse a `Date:` value: RFC 2822, RFC 3339, then a few lenient layouts.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    // Drop a trailing "(UTC)" style comment and retry
    let no_comment = trimmed.split('(').next().unwrap_or(trimmed).trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(no_comment) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%d %H:%M:%S", "%d %b %Y %H:%M:%S"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(no_comment, fmt) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    None
}
