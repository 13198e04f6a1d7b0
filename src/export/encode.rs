//! Byte-level encodings applied while exporting: line endings, mbox framing
//! and vCard extraction.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};

use crate::decoder::headers::find_header_end;
use crate::export::options::OutputMode;

/// Envelope sender used when a message has no usable address.
const UNKNOWN_SENDER: &str = "MAILER-DAEMON";

/// `ctime`-style date layout of `From ` lines.
const FROM_LINE_DATE: &str = "%a %b %e %H:%M:%S %Y";

/// Rewrite line endings of textual output.
pub fn apply_line_endings(data: &[u8], mode: OutputMode) -> Cow<'_, [u8]> {
    match mode {
        OutputMode::Native => Cow::Borrowed(data),
        OutputMode::Unix => {
            if !data.contains(&b'\r') {
                return Cow::Borrowed(data);
            }
            let mut out = Vec::with_capacity(data.len());
            let mut i = 0;
            while i < data.len() {
                if data[i] == b'\r' && data.get(i + 1) == Some(&b'\n') {
                    i += 1;
                    continue;
                }
                out.push(data[i]);
                i += 1;
            }
            Cow::Owned(out)
        }
        OutputMode::Dos => {
            let mut out = Vec::with_capacity(data.len() + data.len() / 32);
            let mut prev = 0u8;
            for &b in data {
                if b == b'\n' && prev != b'\r' {
                    out.push(b'\r');
                }
                out.push(b);
                prev = b;
            }
            Cow::Owned(out)
        }
    }
}

/// The `From ` separator line introducing a message in an mbox.
pub fn from_line(sender: &str, date: Option<DateTime<Utc>>) -> String {
    let sender = sender
        .split_whitespace()
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_SENDER);
    let date = date.unwrap_or_default();
    format!("From {sender} {}\n", date.format(FROM_LINE_DATE))
}

/// mboxrd quoting: every line matching `^>*From ` gains one more `>`.
pub fn escape_from_lines(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 16);
    for line in message.split_inclusive(|&b| b == b'\n') {
        let unquoted = line.iter().position(|&b| b != b'>').unwrap_or(line.len());
        if line[unquoted..].starts_with(b"From ") {
            out.push(b'>');
        }
        out.extend_from_slice(line);
    }
    out
}

/// One complete mbox entry: separator line, quoted message, blank line.
pub fn mbox_entry(sender: &str, date: Option<DateTime<Utc>>, message: &[u8]) -> Vec<u8> {
    let mut out = from_line(sender, date).into_bytes();
    out.extend_from_slice(&escape_from_lines(message));
    if !out.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.push(b'\n');
    out
}

/// Pull the vCard body out of a contact item.
///
/// Tries, in order: a plain body starting with `BEGIN:VCARD`, a vCard MIME
/// part (decoded by `mail-parser`), then a raw `BEGIN:VCARD` … `END:VCARD`
/// span anywhere in the payload.
pub fn extract_vcard(payload: &[u8]) -> Option<Vec<u8>> {
    let body = match find_header_end(payload) {
        Some(end) => &payload[end..],
        None => payload,
    };
    let body = trim_start_ascii(body);
    if starts_with_ignore_case(body, b"BEGIN:VCARD") {
        return Some(body.to_vec());
    }

    if let Some(message) = MessageParser::default().parse(payload) {
        let part = message.parts.iter().find(|part| {
            part.content_type().is_some_and(|ct| {
                ct.ctype().eq_ignore_ascii_case("text")
                    && ct.subtype().is_some_and(|sub| {
                        matches!(
                            sub.to_ascii_lowercase().as_str(),
                            "vcard" | "x-vcard" | "directory"
                        )
                    })
            })
        });
        if let Some(part) = part {
            let contents = part.contents();
            if !contents.is_empty() {
                return Some(contents.to_vec());
            }
        }
    }

    let start = find_ignore_case(payload, b"BEGIN:VCARD")?;
    let end = find_ignore_case(&payload[start..], b"END:VCARD")? + start + b"END:VCARD".len();
    let mut card = payload[start..end].to_vec();
    card.extend_from_slice(b"\r\n");
    Some(card)
}

fn trim_start_ascii(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    &data[start..]
}

fn starts_with_ignore_case(data: &[u8], prefix: &[u8]) -> bool {
    data.len() >= prefix.len() && data[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn find_ignore_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_line_endings() {
        let mixed = b"a\r\nb\nc";
        assert_eq!(&*apply_line_endings(mixed, OutputMode::Native), mixed);
        assert_eq!(&*apply_line_endings(mixed, OutputMode::Unix), b"a\nb\nc");
        assert_eq!(&*apply_line_endings(mixed, OutputMode::Dos), b"a\r\nb\r\nc");
        assert!(matches!(
            apply_line_endings(b"a\nb", OutputMode::Unix),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn test_from_line() {
        let date = Utc.with_ymd_and_hms(2024, 1, 4, 9, 5, 0).unwrap();
        assert_eq!(
            from_line("alice@example.com", Some(date)),
            "From alice@example.com Thu Jan  4 09:05:00 2024\n"
        );
        assert_eq!(
            from_line("", None),
            "From MAILER-DAEMON Thu Jan  1 00:00:00 1970\n"
        );
    }

    #[test]
    fn test_escape_from_lines() {
        let body = b"Subject: x\n\nFrom here\n>From there\nnot From\n";
        assert_eq!(
            escape_from_lines(body),
            b"Subject: x\n\n>From here\n>>From there\nnot From\n"
        );
    }

    #[test]
    fn test_mbox_entry_terminates() {
        let entry = mbox_entry("a@b.c", None, b"Subject: x\n\nbody");
        assert!(entry.starts_with(b"From a@b.c "));
        assert!(entry.ends_with(b"body\n\n"));
    }

    #[test]
    fn test_extract_vcard_plain_body() {
        let payload = b"Content-Type: text/vcard\n\nBEGIN:VCARD\nFN:Carol\nEND:VCARD\n";
        assert_eq!(
            extract_vcard(payload).unwrap(),
            b"BEGIN:VCARD\nFN:Carol\nEND:VCARD\n"
        );
    }

    #[test]
    fn test_extract_vcard_base64_part() {
        // "BEGIN:VCARD\r\nFN:Dan\r\nEND:VCARD\r\n"
        let payload = b"Content-Type: text/vcard\n\
Content-Transfer-Encoding: base64\n\
\n\
QkVHSU46VkNBUkQNCkZOOkRhbg0KRU5EOlZDQVJEDQo=\n";
        let card = extract_vcard(payload).unwrap();
        assert!(card.starts_with(b"BEGIN:VCARD"));
        assert!(card.windows(6).any(|w| w == b"FN:Dan"));
    }

    #[test]
    fn test_extract_vcard_missing() {
        assert!(extract_vcard(b"Subject: hi\n\nno card here\n").is_none());
    }
}
