//! Normalization of protocol values into the output data model.

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeSet;

use super::model::{EmailAddress, FetchedMessage, MailboxDescriptor, MessageSummary};

/// `Name <addr>` when a display name exists, the bare address otherwise.
pub fn format_address(addr: &EmailAddress) -> Option<String> {
    let name = addr.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
    let address = addr
        .address
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty());
    match (name, address) {
        (Some(name), Some(address)) => Some(format!("{} <{}>", name, address)),
        (None, Some(address)) => Some(address.to_string()),
        (Some(name), None) => Some(name.to_string()),
        (None, None) => None,
    }
}

/// Absent rather than empty when no address formats.
pub fn format_address_list(addrs: &[EmailAddress]) -> Option<Vec<String>> {
    let list: Vec<String> = addrs.iter().filter_map(format_address).collect();
    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}

/// RFC 3339 (UTC) when the header parses, the trimmed raw value otherwise.
pub fn normalize_date(raw: &str) -> String {
    let raw = raw.trim();
    let candidates = [raw, strip_trailing_comment(raw)];
    if let Some(parsed) = candidates
        .iter()
        .find_map(|c| DateTime::parse_from_rfc2822(c).ok())
    {
        return parsed
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Secs, true);
    }
    // mailparse reports input it cannot read as the epoch.
    if let Some(parsed) = mailparse::dateparse(raw)
        .ok()
        .filter(|&ts| ts != 0 || raw.contains("1970"))
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
    {
        return parsed.to_rfc3339_opts(SecondsFormat::Secs, true);
    }
    raw.to_string()
}

// `Tue, 1 Jul 2003 10:52:37 +0200 (CEST)` -> `Tue, 1 Jul 2003 10:52:37 +0200`
fn strip_trailing_comment(raw: &str) -> &str {
    match raw.strip_suffix(')').and_then(|r| r.rfind('(')) {
        Some(open) => raw[..open].trim_end(),
        None => raw,
    }
}

/// Decode RFC 2047 encoded words in a header value.
pub fn decode_header_text(raw: &[u8]) -> String {
    let mut line = b"X: ".to_vec();
    line.extend_from_slice(raw);
    match mailparse::parse_header(&line) {
        Ok((header, _)) => header.get_value().trim().to_string(),
        Err(_) => String::from_utf8_lossy(raw).trim().to_string(),
    }
}

pub fn summarize(message: &FetchedMessage) -> MessageSummary {
    let envelope = message.envelope.as_ref();
    let date = envelope
        .and_then(|e| e.date.as_deref())
        .map(normalize_date)
        .or_else(|| message.internal_date.clone());
    MessageSummary {
        uid: message.uid,
        date,
        from: envelope.and_then(|e| format_address_list(&e.from)),
        to: envelope.and_then(|e| format_address_list(&e.to)),
        subject: envelope.and_then(|e| e.subject.clone()),
        flags: message.flags.iter().cloned().collect(),
    }
}

pub fn mailbox_descriptor(
    path: &str,
    delimiter: Option<&str>,
    attributes: Vec<String>,
) -> MailboxDescriptor {
    let name = match delimiter {
        Some(d) if !d.is_empty() => path.rsplit(d).next().unwrap_or(path),
        _ => path,
    }
    .to_string();

    let special_use = attributes
        .iter()
        .find(|a| SPECIAL_USE.contains(&a.as_str()))
        .cloned()
        .or_else(|| special_use_by_name(path, &name).map(str::to_string));

    MailboxDescriptor {
        name,
        path: path.to_string(),
        delimiter: delimiter.map(str::to_string),
        flags: attributes.into_iter().collect::<BTreeSet<_>>(),
        special_use,
    }
}

const SPECIAL_USE: &[&str] = &[
    "\\All", "\\Archive", "\\Drafts", "\\Flagged", "\\Junk", "\\Sent", "\\Trash",
];

fn special_use_by_name(path: &str, name: &str) -> Option<&'static str> {
    if path.eq_ignore_ascii_case("INBOX") {
        return Some("\\Inbox");
    }
    match name.to_ascii_lowercase().as_str() {
        "sent" | "sent items" | "sent mail" | "sent messages" => Some("\\Sent"),
        "drafts" | "draft" => Some("\\Drafts"),
        "trash" | "deleted items" | "deleted messages" | "bin" => Some("\\Trash"),
        "junk" | "spam" | "junk email" | "junk e-mail" => Some("\\Junk"),
        "archive" | "archives" => Some("\\Archive"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::model::Envelope;

    fn addr(name: Option<&str>, address: &str) -> EmailAddress {
        EmailAddress {
            name: name.map(str::to_string),
            address: Some(address.to_string()),
        }
    }

    #[test]
    fn test_address_formatting() {
        assert_eq!(
            format_address(&addr(Some("Jane"), "jane@x.com")).as_deref(),
            Some("Jane <jane@x.com>")
        );
        assert_eq!(
            format_address(&addr(None, "jane@x.com")).as_deref(),
            Some("jane@x.com")
        );
        assert_eq!(
            format_address(&addr(Some("  "), "jane@x.com")).as_deref(),
            Some("jane@x.com")
        );
        assert_eq!(format_address(&EmailAddress::default()), None);
    }

    #[test]
    fn test_address_list() {
        let list = format_address_list(&[addr(Some("Jane"), "jane@x.com")]).unwrap();
        assert_eq!(list, vec!["Jane <jane@x.com>".to_string()]);
        assert_eq!(format_address_list(&[]), None);
    }

    #[test]
    fn test_date_normalization() {
        assert_eq!(
            normalize_date("Mon, 7 Feb 1994 21:52:25 -0800"),
            "1994-02-08T05:52:25Z"
        );
        assert_eq!(normalize_date("not a date at all"), "not a date at all");
    }

    #[test]
    fn test_unparseable_date_is_not_epoch() {
        assert_eq!(normalize_date("sometime last week"), "sometime last week");
        assert_eq!(normalize_date("  garbage "), "garbage");
    }

    #[test]
    fn test_date_with_zone_comment() {
        assert_eq!(
            normalize_date("Tue, 1 Jul 2003 10:52:37 +0200 (CEST)"),
            "2003-07-01T08:52:37Z"
        );
        assert_eq!(
            normalize_date("Thu, 01 Jan 1970 00:00:00 +0000"),
            "1970-01-01T00:00:00Z"
        );
    }

    #[test]
    fn test_decode_encoded_subject() {
        assert_eq!(decode_header_text(b"=?UTF-8?Q?Caf=C3=A9?="), "Café");
        assert_eq!(decode_header_text(b"plain subject"), "plain subject");
    }

    #[test]
    fn test_summary_falls_back_to_internal_date() {
        let message = FetchedMessage {
            uid: 3,
            flags: vec!["\\Seen".to_string()],
            envelope: Some(Envelope {
                subject: Some("Hello".to_string()),
                from: vec![addr(None, "a@x.com")],
                ..Envelope::default()
            }),
            internal_date: Some("2024-01-02T03:04:05Z".to_string()),
            structure: None,
        };
        let summary = summarize(&message);
        assert_eq!(summary.date.as_deref(), Some("2024-01-02T03:04:05Z"));
        assert_eq!(summary.from, Some(vec!["a@x.com".to_string()]));
        assert_eq!(summary.to, None);
        assert!(summary.flags.contains("\\Seen"));
    }

    #[test]
    fn test_mailbox_descriptor() {
        let sent = mailbox_descriptor(
            "[Gmail]/Sent Mail",
            Some("/"),
            vec!["\\HasNoChildren".into()],
        );
        assert_eq!(sent.name, "Sent Mail");
        assert_eq!(sent.special_use.as_deref(), Some("\\Sent"));

        let flagged = mailbox_descriptor("Starred", Some("/"), vec!["\\Flagged".into()]);
        assert_eq!(flagged.special_use.as_deref(), Some("\\Flagged"));

        let inbox = mailbox_descriptor("INBOX", Some("."), vec![]);
        assert_eq!(inbox.special_use.as_deref(), Some("\\Inbox"));

        let plain = mailbox_descriptor("Projects.Rust", Some("."), vec![]);
        assert_eq!(plain.name, "Rust");
        assert_eq!(plain.special_use, None);
    }
}
