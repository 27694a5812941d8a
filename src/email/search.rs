use super::model::SearchCriteria;

/// Translate criteria into an IMAP SEARCH key list. Keys are implicitly ANDed.
///
/// With `literals` set (server advertises LITERAL+ or LITERAL-), non-ASCII
/// values go out as non-synchronizing literals; otherwise they stay quoted.
pub fn build_query(criteria: &SearchCriteria, literals: bool) -> String {
    let string = |value: &str| {
        if literals && !value.is_ascii() {
            literal(value)
        } else {
            quote(value)
        }
    };
    let mut keys: Vec<String> = Vec::new();

    if let Some(from) = &criteria.from {
        keys.push(format!("FROM {}", string(from)));
    }
    if let Some(to) = &criteria.to {
        keys.push(format!("TO {}", string(to)));
    }
    if let Some(subject) = &criteria.subject {
        keys.push(format!("SUBJECT {}", string(subject)));
    }
    if let Some(since) = criteria.since {
        keys.push(format!("SINCE {}", since.format("%-d-%b-%Y")));
    }
    if let Some(before) = criteria.before {
        keys.push(format!("BEFORE {}", before.format("%-d-%b-%Y")));
    }
    if let Some(body) = &criteria.body {
        keys.push(format!("BODY {}", string(body)));
    }
    match criteria.seen {
        Some(true) => keys.push("SEEN".to_string()),
        Some(false) => keys.push("UNSEEN".to_string()),
        None => {}
    }

    if keys.is_empty() {
        return "ALL".to_string();
    }

    let query = keys.join(" ");
    if query.is_ascii() {
        query
    } else {
        format!("CHARSET UTF-8 {}", query)
    }
}

/// RFC 7888 non-synchronizing literal; the length counts UTF-8 bytes.
fn literal(value: &str) -> String {
    format!("{{{}+}}\r\n{}", value.len(), value)
}

/// Quoted string with backslash and double-quote escaped.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\r' | '\n' => out.push(' '),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// The `limit` most recent UIDs, ascending.
///
/// UIDs grow with arrival order inside a mailbox, but SEARCH results come back
/// as an unordered set, so they are sorted and de-duplicated before slicing.
pub fn newest_uids(mut uids: Vec<u32>, limit: usize) -> Vec<u32> {
    uids.sort_unstable();
    uids.dedup();
    let skip = uids.len().saturating_sub(limit);
    uids.split_off(skip)
}

/// Comma-separated IMAP UID set.
pub fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_empty_criteria_matches_all() {
        assert_eq!(build_query(&SearchCriteria::default(), false), "ALL");
    }

    #[test]
    fn test_criteria_are_anded_in_order() {
        let criteria = SearchCriteria {
            from: Some("alice@example.com".to_string()),
            subject: Some("quarterly \"report\"".to_string()),
            since: NaiveDate::from_ymd_opt(2024, 3, 5),
            before: NaiveDate::from_ymd_opt(2024, 12, 25),
            seen: Some(false),
            ..SearchCriteria::default()
        };
        assert_eq!(
            build_query(&criteria, true),
            r#"FROM "alice@example.com" SUBJECT "quarterly \"report\"" SINCE 5-Mar-2024 BEFORE 25-Dec-2024 UNSEEN"#
        );
    }

    #[test]
    fn test_non_ascii_declares_charset() {
        let criteria = SearchCriteria {
            body: Some("café".to_string()),
            seen: Some(true),
            ..SearchCriteria::default()
        };
        assert_eq!(
            build_query(&criteria, false),
            "CHARSET UTF-8 BODY \"café\" SEEN"
        );
    }

    #[test]
    fn test_non_ascii_sent_as_literal() {
        let criteria = SearchCriteria {
            from: Some("bob@example.com".to_string()),
            body: Some("café".to_string()),
            ..SearchCriteria::default()
        };
        assert_eq!(
            build_query(&criteria, true),
            "CHARSET UTF-8 FROM \"bob@example.com\" BODY {5+}\r\ncafé"
        );
    }

    #[test]
    fn test_newest_uids_keeps_highest() {
        let uids: Vec<u32> = (1..=120).rev().collect();
        let newest = newest_uids(uids, 50);
        assert_eq!(newest.len(), 50);
        assert_eq!(newest.first(), Some(&71));
        assert_eq!(newest.last(), Some(&120));
    }

    #[test]
    fn test_newest_uids_under_limit() {
        assert_eq!(newest_uids(vec![9, 3, 3, 5], 50), vec![3, 5, 9]);
        assert!(newest_uids(vec![], 10).is_empty());
    }

    #[test]
    fn test_uid_set() {
        assert_eq!(uid_set(&[3, 7, 12]), "3,7,12");
    }
}
