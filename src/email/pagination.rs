use std::ops::RangeInclusive;

/// Sequence-number window for a newest-first page.
///
/// Sequence `total` is the newest message, so page 1 covers the `page_size`
/// highest sequence numbers. Returns `None` when the page lies entirely past
/// the oldest message; a page that only partially overlaps is returned short.
pub fn sequence_window(total: u32, page: u32, page_size: u32) -> Option<RangeInclusive<u32>> {
    if total == 0 || page == 0 || page_size == 0 {
        return None;
    }
    let skipped = u64::from(page - 1) * u64::from(page_size);
    if skipped >= u64::from(total) {
        return None;
    }
    let end = total - skipped as u32;
    let start = end.saturating_sub(page_size - 1).max(1);
    Some(start..=end)
}

/// IMAP sequence-set syntax for a window.
pub fn sequence_set(window: &RangeInclusive<u32>) -> String {
    format!("{}:{}", window.start(), window.end())
}
