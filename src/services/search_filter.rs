//! Read-side search over the replica.
//!
//! A pure projection: it borrows the records and never changes them, so it can
//! be recomputed whenever either the records or the query change.

use crate::types::bookmark::Bookmark;

/// Returns the records whose title or url contains `query`, ignoring case.
///
/// Order is preserved. An empty query returns every record.
pub fn filter_bookmarks<'a>(query: &str, records: &'a [Bookmark]) -> Vec<&'a Bookmark> {
    if query.is_empty() {
        return records.iter().collect();
    }
    let needle = query.to_lowercase();
    records.iter().filter(|b| matches(b, &needle)).collect()
}

/// Like [`filter_bookmarks`] but returns owned copies.
pub fn filter_bookmarks_owned(query: &str, records: &[Bookmark]) -> Vec<Bookmark> {
    filter_bookmarks(query, records).into_iter().cloned().collect()
}

/// `needle` must already be lowercase.
fn matches(bookmark: &Bookmark, needle: &str) -> bool {
    bookmark.title.to_lowercase().contains(needle) || bookmark.url.to_lowercase().contains(needle)
}
