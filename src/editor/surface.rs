//! The editable text of one field, plus bookmarks that keep their position
//! while the text around them changes.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use crate::richtext::html::escape_text;
use crate::richtext::{text_content, TextIndex};

/// Inline style applied to a span while an AI request for it is in flight.
pub const PENDING_STYLE: &str = "background-color: #fef3c7; opacity: 0.6";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    /// The surface holds an HTML fragment.
    Html,
    /// The surface holds plain text.
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BookmarkId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoration {
    Pending,
}

#[derive(Debug, Clone)]
struct Bookmark {
    range: Range<usize>,
    decoration: Option<Decoration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    /// Range lies outside the text or splits a character.
    InvalidRange(Range<usize>),
    /// The edit touches a span that is waiting on an AI response.
    SpanLocked(Range<usize>),
    UnknownBookmark(BookmarkId),
}

impl fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceError::InvalidRange(r) => write!(f, "invalid range {}..{}", r.start, r.end),
            SurfaceError::SpanLocked(r) => write!(
                f,
                "text at {}..{} is being rewritten; wait for it to finish",
                r.start, r.end
            ),
            SurfaceError::UnknownBookmark(id) => write!(f, "unknown bookmark {}", id.0),
        }
    }
}

impl std::error::Error for SurfaceError {}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

#[derive(Debug, Clone)]
pub struct Surface {
    text: String,
    representation: Representation,
    bookmarks: BTreeMap<BookmarkId, Bookmark>,
    next_id: u64,
}

impl Surface {
    pub fn new(text: impl Into<String>, representation: Representation) -> Self {
        Self {
            text: text.into(),
            representation,
            bookmarks: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn html(text: impl Into<String>) -> Self {
        Self::new(text, Representation::Html)
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(text, Representation::Plain)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn representation(&self) -> Representation {
        self.representation
    }

    /// Byte range of the `occurrence`-th (0-based) match of `needle`.
    ///
    /// HTML surfaces are searched by their visible text, so markup and
    /// attribute values never match and entities match what they decode to.
    pub fn find(&self, needle: &str, occurrence: usize) -> Option<Range<usize>> {
        if needle.is_empty() {
            return None;
        }
        match self.representation {
            Representation::Html => TextIndex::new(&self.text).find(needle, occurrence),
            Representation::Plain => self
                .text
                .match_indices(needle)
                .nth(occurrence)
                .map(|(start, m)| start..start + m.len()),
        }
    }

    fn check(&self, range: &Range<usize>) -> Result<(), SurfaceError> {
        let valid = range.start <= range.end
            && range.end <= self.text.len()
            && self.text.is_char_boundary(range.start)
            && self.text.is_char_boundary(range.end);
        if valid {
            Ok(())
        } else {
            Err(SurfaceError::InvalidRange(range.clone()))
        }
    }

    pub fn slice(&self, range: Range<usize>) -> Result<&str, SurfaceError> {
        self.check(&range)?;
        Ok(&self.text[range])
    }

    /// The span as a reader sees it: for HTML, tags stripped and entities
    /// decoded.
    pub fn visible_text(&self, range: Range<usize>) -> Result<String, SurfaceError> {
        let raw = self.slice(range)?;
        Ok(match self.representation {
            Representation::Html => text_content(raw),
            Representation::Plain => raw.to_string(),
        })
    }

    /// Prepare plain replacement text for insertion into this surface.
    pub fn prepare_insert(&self, text: &str) -> String {
        match self.representation {
            Representation::Html => escape_text(text),
            Representation::Plain => text.to_string(),
        }
    }

    fn locked_overlap(&self, range: &Range<usize>) -> Option<Range<usize>> {
        self.bookmarks
            .values()
            .map(|b| &b.range)
            .find(|b| overlaps(range, b))
            .cloned()
    }

    /// Pin a non-empty range. Bookmarked ranges may not overlap.
    pub fn bookmark(&mut self, range: Range<usize>) -> Result<BookmarkId, SurfaceError> {
        self.check(&range)?;
        if range.is_empty() {
            return Err(SurfaceError::InvalidRange(range));
        }
        if let Some(locked) = self.locked_overlap(&range) {
            return Err(SurfaceError::SpanLocked(locked));
        }
        let id = BookmarkId(self.next_id);
        self.next_id += 1;
        self.bookmarks.insert(
            id,
            Bookmark {
                range,
                decoration: None,
            },
        );
        Ok(id)
    }

    pub fn range_of(&self, id: BookmarkId) -> Option<Range<usize>> {
        self.bookmarks.get(&id).map(|b| b.range.clone())
    }

    pub fn decorate(&mut self, id: BookmarkId, decoration: Option<Decoration>) -> Result<(), SurfaceError> {
        let mark = self
            .bookmarks
            .get_mut(&id)
            .ok_or(SurfaceError::UnknownBookmark(id))?;
        mark.decoration = decoration;
        Ok(())
    }

    /// Drop a bookmark along with its decoration.
    pub fn release(&mut self, id: BookmarkId) {
        self.bookmarks.remove(&id);
    }

    #[cfg(test)]
    pub fn has_bookmarks(&self) -> bool {
        !self.bookmarks.is_empty()
    }

    #[cfg(test)]
    pub fn has_decorations(&self) -> bool {
        self.bookmarks.values().any(|b| b.decoration.is_some())
    }

    /// Replace the bookmarked text. The bookmark then covers the new text.
    pub fn replace_bookmarked(&mut self, id: BookmarkId, replacement: &str) -> Result<(), SurfaceError> {
        let range = self.range_of(id).ok_or(SurfaceError::UnknownBookmark(id))?;
        self.splice(range, replacement, Some(id));
        Ok(())
    }

    /// An ordinary edit. Fails if it touches a bookmarked span; bookmarks
    /// after the edit shift with it.
    pub fn edit(&mut self, range: Range<usize>, replacement: &str) -> Result<(), SurfaceError> {
        self.check(&range)?;
        if let Some(locked) = self.locked_overlap(&range) {
            return Err(SurfaceError::SpanLocked(locked));
        }
        self.splice(range, replacement, None);
        Ok(())
    }

    /// Replace the whole text. Not allowed while any span is bookmarked.
    pub fn set_text(&mut self, text: impl Into<String>) -> Result<(), SurfaceError> {
        if let Some(locked) = self.bookmarks.values().next() {
            return Err(SurfaceError::SpanLocked(locked.range.clone()));
        }
        self.text = text.into();
        Ok(())
    }

    fn splice(&mut self, range: Range<usize>, replacement: &str, owner: Option<BookmarkId>) {
        let removed = range.end - range.start;
        let added = replacement.len();
        self.text.replace_range(range.clone(), replacement);

        for (id, mark) in self.bookmarks.iter_mut() {
            if Some(*id) == owner {
                mark.range = range.start..range.start + added;
            } else if mark.range.start >= range.end {
                mark.range = mark.range.start - removed + added..mark.range.end - removed + added;
            }
        }
    }

    /// The text as the editor displays it, with decorated spans wrapped in a
    /// styled `<span>`. Plain surfaces render unchanged.
    pub fn render(&self) -> String {
        if self.representation == Representation::Plain {
            return self.text.clone();
        }
        let mut spans: Vec<&Range<usize>> = self
            .bookmarks
            .values()
            .filter(|b| b.decoration.is_some())
            .map(|b| &b.range)
            .collect();
        spans.sort_by_key(|r| r.start);

        let mut out = String::with_capacity(self.text.len());
        let mut cursor = 0;
        for span in spans {
            out.push_str(&self.text[cursor..span.start]);
            out.push_str(&format!(
                "<span data-ai-pending=\"true\" style=\"{}\">{}</span>",
                PENDING_STYLE,
                &self.text[span.clone()]
            ));
            cursor = span.end;
        }
        out.push_str(&self.text[cursor..]);
        out
    }
}
