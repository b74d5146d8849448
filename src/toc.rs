use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::document::{Document, bookmark_link};
use crate::formats::{Block, BookmarkTable, Paragraph, TextStyle, TocEntry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TocStyle {
    pub bold: bool,
    pub font_size: u32,
    pub underline: bool,
    pub foreground_color: String,
}

impl Default for TocStyle {
    fn default() -> Self {
        Self {
            bold: true,
            font_size: 14,
            underline: false,
            foreground_color: "#000000".to_owned(),
        }
    }
}

impl TocStyle {
    pub fn text_style(&self) -> TextStyle {
        TextStyle {
            bold: Some(self.bold),
            font_size: Some(self.font_size),
            underline: Some(self.underline),
            foreground_color: Some(self.foreground_color.clone()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TocError {
    #[error("bookmark {bookmark_id} for {title:?} is not in the document")]
    MissingBookmark { title: String, bookmark_id: String },
    #[error("edit table of contents: {0}")]
    Edit(String),
}

/// Orders the bookmark table for head insertion: entries come out in
/// descending title order, so inserting each one at index 0 leaves the page
/// reading A to Z.
pub fn build_toc(bookmarks: &BookmarkTable) -> Vec<TocEntry> {
    let mut titles = bookmarks.iter().collect::<Vec<_>>();
    titles.sort_by(|(a, _), (b, _)| compare_titles(b, a));
    titles
        .into_iter()
        .map(|(title, bookmark_id)| TocEntry {
            title_uppercased: title.to_uppercase(),
            bookmark_id: bookmark_id.clone(),
        })
        .collect()
}

/// Case-insensitive order with the original text as a tie-breaker.
fn compare_titles(a: &str, b: &str) -> Ordering {
    a.to_uppercase()
        .cmp(&b.to_uppercase())
        .then_with(|| a.cmp(b))
}

/// Inserts the entries at the top of `document`, in the order given. Stops at
/// the first entry whose bookmark is missing, leaving the lines inserted so
/// far in place.
pub fn insert_toc(
    document: &mut Document,
    entries: &[TocEntry],
    style: &TocStyle,
) -> Result<usize, TocError> {
    let text_style = style.text_style();
    let mut inserted = 0;
    for entry in entries {
        if document.find_bookmark(&entry.bookmark_id).is_none() {
            return Err(TocError::MissingBookmark {
                title: entry.title_uppercased.clone(),
                bookmark_id: entry.bookmark_id.clone(),
            });
        }

        insert_line(document, entry, &text_style)
            .map_err(|err| TocError::Edit(format!("{err:#}")))?;
        inserted += 1;
    }
    Ok(inserted)
}

fn insert_line(document: &mut Document, entry: &TocEntry, style: &TextStyle) -> anyhow::Result<()> {
    let line = Paragraph::new(entry.title_uppercased.clone());
    document.insert_block_at(0, Block::Paragraph(line))?;
    document.set_link_url(0, bookmark_link(&entry.bookmark_id))?;
    document.set_style(0, style.clone())
}
