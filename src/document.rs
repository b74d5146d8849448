use serde::{Deserialize, Serialize};

use crate::formats::{Block, Margins, Paragraph, TextStyle};

/// Prefix of same-document links pointing at a bookmark.
pub const BOOKMARK_LINK_PREFIX: &str = "#bookmark=";

pub fn bookmark_link(bookmark_id: &str) -> String {
    format!("{BOOKMARK_LINK_PREFIX}{bookmark_id}")
}

/// A document as held by one editing session. Mutations only become visible
/// to other sessions once the owning session saves it back to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub margins: Margins,
    #[serde(default = "empty_body")]
    pub body: Vec<Block>,
}

fn empty_body() -> Vec<Block> {
    vec![Block::Paragraph(Paragraph::default())]
}

impl Document {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            parent: None,
            margins: Margins::default(),
            body: empty_body(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_body(mut self, body: Vec<Block>) -> Self {
        self.body = body;
        self
    }

    /// Drops every block. A body is never empty, so a single empty paragraph
    /// remains afterwards.
    pub fn clear(&mut self) {
        self.body = empty_body();
    }

    pub fn set_margins(&mut self, margins: Margins) {
        self.margins = margins;
    }

    /// Appends a block and returns its index.
    pub fn append_block(&mut self, block: Block) -> usize {
        self.body.push(block);
        self.body.len() - 1
    }

    pub fn append_paragraph(&mut self, paragraph: Paragraph) -> usize {
        self.append_block(Block::Paragraph(paragraph))
    }

    pub fn append_page_break(&mut self) -> usize {
        self.append_block(Block::PageBreak)
    }

    pub fn insert_block_at(&mut self, index: usize, block: Block) -> anyhow::Result<()> {
        if index > self.body.len() {
            anyhow::bail!(
                "insert index {index} out of bounds (body has {} blocks)",
                self.body.len()
            );
        }
        self.body.insert(index, block);
        Ok(())
    }

    pub fn remove_block_at(&mut self, index: usize) -> anyhow::Result<Block> {
        if index >= self.body.len() {
            anyhow::bail!(
                "remove index {index} out of bounds (body has {} blocks)",
                self.body.len()
            );
        }
        Ok(self.body.remove(index))
    }

    /// Anchors a new bookmark at the start of the paragraph at `index`.
    pub fn new_bookmark_at(&mut self, index: usize) -> anyhow::Result<String> {
        let paragraph = self.paragraph_mut(index)?;
        let id = format!("id.{}", uuid::Uuid::new_v4().simple());
        paragraph.bookmark = Some(id.clone());
        Ok(id)
    }

    pub fn set_link_url(&mut self, index: usize, url: impl Into<String>) -> anyhow::Result<()> {
        self.paragraph_mut(index)?.link_url = Some(url.into());
        Ok(())
    }

    pub fn set_style(&mut self, index: usize, style: TextStyle) -> anyhow::Result<()> {
        self.paragraph_mut(index)?.style = style;
        Ok(())
    }

    /// Index of the paragraph carrying `bookmark_id`.
    pub fn find_bookmark(&self, bookmark_id: &str) -> Option<usize> {
        self.body.iter().position(|block| {
            block
                .as_paragraph()
                .and_then(|p| p.bookmark.as_deref())
                .is_some_and(|id| id == bookmark_id)
        })
    }

    /// Text of all paragraphs, one per line.
    pub fn plain_text(&self) -> String {
        blocks_text(&self.body)
    }

    fn paragraph_mut(&mut self, index: usize) -> anyhow::Result<&mut Paragraph> {
        match self.body.get_mut(index) {
            Some(Block::Paragraph(paragraph)) => Ok(paragraph),
            Some(Block::PageBreak) => anyhow::bail!("block {index} is a page break"),
            None => anyhow::bail!("block {index} does not exist"),
        }
    }
}

pub fn blocks_text(blocks: &[Block]) -> String {
    blocks
        .iter()
        .filter_map(Block::as_paragraph)
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::ParagraphHeading;

    #[test]
    fn clear_leaves_single_empty_paragraph() {
        let mut doc = Document::new("d", "Doc").with_body(vec![
            Block::Paragraph(Paragraph::new("one")),
            Block::PageBreak,
        ]);
        doc.clear();
        assert_eq!(doc.body.len(), 1);
        assert!(doc.body[0].is_empty_paragraph());
    }

    #[test]
    fn bookmark_follows_its_paragraph_when_blocks_are_inserted_before_it() -> anyhow::Result<()> {
        let mut doc = Document::new("d", "Doc");
        let idx = doc.append_paragraph(Paragraph::new("Zion").with_heading(ParagraphHeading::Title));
        let bookmark = doc.new_bookmark_at(idx)?;

        doc.insert_block_at(0, Block::PageBreak)?;
        doc.insert_block_at(0, Block::Paragraph(Paragraph::new("ZION")))?;

        assert_eq!(doc.find_bookmark(&bookmark), Some(idx + 2));
        Ok(())
    }

    #[test]
    fn bookmarks_cannot_anchor_on_page_breaks() {
        let mut doc = Document::new("d", "Doc");
        let idx = doc.append_page_break();
        assert!(doc.new_bookmark_at(idx).is_err());
        assert!(doc.new_bookmark_at(99).is_err());
    }

    #[test]
    fn plain_text_skips_page_breaks() {
        let doc = Document::new("d", "Doc").with_body(vec![
            Block::Paragraph(Paragraph::new("verse one")),
            Block::PageBreak,
            Block::Paragraph(Paragraph::new("chorus")),
        ]);
        assert_eq!(doc.plain_text(), "verse one\nchorus");
    }

    #[test]
    fn document_json_round_trips_blocks() -> anyhow::Result<()> {
        let json = r#"{"id":"a","title":"A","body":[{"type":"paragraph","text":"Hi","heading":"title"},{"type":"page_break"}]}"#;
        let doc: Document = serde_json::from_str(json)?;
        assert_eq!(doc.body.len(), 2);
        assert_eq!(
            doc.body[0].as_paragraph().map(|p| p.heading),
            Some(ParagraphHeading::Title)
        );
        assert!(doc.body[1].is_page_break());
        Ok(())
    }
}
