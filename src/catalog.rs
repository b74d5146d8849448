use anyhow::Context as _;

use crate::formats::SongEntry;
use crate::ledger::LedgerReader;

/// Turns one ledger row into an entry. Rows that fail validation yield `None`
/// and are left out of the catalog.
pub trait RowTransform: Send + Sync {
    fn to_entry(&self, row: &[String]) -> Option<SongEntry>;
}

impl<F> RowTransform for F
where
    F: Fn(&[String]) -> Option<SongEntry> + Send + Sync,
{
    fn to_entry(&self, row: &[String]) -> Option<SongEntry> {
        self(row)
    }
}

/// Reads the title and source id from fixed columns of the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TitleIdColumns {
    pub title: usize,
    pub id: usize,
}

impl Default for TitleIdColumns {
    fn default() -> Self {
        Self { title: 0, id: 1 }
    }
}

impl RowTransform for TitleIdColumns {
    fn to_entry(&self, row: &[String]) -> Option<SongEntry> {
        let title = row.get(self.title)?.trim();
        let source_id = row.get(self.id)?.trim();
        if title.is_empty() || source_id.is_empty() {
            return None;
        }
        Some(SongEntry {
            title: title.to_owned(),
            source_id: source_id.to_owned(),
        })
    }
}

/// Immutable snapshot of the ledger, in row order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<SongEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<SongEntry>) -> Self {
        Self { entries }
    }

    pub fn from_rows(rows: &[Vec<String>], transform: &dyn RowTransform) -> Self {
        let mut entries = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            match transform.to_entry(row) {
                Some(entry) => entries.push(entry),
                None => tracing::debug!(row = idx, "dropping ledger row without title or id"),
            }
        }
        Self { entries }
    }

    pub async fn read(
        ledger: &dyn LedgerReader,
        sheet: &str,
        range: &str,
        transform: &dyn RowTransform,
    ) -> anyhow::Result<Self> {
        let rows = ledger
            .read_range(sheet, range)
            .await
            .with_context(|| format!("read ledger range {sheet}!{range}"))?;
        let catalog = Self::from_rows(&rows, transform);
        tracing::info!(
            rows = rows.len(),
            songs = catalog.len(),
            "built song catalog"
        );
        Ok(catalog)
    }

    pub fn entries(&self) -> &[SongEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_source(&self, source_id: &str) -> bool {
        self.entries.iter().any(|e| e.source_id == source_id)
    }

    pub fn chunks(&self, chunk_size: usize) -> std::slice::Chunks<'_, SongEntry> {
        self.entries.chunks(chunk_size.max(1))
    }
}
