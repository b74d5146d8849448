use std::time::Duration;

use anyhow::Context as _;

use crate::catalog::Catalog;
use crate::document::{Document, blocks_text};
use crate::formats::{Block, BookmarkTable, Margins, Paragraph, ParagraphHeading, SongEntry};
use crate::lock::{self, LockError, LockProvider};
use crate::store::DocumentStore;
use crate::toc::{self, TocStyle};

#[derive(Debug, Clone, PartialEq)]
pub struct CompileOptions {
    /// Entries per chunk.
    pub chunk_size: usize,
    /// Flush and reopen the output before every n-th chunk, counting from the
    /// first. Zero disables the periodic flush.
    pub flush_every_chunks: usize,
    pub margins: Margins,
    /// Leading block kind treated as the song title.
    pub heading: ParagraphHeading,
    pub lock_wait: Duration,
    pub toc_style: TocStyle,
    /// Title given to the output document when it has to be created.
    pub output_title: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            flush_every_chunks: 10,
            margins: Margins::uniform(18.0),
            heading: ParagraphHeading::Title,
            lock_wait: lock::DEFAULT_MAX_WAIT,
            toc_style: TocStyle::default(),
            output_title: "Lyrics".to_owned(),
        }
    }
}

pub fn should_flush(chunk_index: usize, interval: usize) -> bool {
    interval != 0 && chunk_index % interval == 0
}

#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("open source document {source_id}: {message}")]
    SourceOpen { source_id: String, message: String },
    #[error("source document {source_id} has no content")]
    EmptySource { source_id: String },
    #[error("copy song into output: {message}")]
    Extraction { message: String },
}

#[derive(Debug)]
pub struct EntryFailure {
    pub entry: SongEntry,
    pub error: EntryError,
}

#[derive(Debug, Default)]
pub struct CompilationReport {
    pub success_count: usize,
    pub failures: Vec<EntryFailure>,
    pub toc_entries: usize,
    pub toc_error: Option<String>,
    pub flushes: usize,
}

#[derive(Debug)]
pub enum CompileOutcome {
    /// Another run held the output document; nothing was touched.
    Locked,
    Compiled(CompilationReport),
}

/// Exclusive editing session over the output document. Edits accumulate in
/// memory and reach the store on `flush_and_reopen` or `close`.
pub struct OutputSession<'a> {
    store: &'a dyn DocumentStore,
    document: Document,
    flushes: usize,
}

impl<'a> OutputSession<'a> {
    /// Opens the output document, starting a new one titled `title` when the
    /// store has none yet. A new document first reaches the store on flush.
    pub async fn open_or_create(
        store: &'a dyn DocumentStore,
        id: &str,
        title: &str,
    ) -> anyhow::Result<Self> {
        let document = match store
            .get(id)
            .await
            .with_context(|| format!("open output document: {id}"))?
        {
            Some(document) => document,
            None => {
                tracing::info!(id, "creating compiled document");
                Document::new(id, title)
            }
        };
        Ok(Self {
            store,
            document,
            flushes: 0,
        })
    }

    pub fn document(&mut self) -> &mut Document {
        &mut self.document
    }

    pub async fn flush_and_reopen(&mut self) -> anyhow::Result<()> {
        let id = self.document.id.clone();
        self.store
            .save(&self.document)
            .await
            .with_context(|| format!("flush output document: {id}"))?;
        self.document = self
            .store
            .open(&id)
            .await
            .with_context(|| format!("reopen output document: {id}"))?;
        self.flushes += 1;
        tracing::debug!(id, flushes = self.flushes, "flushed output document");
        Ok(())
    }

    pub async fn close(self) -> anyhow::Result<usize> {
        self.store
            .save(&self.document)
            .await
            .with_context(|| format!("save output document: {}", self.document.id))?;
        Ok(self.flushes)
    }
}

/// A song's title (when its first block is a heading) and the rest of its text.
#[derive(Debug, Clone, PartialEq)]
struct SongSection {
    header: Option<Paragraph>,
    lyrics: String,
}

impl SongSection {
    fn extract(mut body: Vec<Block>, heading: ParagraphHeading) -> Option<Self> {
        if body.is_empty() {
            return None;
        }

        let leading_is_heading = body[0]
            .as_paragraph()
            .is_some_and(|p| p.heading == heading);
        let header = if leading_is_heading {
            match body.remove(0) {
                Block::Paragraph(mut paragraph) => {
                    paragraph.bookmark = None;
                    paragraph.link_url = None;
                    Some(paragraph)
                }
                Block::PageBreak => None,
            }
        } else {
            None
        };

        Some(Self {
            header,
            lyrics: blocks_text(&body),
        })
    }

    /// Returns the bookmark placed on the header, if there is one.
    fn append_to(self, output: &mut Document) -> anyhow::Result<Option<String>> {
        let bookmark = match self.header {
            Some(header) => {
                let idx = output.append_paragraph(header);
                Some(output.new_bookmark_at(idx)?)
            }
            None => None,
        };
        output.append_paragraph(Paragraph::new(self.lyrics));
        output.append_page_break();
        Ok(bookmark)
    }
}

pub struct ChunkedCompiler<'a> {
    store: &'a dyn DocumentStore,
    locks: &'a dyn LockProvider,
    options: CompileOptions,
}

impl<'a> ChunkedCompiler<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        locks: &'a dyn LockProvider,
        options: CompileOptions,
    ) -> Self {
        Self {
            store,
            locks,
            options,
        }
    }

    /// Rebuilds `output_id` from `catalog`. The body is cleared before any song
    /// is copied, so a run that dies part way leaves an incomplete document.
    pub async fn compile(&self, catalog: &Catalog, output_id: &str) -> anyhow::Result<CompileOutcome> {
        tracing::info!(output_id, "acquiring lock for compiled document");
        let guard = match lock::acquire(self.locks, output_id, self.options.lock_wait).await {
            Ok(guard) => guard,
            Err(err @ LockError::Timeout { .. }) => {
                tracing::info!(output_id, %err, "compiled document locked, exiting");
                return Ok(CompileOutcome::Locked);
            }
            Err(err) => return Err(err).context("lock compiled document"),
        };

        let report = self.compile_locked(catalog, output_id).await;
        drop(guard);
        tracing::info!(output_id, "released compiled document lock");
        Ok(CompileOutcome::Compiled(report?))
    }

    async fn compile_locked(
        &self,
        catalog: &Catalog,
        output_id: &str,
    ) -> anyhow::Result<CompilationReport> {
        let chunk_size = self.options.chunk_size.max(1);
        let mut session =
            OutputSession::open_or_create(self.store, output_id, &self.options.output_title)
                .await?;
        session.document().clear();
        session.document().set_margins(self.options.margins);

        tracing::info!(songs = catalog.len(), chunk_size, "updating compiled document");

        let mut report = CompilationReport::default();
        let mut bookmarks = BookmarkTable::new();

        for (chunk_index, chunk) in catalog.chunks(chunk_size).enumerate() {
            if should_flush(chunk_index, self.options.flush_every_chunks) {
                session.flush_and_reopen().await?;
            }

            let first = chunk_index * chunk_size;
            tracing::info!(
                chunk_index,
                from = first,
                to = first + chunk.len() - 1,
                "processing songs"
            );

            for entry in chunk {
                match self.compile_entry(session.document(), entry).await {
                    Ok(bookmark) => {
                        if let Some(bookmark) = bookmark {
                            bookmarks.insert(entry.title.clone(), bookmark);
                        }
                        report.success_count += 1;
                    }
                    Err(error) => {
                        tracing::warn!(
                            title = %entry.title,
                            source_id = %entry.source_id,
                            %error,
                            "problem with song; skipping"
                        );
                        report.failures.push(EntryFailure {
                            entry: entry.clone(),
                            error,
                        });
                    }
                }
            }
        }

        tracing::info!(
            success_count = report.success_count,
            failed = report.failures.len(),
            "processed songs"
        );

        session.flush_and_reopen().await?;
        finish_body(session.document()).context("prepare body for table of contents")?;

        tracing::info!(entries = bookmarks.len(), "generating table of contents");
        let entries = toc::build_toc(&bookmarks);
        match toc::insert_toc(session.document(), &entries, &self.options.toc_style) {
            Ok(inserted) => {
                report.toc_entries = inserted;
                tracing::info!(inserted, "generated table of contents");
            }
            Err(err) => {
                tracing::error!(%err, "problem generating table of contents");
                report.toc_error = Some(err.to_string());
            }
        }

        report.flushes = session.close().await?;
        Ok(report)
    }

    async fn compile_entry(
        &self,
        output: &mut Document,
        entry: &SongEntry,
    ) -> Result<Option<String>, EntryError> {
        let source = self
            .store
            .open(&entry.source_id)
            .await
            .map_err(|err| EntryError::SourceOpen {
                source_id: entry.source_id.clone(),
                message: format!("{err:#}"),
            })?;

        let section = SongSection::extract(source.body, self.options.heading).ok_or_else(|| {
            EntryError::EmptySource {
                source_id: entry.source_id.clone(),
            }
        })?;
        if section.header.is_none() {
            tracing::debug!(
                title = %entry.title,
                "song does not start with a title heading; leaving it out of the index"
            );
        }

        section
            .append_to(output)
            .map_err(|err| EntryError::Extraction {
                message: format!("{err:#}"),
            })
    }
}

/// Drops the empty paragraph left over from clearing the body and separates
/// the future table of contents from the first song.
fn finish_body(document: &mut Document) -> anyhow::Result<()> {
    if document.body.first().is_some_and(Block::is_empty_paragraph) {
        document.remove_block_at(0)?;
    }
    document.insert_block_at(0, Block::PageBreak)
}
