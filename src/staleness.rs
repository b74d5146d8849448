use anyhow::Context as _;

use crate::catalog::Catalog;
use crate::store::FileMetadata;

/// Decides whether the compiled document is behind its sources.
///
/// An empty catalog always reports stale: with nothing to compare against the
/// check cannot prove the output is current, and skipping would mean never
/// compiling at all.
pub struct StalenessChecker<'a> {
    metadata: &'a dyn FileMetadata,
}

impl<'a> StalenessChecker<'a> {
    pub fn new(metadata: &'a dyn FileMetadata) -> Self {
        Self { metadata }
    }

    pub async fn needs_recompile(
        &self,
        compiled_doc_id: &str,
        source_folder_id: &str,
        catalog: &Catalog,
    ) -> anyhow::Result<bool> {
        if catalog.is_empty() {
            tracing::info!("catalog is empty; recompiling");
            return Ok(true);
        }

        let Some(last_compiled_at) = self
            .metadata
            .last_modified(compiled_doc_id)
            .await
            .with_context(|| format!("read last modified time of {compiled_doc_id}"))?
        else {
            tracing::info!(compiled_doc_id, "compiled document does not exist yet");
            return Ok(true);
        };

        let changed = self
            .metadata
            .search_modified_after(source_folder_id, last_compiled_at)
            .await
            .with_context(|| format!("search folder {source_folder_id} for changes"))?;

        let mut stale = false;
        for source_id in changed.iter().filter(|id| catalog.contains_source(id)) {
            tracing::info!(source_id = %source_id, "song added or updated");
            stale = true;
        }

        if !stale {
            tracing::info!(
                %last_compiled_at,
                "compiled document is up to date with the song ledger"
            );
        }
        Ok(stale)
    }
}
