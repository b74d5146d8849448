use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::fs;
use tokio::io::AsyncWriteExt as _;

use crate::document::Document;

/// Where documents live. `open` hands out an independent copy; nothing is
/// visible to other sessions until `save`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// `None` when no document with this id exists.
    async fn get(&self, id: &str) -> anyhow::Result<Option<Document>>;

    async fn save(&self, document: &Document) -> anyhow::Result<()>;

    async fn open(&self, id: &str) -> anyhow::Result<Document> {
        self.get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("document not found: {id}"))
    }
}

#[async_trait]
pub trait FileMetadata: Send + Sync {
    /// `None` when no file with this id exists.
    async fn last_modified(&self, id: &str) -> anyhow::Result<Option<DateTime<Utc>>>;

    /// Ids of files under `folder_id` modified strictly after `after`.
    async fn search_modified_after(
        &self,
        folder_id: &str,
        after: DateTime<Utc>,
    ) -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct LocalFsDocumentStore {
    base_dir: PathBuf,
}

impl LocalFsDocumentStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn documents_dir(&self) -> PathBuf {
        self.base_dir.join("documents")
    }

    pub fn document_path(&self, id: &str) -> anyhow::Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
            anyhow::bail!("invalid document id: {id:?}");
        }
        Ok(self.documents_dir().join(format!("{id}.json")))
    }
}

#[async_trait]
impl DocumentStore for LocalFsDocumentStore {
    async fn get(&self, id: &str) -> anyhow::Result<Option<Document>> {
        let path = self.document_path(id)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("read document: {}", path.display()));
            }
        };
        let mut document: Document = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse document: {}", path.display()))?;
        if document.id != id {
            tracing::debug!(id, stored_id = %document.id, "document id differs from file name");
            document.id = id.to_owned();
        }
        Ok(Some(document))
    }

    async fn save(&self, document: &Document) -> anyhow::Result<()> {
        let path = self.document_path(&document.id)?;
        write_document_durably(&path, document)
            .await
            .with_context(|| format!("save document: {}", document.id))
    }
}

#[async_trait]
impl FileMetadata for LocalFsDocumentStore {
    async fn last_modified(&self, id: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        let path = self.document_path(id)?;
        modified_at(&path).await
    }

    async fn search_modified_after(
        &self,
        folder_id: &str,
        after: DateTime<Utc>,
    ) -> anyhow::Result<Vec<String>> {
        #[derive(Deserialize)]
        struct ParentOnly {
            #[serde(default)]
            parent: Option<String>,
        }

        let dir = self.documents_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read documents dir: {}", dir.display()));
            }
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await.context("read documents dir entry")? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(modified) = modified_at(&path).await? else {
                continue;
            };
            if modified <= after {
                continue;
            }

            let bytes = fs::read(&path)
                .await
                .with_context(|| format!("read document: {}", path.display()))?;
            let meta: ParentOnly = match serde_json::from_slice(&bytes) {
                Ok(meta) => meta,
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "skipping unreadable document");
                    continue;
                }
            };
            if meta.parent.as_deref() == Some(folder_id) {
                found.push(id.to_owned());
            }
        }
        found.sort();
        Ok(found)
    }
}

async fn modified_at(path: &Path) -> anyhow::Result<Option<DateTime<Utc>>> {
    let metadata = match fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("stat: {}", path.display())),
    };
    let modified = metadata
        .modified()
        .with_context(|| format!("read mtime: {}", path.display()))?;
    Ok(Some(DateTime::<Utc>::from(modified)))
}

/// Writes `document` next to `path`, syncs it, then renames it over `path`,
/// so readers see either the previous version or the complete new one.
async fn write_document_durably(path: &Path, document: &Document) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create documents dir: {}", parent.display()))?;

    let data = serde_json::to_vec_pretty(document).context("serialize document")?;
    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let written = async {
        let mut file = fs::File::create(&tmp_path)
            .await
            .with_context(|| format!("create tmp: {}", tmp_path.display()))?;
        file.write_all(&data)
            .await
            .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
        file.sync_all()
            .await
            .with_context(|| format!("sync tmp: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path)
            .await
            .with_context(|| format!("replace document: {}", path.display()))
    }
    .await;

    if written.is_err() {
        let _ = fs::remove_file(&tmp_path).await;
    }
    written
}
