use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::catalog::TitleIdColumns;
use crate::compile::CompileOptions;
use crate::formats::{Margins, ParagraphHeading};
use crate::toc::TocStyle;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SongbookConfig {
    pub store_dir: PathBuf,
    pub ledger: LedgerConfig,
    pub output: OutputConfig,
    pub source_folder_id: String,
    pub compile: CompileConfig,
    pub toc: TocStyle,
}

impl Default for SongbookConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("store"),
            ledger: LedgerConfig::default(),
            output: OutputConfig::default(),
            source_folder_id: "lyrics".to_owned(),
            compile: CompileConfig::default(),
            toc: TocStyle::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub path: PathBuf,
    pub sheet: String,
    pub range: String,
    pub title_column: usize,
    pub id_column: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ledger.yaml"),
            sheet: "Songs".to_owned(),
            range: "A2:B".to_owned(),
            title_column: 0,
            id_column: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub document_id: String,
    pub title: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            document_id: "lyrics".to_owned(),
            title: "Lyrics".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    pub chunk_size: usize,
    pub flush_every_chunks: usize,
    pub margin: f32,
    pub heading: ParagraphHeading,
    pub lock_wait_ms: u64,
    pub stale_lock_after_secs: u64,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            flush_every_chunks: 10,
            margin: 18.0,
            heading: ParagraphHeading::Title,
            lock_wait_ms: 1000,
            stale_lock_after_secs: 600,
        }
    }
}

impl SongbookConfig {
    /// Reads the YAML file and resolves relative paths against its directory.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        let mut config: Self = serde_yaml::from_str(&yaml)
            .with_context(|| format!("parse config: {}", path.display()))?;

        if let Some(base) = path.parent() {
            config.store_dir = resolve(base, &config.store_dir);
            config.ledger.path = resolve(base, &config.ledger.path);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.compile.chunk_size == 0 {
            anyhow::bail!("compile.chunk_size must be at least 1");
        }
        if !self.compile.margin.is_finite() || self.compile.margin < 0.0 {
            anyhow::bail!("compile.margin must be a non-negative number");
        }
        if self.toc.font_size == 0 {
            anyhow::bail!("toc.font_size must be at least 1");
        }
        if !is_hex_color(&self.toc.foreground_color) {
            anyhow::bail!(
                "toc.foreground_color must look like #RRGGBB, got {:?}",
                self.toc.foreground_color
            );
        }
        if self.output.document_id.trim().is_empty() {
            anyhow::bail!("output.document_id must not be empty");
        }
        Ok(())
    }

    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            chunk_size: self.compile.chunk_size,
            flush_every_chunks: self.compile.flush_every_chunks,
            margins: Margins::uniform(self.compile.margin),
            heading: self.compile.heading,
            lock_wait: Duration::from_millis(self.compile.lock_wait_ms),
            toc_style: self.toc.clone(),
            output_title: self.output.title.clone(),
        }
    }

    pub fn row_transform(&self) -> TitleIdColumns {
        TitleIdColumns {
            title: self.ledger.title_column,
            id: self.ledger.id_column,
        }
    }

    pub fn stale_lock_after(&self) -> Duration {
        Duration::from_secs(self.compile.stale_lock_after_secs)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn is_hex_color(value: &str) -> bool {
    value
        .strip_prefix('#')
        .is_some_and(|hex| hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()))
}
