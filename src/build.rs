use std::path::PathBuf;

use anyhow::Context as _;

use crate::catalog::{Catalog, RowTransform};
use crate::cli::{BuildArgs, CatalogArgs, CheckArgs};
use crate::compile::{ChunkedCompiler, CompilationReport, CompileOptions, CompileOutcome};
use crate::config::SongbookConfig;
use crate::ledger::{LedgerReader, LocalFsLedger};
use crate::lock::{LocalFsLockProvider, LockProvider};
use crate::staleness::StalenessChecker;
use crate::store::{DocumentStore, FileMetadata, LocalFsDocumentStore};

#[derive(Debug)]
pub enum BuildOutcome {
    UpToDate,
    Locked,
    Compiled(CompilationReport),
}

/// Collaborators one build talks to.
pub struct Services<'a> {
    pub ledger: &'a dyn LedgerReader,
    pub store: &'a dyn DocumentStore,
    pub metadata: &'a dyn FileMetadata,
    pub locks: &'a dyn LockProvider,
}

/// What to read, what to write, and how.
pub struct BuildPlan<'a> {
    pub sheet: &'a str,
    pub range: &'a str,
    pub transform: &'a dyn RowTransform,
    pub source_folder_id: &'a str,
    pub output_id: &'a str,
    pub options: CompileOptions,
    pub force: bool,
}

/// Ledger -> catalog -> staleness check -> compile.
pub async fn build_with(services: &Services<'_>, plan: BuildPlan<'_>) -> anyhow::Result<BuildOutcome> {
    let catalog = Catalog::read(services.ledger, plan.sheet, plan.range, plan.transform)
        .await
        .context("read catalog")?;

    if plan.force {
        tracing::info!("forced rebuild; skipping staleness check");
    } else {
        let stale = StalenessChecker::new(services.metadata)
            .needs_recompile(plan.output_id, plan.source_folder_id, &catalog)
            .await
            .context("check staleness")?;
        if !stale {
            return Ok(BuildOutcome::UpToDate);
        }
    }

    let compiler = ChunkedCompiler::new(services.store, services.locks, plan.options);
    match compiler
        .compile(&catalog, plan.output_id)
        .await
        .context("compile")?
    {
        CompileOutcome::Locked => Ok(BuildOutcome::Locked),
        CompileOutcome::Compiled(report) => Ok(BuildOutcome::Compiled(report)),
    }
}

struct LocalServices {
    ledger: LocalFsLedger,
    store: LocalFsDocumentStore,
    locks: LocalFsLockProvider,
}

impl LocalServices {
    fn new(config: &SongbookConfig) -> Self {
        Self {
            ledger: LocalFsLedger::new(&config.ledger.path),
            store: LocalFsDocumentStore::new(&config.store_dir),
            locks: LocalFsLockProvider::new(&config.store_dir)
                .with_stale_after(config.stale_lock_after()),
        }
    }

    fn services(&self) -> Services<'_> {
        Services {
            ledger: &self.ledger,
            store: &self.store,
            metadata: &self.store,
            locks: &self.locks,
        }
    }
}

fn load_config(config: &str, store: Option<&str>) -> anyhow::Result<SongbookConfig> {
    let mut config = SongbookConfig::load(&PathBuf::from(config)).context("load config")?;
    if let Some(store) = store {
        config.store_dir = PathBuf::from(store);
    }
    Ok(config)
}

pub async fn run(args: BuildArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config, args.store.as_deref())?;
    let local = LocalServices::new(&config);
    let transform = config.row_transform();

    let plan = BuildPlan {
        sheet: &config.ledger.sheet,
        range: &config.ledger.range,
        transform: &transform,
        source_folder_id: &config.source_folder_id,
        output_id: &config.output.document_id,
        options: config.compile_options(),
        force: args.force,
    };

    match build_with(&local.services(), plan).await? {
        BuildOutcome::UpToDate => println!("up-to-date"),
        BuildOutcome::Locked => println!("locked"),
        BuildOutcome::Compiled(report) => {
            for failure in &report.failures {
                tracing::warn!(
                    title = %failure.entry.title,
                    source_id = %failure.entry.source_id,
                    error = %failure.error,
                    "song left out of compiled document"
                );
            }
            println!(
                "compiled {} songs ({} failed, {} indexed)",
                report.success_count,
                report.failures.len(),
                report.toc_entries
            );
        }
    }

    tracing::info!("done");
    Ok(())
}

pub async fn check(args: CheckArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config, args.store.as_deref())?;
    let local = LocalServices::new(&config);
    let catalog = Catalog::read(
        &local.ledger,
        &config.ledger.sheet,
        &config.ledger.range,
        &config.row_transform(),
    )
    .await
    .context("read catalog")?;

    let stale = StalenessChecker::new(&local.store)
        .needs_recompile(&config.output.document_id, &config.source_folder_id, &catalog)
        .await
        .context("check staleness")?;
    println!("{}", if stale { "stale" } else { "up-to-date" });
    Ok(())
}

pub async fn catalog(args: CatalogArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config, None)?;
    let ledger = LocalFsLedger::new(&config.ledger.path);
    let catalog = Catalog::read(
        &ledger,
        &config.ledger.sheet,
        &config.ledger.range,
        &config.row_transform(),
    )
    .await
    .context("read catalog")?;

    for entry in catalog.entries() {
        println!(
            "{}",
            serde_json::to_string(entry).context("serialize catalog entry")?
        );
    }
    Ok(())
}
