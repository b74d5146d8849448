use anyhow::Context as _;

/// Filter used when `RUST_LOG` is unset. Only this crate's events are shown;
/// `verbose` lowers the level to debug.
fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "songbook=debug"
    } else {
        "songbook=info"
    }
}

/// Installs the stderr subscriber. `RUST_LOG` wins over `verbose`. Verbose
/// output also names the module each event came from.
pub fn init(verbose: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_directive(verbose)))
        .context("build log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("initialize tracing subscriber: {err}"))?;

    Ok(())
}
