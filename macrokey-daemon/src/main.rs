mod config;
mod remap;

use anyhow::Context;
use clap::Parser;
use config::DaemonConfig;
use macrokey::{Backend, BackendKind, Engine, StopHandle, check_privileges, list_devices};
use remap::RemapSink;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON config file (defaults to the built-in footswitch mapping)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Virtual device backend: auto, hid or uinput
    #[arg(short, long)]
    backend: Option<BackendKind>,

    /// Longest wait between two loop wake-ups, in milliseconds
    #[arg(long, default_value = "100")]
    timeout_ms: u64,

    /// List input devices and exit
    #[arg(short, long)]
    list: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    List,
    Remap,
}

/// Decide what to do, after the privilege check. Listing opens every
/// event node as well, so it is no exception.
fn select_mode(
    args: &Args,
    check: impl FnOnce() -> macrokey::Result<()>,
) -> anyhow::Result<Mode> {
    check()?;
    Ok(if args.list { Mode::List } else { Mode::Remap })
}

async fn run(args: Args) -> anyhow::Result<()> {
    if select_mode(&args, check_privileges)? == Mode::List {
        for info in list_devices().context("Failed to list /dev/input")? {
            println!("{}\t{}", info.path.display(), info.name);
        }
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => DaemonConfig::load(path)?,
        None => DaemonConfig::default(),
    };

    // Pick the physical devices before the virtual one exists so it can
    // never match its own output.
    let mut selected = Vec::new();
    for info in list_devices().context("Failed to list /dev/input")? {
        if let Some(rule) = config.match_device(&info.name) {
            tracing::info!("Matched {} ({})", info.name, info.path.display());
            selected.push((info.path, rule.exclusive));
        }
    }
    if selected.is_empty() {
        anyhow::bail!("No input device matches the configured names");
    }

    let kind = args.backend.or(config.backend).unwrap_or_default();
    let backend = Backend::open(kind, config.virtual_device.as_ref())
        .with_context(|| format!("Failed to create {} virtual device", kind))?;
    tracing::info!("Virtual device ready ({})", backend.kind());

    let mut engine = Engine::new(backend).with_timeout(Duration::from_millis(args.timeout_ms));
    for (path, exclusive) in &selected {
        if let Err(e) = engine.open_physical_device(path, *exclusive) {
            tracing::warn!("{}", e);
        }
    }
    if engine.devices().is_empty() {
        engine.shutdown()?;
        anyhow::bail!("None of the matched input devices could be opened");
    }

    tokio::spawn(stop_on_signal(engine.stop_handle()));

    let mut sink = RemapSink::from_config(&config);
    let (result, forwarded) = tokio::task::spawn_blocking(move || {
        let result = engine.start_loop(&mut sink);
        let closed = engine.shutdown();
        (result.and(closed), sink.forwarded())
    })
    .await?;

    tracing::info!("Forwarded {} key event(s)", forwarded);
    result.context("Event loop failed")?;
    Ok(())
}

async fn stop_on_signal(stop: StopHandle) {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::warn!("Cannot watch SIGTERM: {}", e);
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.stop();
            }
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
        _ = term.recv() => tracing::info!("Terminated"),
    }
    stop.stop();
}
