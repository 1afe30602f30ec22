//! Outpost worker process.
//!
//! Serves one registry entry over stdin/stdout using length-prefixed JSON
//! frames. Started by the host as `outpost-worker --entry <name>`. Logs go
//! to stderr, since stdout carries the channel.

mod entries;

use clap::Parser;
use outpost_core::frame::DEFAULT_MAX_FRAME_LEN;
use tracing_subscriber::EnvFilter;

/// Exit code for an entry this executable does not serve.
const EXIT_UNKNOWN_ENTRY: i32 = 2;

#[derive(Parser)]
#[command(name = "outpost-worker")]
#[command(about = "Worker process for outpost")]
#[command(version)]
struct Cli {
    /// Registry entry to serve
    #[arg(long, required_unless_present = "list")]
    entry: Option<String>,

    /// Largest frame accepted from the host, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_LEN)]
    max_frame_len: usize,

    /// Print the available entries and exit
    #[arg(long)]
    list: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // OUTPOST_LOG takes precedence over RUST_LOG
    let filter = EnvFilter::try_from_env("OUTPOST_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let filter = if cli.verbose {
        filter.add_directive(tracing::Level::DEBUG.into())
    } else {
        filter
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let registry = entries::registry();

    if cli.list {
        for entry in registry.entries() {
            println!("{}", entry);
        }
        return Ok(());
    }

    let Some(entry) = cli.entry else {
        anyhow::bail!("--entry is required");
    };

    if !registry.contains(&entry) {
        eprintln!(
            "{}",
            outpost_core::Error::UnknownEntry(entry.clone()).with_hint()
        );
        std::process::exit(EXIT_UNKNOWN_ENTRY);
    }

    tracing::debug!("Worker {} serving entry '{}'", std::process::id(), entry);
    outpost_core::worker::serve_stdio(&registry, &entry, cli.max_frame_len)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e.with_hint()))?;

    tracing::debug!("Host closed the channel, exiting");
    Ok(())
}
