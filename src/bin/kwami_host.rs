//! Headless session host over stdin/stdout.
//!
//! Reads data-channel JSON lines from stdin and writes outbound tool calls
//! and session events to stdout. All tracing output goes to stderr so that
//! stdout stays a clean JSON channel.

use kwami::config::AgentConfig;
use kwami::host::stdio::run_stdio_host;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let path = AgentConfig::default_config_path();
    let settings = AgentConfig::load_or_default()
        .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display()))?;
    tracing::info!(config = %path.display(), "kwami-host starting");

    run_stdio_host(settings).await.map_err(|e| {
        tracing::error!(error = %e, "kwami-host exited with error");
        anyhow::anyhow!("kwami-host failed: {e}")
    })?;

    tracing::info!("kwami-host shut down cleanly");
    Ok(())
}
