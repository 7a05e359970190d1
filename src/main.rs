use std::path::PathBuf;

use clap::Parser;

/// Transparent DICOM privacy proxy.
#[derive(Parser, Debug)]
#[command(name = "dicomshield", version, about = "Transparent DICOM privacy proxy")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "configs/config.yml")]
    config: PathBuf,

    /// Overrides the configured log level (e.g. "debug", "trace").
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match dicomshield::config::ProxyConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration from {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    dicomshield::init_logging(&config.logging);

    if let Err(e) = dicomshield::run(config).await {
        tracing::error!(error = %e, "dicomshield exited with an error");
        std::process::exit(1);
    }

    Ok(())
}
