mod server;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use morphcast_core::{logging, Config};

use server::MorphcastServer;

/// Realtime media relay: one upstream stream, many WebRTC viewers
#[derive(Debug, Parser)]
#[command(name = "morphcast", version, about)]
struct Args {
    /// Path to a YAML/TOML/JSON config file
    #[arg(short, long, env = "MORPHCAST_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let config = Config::load(args.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Morphcast relay starting...");
    info!("HTTP address: {}", config.http_address());
    info!("Upstream RTP: {}", config.upstream.rtp_listen_addr);

    // 4. Run until shutdown
    MorphcastServer::new(config).run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_accept_config_path() {
        let args = Args::try_parse_from(["morphcast", "--config", "relay.yaml"]).unwrap();
        assert_eq!(args.config.as_deref(), Some("relay.yaml"));
    }
}
