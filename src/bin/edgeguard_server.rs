use clap::Parser;
use edgeguard::edge_node::load_node_config;
use edgeguard::EdgeHttpServer;
use log::info;

/// Command line options for the edge node server.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to the node configuration file (JSON or TOML)
    #[arg(long)]
    config: Option<String>,

    /// Socket address to bind, overrides the configuration file
    #[arg(long)]
    bind: Option<String>,
}

/// Main entry point for the edge node server.
///
/// # Environment Variables
///
/// * `EDGEGUARD_CONFIG` - Path to the configuration file (default: config/edgeguard.json)
/// * `EDGEGUARD_API_KEY`, `EDGEGUARD_APP_ID`, `EDGEGUARD_SIGNING_SECRET` - Deployment credentials
/// * `RUST_LOG` - Log filter, takes precedence over the configured levels
///
/// # Errors
///
/// Returns an error if:
/// * The configuration file cannot be read, parsed or validated
/// * The HTTP server cannot be started
#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match load_node_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            edgeguard::logging::init_default();
            log::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    if let Some(bind) = cli.bind {
        config = config.with_bind_address(&bind);
    }

    edgeguard::logging::init(&config.log).ok();
    info!(
        "Starting edge node ({} environment) on {}",
        config.environment, config.bind_address
    );

    let server = EdgeHttpServer::new(config)?;
    server.run().await?;

    info!("Edge node stopped");
    Ok(())
}
