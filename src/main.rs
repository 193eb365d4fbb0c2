use std::path::PathBuf;
use std::sync::Arc;

use bmc::{Bmc, Config, UdpServer};
use clap::Parser;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Virtual IPMI v1.5 BMC", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "bmc.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

async fn run(args: Args) -> bmc::Result<()> {
    let config = Config::load(&args.config)?;
    let bmc = Arc::new(Bmc::from_config(&config)?);
    let server = UdpServer::bind(Arc::clone(&bmc)).await?;
    info!(
        endpoints = ?server.local_addrs()?,
        users = config.users.len(),
        "virtual BMC started"
    );

    tokio::select! {
        served = server.serve() => served,
        _ = tokio::signal::ctrl_c() => {
            info!(sessions = bmc.sessions().len(), "shutting down");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install log subscriber: {e}");
    }

    if let Err(e) = run(args).await {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}
