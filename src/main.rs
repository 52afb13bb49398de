use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use fractal_mesh::config::NodeConfig;
use fractal_mesh::node::Node;
use fractal_mesh::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "fractal-mesh")]
#[command(version)]
#[command(about = "Peer-to-peer cluster rendering Julia set animations")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a workstation
    Server(ServerArgs),
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Path to the JSON workstation config
    #[arg(long, default_value = "workstation.json")]
    config: PathBuf,

    /// Override the gRPC port from the config
    #[arg(long)]
    port: Option<u16>,

    /// Override the admin HTTP port from the config
    #[arg(long)]
    http_port: Option<u16>,
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = NodeConfig::from_file(&args.config)?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }
    config.validate()?;

    let node = Node::new(config)?;
    let shutdown = install_shutdown_handler();
    node.run(shutdown).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Server(server_args) => run_server(server_args).await,
    }
}
