//! Depot CLI - serve a directory or talk to a running server
//!
//! Usage:
//!   depot serve [--root DIR]             Share a directory
//!   depot list                           List stored files
//!   depot upload <path> [--name NAME]    Store a local file
//!   depot download <name> [dest]         Fetch a stored file
//!   depot delete <name>                  Remove a stored file
//!   depot config                         Print a sample config file

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use depot_core::{Config, DEFAULT_PORT};
use depot_daemon::{DepotClient, DepotServer};

#[derive(Parser)]
#[command(name = "depot")]
#[command(about = "Shared-directory file server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Server to talk to (client commands)
    #[arg(
        short,
        long,
        global = true,
        env = "DEPOT_SERVER",
        default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT))
    )]
    server: SocketAddr,
}

#[derive(Subcommand)]
enum Commands {
    /// Share a directory
    Serve {
        /// Config file (default: platform config dir)
        #[arg(short, long, env = "DEPOT_CONFIG")]
        config: Option<PathBuf>,

        /// Directory to share (overrides config)
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<IpAddr>,
    },

    /// List stored files
    List,

    /// Store a local file
    Upload {
        /// File to upload
        path: PathBuf,

        /// Name to store it under (default: the file's name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Fetch a stored file
    Download {
        /// Stored name
        name: String,

        /// Destination (default: ./<name>)
        dest: Option<PathBuf>,
    },

    /// Remove a stored file
    Delete {
        /// Stored name
        name: String,
    },

    /// Print a sample configuration file
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }

    match cli.command {
        Commands::Serve {
            config,
            root,
            port,
            bind,
        } => {
            let mut config = match config {
                Some(path) => Config::load_from(&path)?,
                None => Config::load(),
            };
            if let Some(root) = root {
                config.storage.root = root;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            run_server(config).await?;
        }
        Commands::List => {
            let mut client = DepotClient::connect(cli.server).await?;
            let entries = client.list().await?;
            if entries.is_empty() {
                println!("(no files)");
            }
            for entry in &entries {
                println!("{:>12}  {}", entry.size, entry.name);
            }
            client.quit().await?;
        }
        Commands::Upload { path, name } => {
            let mut client = DepotClient::connect(cli.server).await?;
            client.upload_file(&path, name.as_deref()).await?;
            client.quit().await?;
        }
        Commands::Download { name, dest } => {
            let dest = dest.unwrap_or_else(|| PathBuf::from(&name));
            let mut client = DepotClient::connect(cli.server).await?;
            let n = client.download_file(&name, &dest).await?;
            info!("Saved {} ({} bytes) to {:?}", name, n, dest);
            client.quit().await?;
        }
        Commands::Delete { name } => {
            let mut client = DepotClient::connect(cli.server).await?;
            client.delete(&name).await?;
            info!("Deleted {}", name);
            client.quit().await?;
        }
        Commands::Config => {
            if let Some(path) = Config::default_path() {
                println!("# {}", path.display());
            }
            print!("{}", Config::sample());
        }
    }

    Ok(())
}

async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting Depot server...");
    info!("  Sharing: {:?}", config.storage.root);
    info!("  Listening on: {}", config.server.bind_addr());

    let server = DepotServer::new(config)?;

    // Handle Ctrl+C
    tokio::select! {
        result = server.serve() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e.into());
            }
        }
        _ = signal::ctrl_c() => {
            info!("Shutting down...");
        }
    }

    Ok(())
}
