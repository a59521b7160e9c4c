use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fakekoji::auth::AuthorizedKeys;
use fakekoji::cli::{run_builds, run_resolve};
use fakekoji::config::{KeySource, ServerConfig};
use fakekoji::ingest::{IngestService, ScpServer, load_host_key};
use fakekoji::server::{AppState, download_router, xmlrpc_router};
use fakekoji::store::{PathResolver, RescanCatalog};

#[derive(Parser)]
#[command(name = "fakekoji")]
#[command(about = "A filesystem-backed Koji hub stand-in", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the SCP, XML-RPC and download endpoints
    Serve {
        /// TOML file with server settings; flags override it
        #[arg(long, env = "FAKEKOJI_CONFIG")]
        config: Option<PathBuf>,

        /// Host to bind to
        #[arg(long, env = "FAKEKOJI_HOST")]
        host: Option<String>,

        /// Directory holding product/version/release trees
        #[arg(long, env = "FAKEKOJI_REPO_ROOT")]
        repo_root: Option<PathBuf>,

        #[arg(long, env = "FAKEKOJI_SCP_PORT")]
        scp_port: Option<u16>,

        #[arg(long, env = "FAKEKOJI_XMLRPC_PORT")]
        xmlrpc_port: Option<u16>,

        #[arg(long, env = "FAKEKOJI_DOWNLOAD_PORT")]
        download_port: Option<u16>,

        /// Private key the SSH endpoint identifies itself with
        #[arg(long, env = "FAKEKOJI_HOST_KEY")]
        host_key: Option<PathBuf>,

        /// principal=path pairs, `;` separated. Defaults to ~/.ssh/authorized_keys
        #[arg(
            long,
            env = "FAKEKOJI_AUTHORIZED_KEYS",
            value_delimiter = ';',
            value_parser = parse_key_source
        )]
        authorized_keys: Vec<KeySource>,

        /// Leave `static` release segments untouched
        #[arg(long)]
        keep_static_release: bool,
    },

    /// Print where raw upload paths would be stored
    Resolve {
        #[arg(required = true)]
        paths: Vec<String>,

        /// Leave `static` release segments untouched
        #[arg(long)]
        keep_static_release: bool,
    },

    /// List the builds found under a repository root
    Builds {
        #[arg(long, env = "FAKEKOJI_REPO_ROOT", default_value = "./builds")]
        repo_root: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_key_source(raw: &str) -> Result<KeySource, String> {
    raw.parse::<KeySource>().map_err(|e| e.to_string())
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    fs::create_dir_all(&config.repo_root)
        .with_context(|| format!("cannot create {}", config.repo_root.display()))?;

    let host_key_path = config
        .host_key
        .clone()
        .context("no SSH host key configured, pass --host-key or set FAKEKOJI_HOST_KEY")?;
    let host_key = load_host_key(&host_key_path)?;
    let keys = AuthorizedKeys::load(&config.key_sources()?)?;
    for principal in keys.principals() {
        info!("Accepting uploads from {principal}");
    }

    let resolver = PathResolver::new(config.normalize_static_release);
    let ingest = Arc::new(IngestService::new(&config.repo_root, resolver));
    let state = Arc::new(AppState {
        catalog: Arc::new(RescanCatalog::new(&config.repo_root)),
        repo_root: config.repo_root.clone(),
    });

    let scp_listener = TcpListener::bind(config.scp_addr()?).await?;
    let xmlrpc_listener = TcpListener::bind(config.xmlrpc_addr()?).await?;
    let download_listener = TcpListener::bind(config.download_addr()?).await?;

    info!("Serving {}", config.repo_root.display());
    info!("XML-RPC hub on {}", xmlrpc_listener.local_addr()?);
    info!("Downloads on {}", download_listener.local_addr()?);

    let scp = ScpServer::new(ingest, keys, host_key);
    tokio::try_join!(
        async { scp.serve(scp_listener).await.map_err(anyhow::Error::from) },
        async {
            axum::serve(xmlrpc_listener, xmlrpc_router(state.clone()))
                .await
                .map_err(anyhow::Error::from)
        },
        async {
            axum::serve(download_listener, download_router(state.clone()))
                .await
                .map_err(anyhow::Error::from)
        },
    )?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("fakekoji=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            host,
            repo_root,
            scp_port,
            xmlrpc_port,
            download_port,
            host_key,
            authorized_keys,
            keep_static_release,
        } => {
            let mut server = match config {
                Some(path) => ServerConfig::load(&path)?,
                None => ServerConfig::default(),
            };

            if let Some(host) = host {
                server.host = host;
            }
            if let Some(repo_root) = repo_root {
                server.repo_root = repo_root;
            }
            if let Some(port) = scp_port {
                server.scp_port = port;
            }
            if let Some(port) = xmlrpc_port {
                server.xmlrpc_port = port;
            }
            if let Some(port) = download_port {
                server.download_port = port;
            }
            if host_key.is_some() {
                server.host_key = host_key;
            }
            if !authorized_keys.is_empty() {
                server.authorized_keys = authorized_keys;
            }
            if keep_static_release {
                server.normalize_static_release = false;
            }

            serve(server).await?;
        }
        Commands::Resolve {
            paths,
            keep_static_release,
        } => {
            run_resolve(&paths, !keep_static_release)?;
        }
        Commands::Builds { repo_root, json } => {
            run_builds(&repo_root, json)?;
        }
    }

    Ok(())
}
